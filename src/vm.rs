//! Contract execution runtime
//!
//! The runtime turns a transaction's instructions into state mutations via
//! an embedded, deterministic interpreter exposing a fixed host capability
//! API to untrusted contract source. Nothing outside the enumerated host
//! bindings is reachable from a contract: no filesystem, no network, no
//! ambient globals.

pub mod abi;
pub mod engine;
pub mod host;
pub mod interpreter;
pub mod value;

pub use abi::InterfaceDescriptor;
pub use engine::{CallOutcome, ExecutionEngine, FailedExecution, FeeSchedule, VmLimits};
pub use host::CallMonitor;
pub use value::Value;
