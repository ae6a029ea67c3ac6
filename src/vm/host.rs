//! Host-side helpers behind the sandbox capability API
//!
//! The call monitor is shared by every nested contract-to-contract call of
//! one top-level transaction, so recursive fan-out is bounded by a single
//! budget no matter how deep the call tree goes.

use crate::crypto::{Address, Amount, Hash};
use crate::error::{ChainError, Result};
use crate::vm::value::Value;
use primitive_types::U256;
use sha2::{Digest, Sha256};

/// Nested call depth cap. The call budget bounds total fan-out; this
/// bounds stack growth long before the budget would.
pub const MAX_CALL_DEPTH: usize = 64;

/// Per-top-level-transaction counters threaded through nested calls.
#[derive(Debug)]
pub struct CallMonitor {
    pub total_calls: u32,
    pub call_stack: Vec<String>,
    pub execution_id: Hash,
    pub rng_nonce: u64,
}

impl CallMonitor {
    pub fn new(execution_id: Hash) -> Self {
        CallMonitor {
            total_calls: 0,
            call_stack: Vec::new(),
            execution_id,
            rng_nonce: 0,
        }
    }

    /// Enter a call frame, charging it against the shared budget.
    pub fn enter(&mut self, frame: String, max_calls: u32) -> Result<()> {
        if self.total_calls >= max_calls {
            return Err(ChainError::ExecutionLimit(format!(
                "call budget of {} exhausted at {}",
                max_calls, frame
            )));
        }
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(ChainError::ExecutionLimit(format!(
                "call stack depth {} exceeded at {}",
                MAX_CALL_DEPTH, frame
            )));
        }
        self.total_calls += 1;
        self.call_stack.push(frame);
        Ok(())
    }

    pub fn exit(&mut self) {
        self.call_stack.pop();
    }

    pub fn depth(&self) -> usize {
        self.call_stack.len()
    }
}

/// Deterministic pseudo-random value: SHA-256 over the parent block hash,
/// the execution id, and the monitor counters. Reproducible across nodes,
/// not cryptographically secure.
pub fn deterministic_random(parent_hash: &str, monitor: &mut CallMonitor) -> Value {
    let mut hasher = Sha256::new();
    hasher.update(parent_hash.as_bytes());
    hasher.update(monitor.execution_id.as_bytes());
    hasher.update(monitor.total_calls.to_be_bytes());
    hasher.update(monitor.rng_nonce.to_be_bytes());
    monitor.rng_nonce += 1;
    let digest = hasher.finalize();
    Value::Uint(Amount(U256::from_big_endian(&digest)))
}

/// ABI-style static encoding: each value becomes one or more 32-byte
/// words. Uints and bools are left-padded big-endian words; strings are a
/// length word followed by their UTF-8 bytes right-padded to a word
/// boundary; null is a zero word.
pub fn abi_encode(args: &[Value]) -> String {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::Null => out.extend_from_slice(&[0u8; 32]),
            Value::Bool(b) => {
                let mut word = [0u8; 32];
                word[31] = u8::from(*b);
                out.extend_from_slice(&word);
            }
            Value::Uint(amount) => {
                let mut word = [0u8; 32];
                amount.0.to_big_endian(&mut word);
                out.extend_from_slice(&word);
            }
            Value::Str(s) => {
                let bytes = s.as_bytes();
                let mut length_word = [0u8; 32];
                U256::from(bytes.len()).to_big_endian(&mut length_word);
                out.extend_from_slice(&length_word);
                out.extend_from_slice(bytes);
                let rem = bytes.len() % 32;
                if rem != 0 {
                    out.extend_from_slice(&vec![0u8; 32 - rem]);
                }
            }
        }
    }
    format!("0x{}", hex::encode(out))
}

/// Coerce a sandbox value into an amount: uints pass through, strings are
/// parsed as decimal.
pub fn coerce_amount(value: &Value) -> Result<Amount> {
    match value {
        Value::Uint(a) => Ok(*a),
        Value::Str(s) => Amount::from_decimal(s.trim()),
        other => Err(ChainError::Execution(format!(
            "cannot interpret {} as an amount",
            other.type_name()
        ))),
    }
}

/// Coerce a sandbox value into an address.
pub fn coerce_address(value: &Value) -> Result<Address> {
    Address::parse(value.as_str()?)
}
