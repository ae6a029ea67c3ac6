//! Transaction execution engine
//!
//! Turns a transaction's instructions into overlay mutations. Execution is
//! strictly sequential: later instructions (and later transactions in the
//! block) observe the effects of earlier ones, and the resulting hashes
//! must be bit-for-bit reproducible on every node.

use crate::block::Receipt;
use crate::crypto::{Address, Amount, Hash};
use crate::error::{ChainError, Result};
use crate::ledger::core::overlay::Overlay;
use crate::store::StateStore;
use crate::transaction::{Instruction, Transaction};
use crate::vm::abi::InterfaceDescriptor;
use crate::vm::host::{
    abi_encode, coerce_address, coerce_amount, deterministic_random, CallMonitor,
};
use crate::vm::interpreter::{Budget, ContractSource, Evaluator, Host};
use crate::vm::value::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Resource ceilings for sandboxed execution.
#[derive(Debug, Clone)]
pub struct VmLimits {
    /// Cumulative calls (including nested) per top-level transaction.
    pub max_calls: u32,
    /// Interpreter steps per invocation.
    pub max_steps: u64,
    /// Watchdog per invocation; 0 disables it (debugging only).
    pub timeout_ms: u64,
}

impl Default for VmLimits {
    fn default() -> Self {
        VmLimits {
            max_calls: 1000,
            max_steps: 100_000,
            timeout_ms: 250,
        }
    }
}

/// Flat fee schedule, in base units. Execution fees scale with the number
/// of calls a transaction consumes, a coarse gas proxy.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub transfer: Amount,
    pub create: Amount,
    pub call_unit: Amount,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            transfer: Amount(primitive_types::U256::exp10(15)),
            create: Amount(primitive_types::U256::exp10(16)),
            call_unit: Amount(primitive_types::U256::exp10(15)),
        }
    }
}

impl FeeSchedule {
    /// Lower bound on what a transaction will cost, used for fee-priority
    /// mempool ordering. An execute counts as at least one call.
    pub fn estimate(&self, tx: &Transaction) -> Amount {
        let mut total = Amount::zero();
        for instruction in &tx.instructions {
            let fee = match instruction {
                Instruction::Transfer { .. } => self.transfer,
                Instruction::Create { .. } => self.create,
                Instruction::Execute { .. } => self.call_unit,
                Instruction::Mint { .. } => Amount::zero(),
            };
            total = total.checked_add(fee).unwrap_or(total);
        }
        total
    }
}

/// Everything a transaction executes against: the block's working overlay
/// (never disk directly) plus read access to committed chain history.
pub struct BlockEnv<'a> {
    pub store: &'a StateStore,
    pub overlay: &'a mut Overlay,
    pub height: u64,
    pub parent_hash: Hash,
}

/// A failure with the fees accrued before it, so the caller can account
/// for partial cost without committing any mutation.
#[derive(Debug)]
pub struct FailedExecution {
    pub error: ChainError,
    pub fees: Amount,
}

/// Structured result of the read-only call surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallOutcome {
    pub success: bool,
    pub value: Option<Value>,
    pub error: Option<String>,
    pub calls_used: u32,
}

pub struct ExecutionEngine {
    limits: VmLimits,
    fees: FeeSchedule,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        ExecutionEngine::new(VmLimits::default(), FeeSchedule::default())
    }
}

impl ExecutionEngine {
    pub fn new(limits: VmLimits, fees: FeeSchedule) -> Self {
        ExecutionEngine { limits, fees }
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Execute one transaction against the block environment.
    ///
    /// On failure the overlay may hold partial writes; the caller owns the
    /// checkpoint taken before the call and must restore it. The returned
    /// `FailedExecution` carries the fees accrued up to the failure.
    pub fn execute_transaction(
        &self,
        tx: &Transaction,
        env: &mut BlockEnv,
    ) -> std::result::Result<Receipt, FailedExecution> {
        let mut fees = Amount::zero();
        match self.execute_inner(tx, env, &mut fees) {
            Ok(created_contract) => Ok(Receipt {
                success: true,
                fees,
                block_height: env.height,
                created_contract,
            }),
            Err(error) => Err(FailedExecution { error, fees }),
        }
    }

    fn execute_inner(
        &self,
        tx: &Transaction,
        env: &mut BlockEnv,
        fees: &mut Amount,
    ) -> Result<Option<Address>> {
        // Guard against tampered or replayed payloads before touching state.
        tx.verify_hash()?;
        tx.validate()?;

        if !tx.is_system() {
            let sender = env.overlay.account(env.store, &tx.from)?;
            if tx.nonce != sender.tx_count {
                return Err(ChainError::NonceMismatch {
                    expected: sender.tx_count,
                    got: tx.nonce,
                });
            }
        }

        let mut consumed = Amount::zero();
        let mut created_contract = None;
        let mut monitor = CallMonitor::new(tx.hash.clone());

        for instruction in &tx.instructions {
            match instruction {
                Instruction::Mint { to, amount } => {
                    env.overlay.account_mut(env.store, to)?.mint(*amount)?;
                    env.overlay.record_mint(*amount)?;
                    consumed = add(consumed, *amount)?;
                }
                Instruction::Transfer { to, amount } => {
                    env.overlay.account_mut(env.store, &tx.from)?.burn(*amount)?;
                    env.overlay.account_mut(env.store, to)?.mint(*amount)?;
                    *fees = add(*fees, self.fees.transfer)?;
                    consumed = add(consumed, *amount)?;
                }
                Instruction::Create {
                    address,
                    code,
                    interface,
                } => {
                    self.deploy(env, &mut monitor, &tx.from, address, code, interface.clone())?;
                    created_contract = Some(address.clone());
                    *fees = add(*fees, self.fees.create)?;
                }
                Instruction::Execute {
                    address,
                    method,
                    args,
                } => {
                    let calls_before = monitor.total_calls;
                    let values = args.iter().map(|a| Value::Str(a.clone())).collect();
                    self.dispatch(env, &mut monitor, tx.from.clone(), address, method, values)?;
                    let calls_used = monitor.total_calls - calls_before;
                    let call_fees = self
                        .fees
                        .call_unit
                        .checked_mul_u64(u64::from(calls_used))
                        .ok_or_else(|| ChainError::Execution("fee overflow".to_string()))?;
                    *fees = add(*fees, call_fees)?;
                }
            }
        }

        if consumed != tx.value {
            return Err(ChainError::InvalidTransaction(format!(
                "consumed value {} does not match declared value {}",
                consumed, tx.value
            )));
        }

        // Fees are burned from the sender, shrinking total supply. The
        // system mint pseudo-transaction is fee-exempt.
        if !tx.is_system() {
            if !fees.is_zero() {
                env.overlay.account_mut(env.store, &tx.from)?.burn(*fees)?;
                env.overlay.record_burn(*fees)?;
            }
            env.overlay.account_mut(env.store, &tx.from)?.bump_tx_count();
        }

        Ok(created_contract)
    }

    /// Deploy contract source at an untouched address: parse, run the
    /// constructor in the sandbox, fix the interface descriptor.
    fn deploy(
        &self,
        env: &mut BlockEnv,
        monitor: &mut CallMonitor,
        deployer: &Address,
        address: &Address,
        code: &str,
        supplied: Option<InterfaceDescriptor>,
    ) -> Result<()> {
        {
            let target = env.overlay.account(env.store, address)?;
            if !target.is_untouched() {
                return Err(ChainError::AddressOccupied(address.to_string()));
            }
        }

        let source = ContractSource::parse(code)?;
        monitor.enter(format!("{}.init", address), self.limits.max_calls)?;
        let constructed = (|| {
            let mut storage = BTreeMap::new();
            let mut budget = Budget::new(self.limits.max_steps, self.limits.timeout_ms);
            let mut frame = HostFrame {
                engine: self,
                env: &mut *env,
                monitor: &mut *monitor,
                contract: address.clone(),
                caller: deployer.clone(),
            };
            let mut evaluator = Evaluator::new(&mut storage, false, &mut budget, &mut frame);
            evaluator.run_constructor(&source)?;
            Ok::<_, ChainError>(storage)
        })();
        monitor.exit();
        let storage = constructed?;

        let descriptor = match supplied {
            Some(descriptor) => descriptor.validated(&source, &storage)?,
            None => InterfaceDescriptor::derive(&source, &storage),
        };

        let json_storage = storage
            .into_iter()
            .map(|(k, v)| (k, v.to_json()))
            .collect();
        env.overlay
            .account_mut(env.store, address)?
            .deploy(code.to_string(), descriptor, json_storage)?;
        debug!(contract = %address, "deployed contract");
        Ok(())
    }

    /// Dispatch a method call or attribute read into the sandbox. Nested
    /// contract calls re-enter here with the same monitor.
    fn dispatch(
        &self,
        env: &mut BlockEnv,
        monitor: &mut CallMonitor,
        caller: Address,
        target: &Address,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        monitor.enter(format!("{}.{}", target, method), self.limits.max_calls)?;
        let result = self.dispatch_frame(env, monitor, caller, target, method, args);
        monitor.exit();
        result
    }

    fn dispatch_frame(
        &self,
        env: &mut BlockEnv,
        monitor: &mut CallMonitor,
        caller: Address,
        target: &Address,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let (code, descriptor, stored) = {
            let account = env.overlay.account(env.store, target)?;
            match (&account.code, &account.interface, &account.storage) {
                (Some(code), Some(descriptor), Some(storage)) => {
                    (code.clone(), descriptor.clone(), storage.clone())
                }
                _ => {
                    return Err(ChainError::InvalidTransaction(format!(
                        "{} is not a contract",
                        target
                    )))
                }
            }
        };

        // Methods and readable attributes are both valid call targets.
        if descriptor.method(method).is_none() {
            if descriptor.attribute(method).is_some() {
                if !args.is_empty() {
                    return Err(ChainError::WrongArgumentCount {
                        method: method.to_string(),
                        expected: 0,
                        got: args.len(),
                    });
                }
                return match stored.get(method) {
                    Some(json) => Value::from_json(json),
                    None => Ok(Value::Null),
                };
            }
            return Err(ChainError::UnknownMethod(format!(
                "{} has no method or attribute {:?}",
                target, method
            )));
        }

        let abi = descriptor
            .method(method)
            .ok_or_else(|| ChainError::UnknownMethod(method.to_string()))?;
        if args.len() != abi.params.len() {
            return Err(ChainError::WrongArgumentCount {
                method: method.to_string(),
                expected: abi.params.len(),
                got: args.len(),
            });
        }
        let view = !abi.mutating;

        let source = ContractSource::parse(&code)?;
        let def = source
            .method(method)
            .ok_or_else(|| {
                // descriptor and code disagree; treat as corrupt deployment
                ChainError::IntegrityFailure(format!(
                    "contract {} descriptor lists {:?} but source lacks it",
                    target, method
                ))
            })?
            .clone();

        // Shallow-merge persisted state onto a fresh instance. The
        // constructor never runs on ordinary calls.
        let mut instance: BTreeMap<String, Value> = BTreeMap::new();
        for (key, json) in &stored {
            instance.insert(key.clone(), Value::from_json(json)?);
        }

        let result = {
            let mut budget = Budget::new(self.limits.max_steps, self.limits.timeout_ms);
            let mut frame = HostFrame {
                engine: self,
                env: &mut *env,
                monitor,
                contract: target.clone(),
                caller,
            };
            let mut evaluator = Evaluator::new(&mut instance, view, &mut budget, &mut frame);
            evaluator.run_method(&def, args)?
        };

        // Merge the instance's fields back into persisted storage only
        // after a successful, non-exceptional call.
        if !view {
            let account = env.overlay.account_mut(env.store, target)?;
            if let Some(storage) = account.storage.as_mut() {
                for (key, value) in instance {
                    storage.insert(key, value.to_json());
                }
            }
        }
        Ok(result)
    }

    /// Read-only call surface for external consumers: dispatches against a
    /// throwaway overlay and returns a structured outcome instead of
    /// propagating execution errors.
    pub fn call_readonly(
        &self,
        store: &StateStore,
        target: &Address,
        method: &str,
        args: Vec<String>,
    ) -> CallOutcome {
        let mut overlay = Overlay::new();
        let mut env = BlockEnv {
            store,
            overlay: &mut overlay,
            height: store.block_count(),
            parent_hash: store.last_block_hash(),
        };
        let mut monitor = CallMonitor::new(format!("call:{}:{}", target, method));
        let values = args.into_iter().map(Value::Str).collect();
        match self.dispatch(
            &mut env,
            &mut monitor,
            Address::system(),
            target,
            method,
            values,
        ) {
            Ok(value) => CallOutcome {
                success: true,
                value: Some(value),
                error: None,
                calls_used: monitor.total_calls,
            },
            Err(error) => CallOutcome {
                success: false,
                value: None,
                error: Some(error.to_string()),
                calls_used: monitor.total_calls,
            },
        }
    }
}

/// The host capability set visible to contracts. Nothing else is exposed:
/// no filesystem, no network, no uncontrolled object access.
struct HostFrame<'a, 'b> {
    engine: &'a ExecutionEngine,
    env: &'a mut BlockEnv<'b>,
    monitor: &'a mut CallMonitor,
    contract: Address,
    caller: Address,
}

impl Host for HostFrame<'_, '_> {
    fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        match name {
            "transfer" => {
                expect_args(name, &args, 2)?;
                let to = coerce_address(&args[0])?;
                let amount = coerce_amount(&args[1])?;
                self.env
                    .overlay
                    .account_mut(self.env.store, &self.contract)?
                    .burn(amount)?;
                self.env
                    .overlay
                    .account_mut(self.env.store, &to)?
                    .mint(amount)?;
                Ok(Value::Null)
            }
            "call" => {
                if args.len() < 2 {
                    return Err(ChainError::WrongArgumentCount {
                        method: name.to_string(),
                        expected: 2,
                        got: args.len(),
                    });
                }
                let target = coerce_address(&args[0])?;
                let method = args[1].as_str()?.to_string();
                let rest = args[2..].to_vec();
                self.engine.dispatch(
                    self.env,
                    self.monitor,
                    self.contract.clone(),
                    &target,
                    &method,
                    rest,
                )
            }
            "balance" => {
                expect_args(name, &args, 1)?;
                let addr = coerce_address(&args[0])?;
                let balance = self.env.overlay.account(self.env.store, &addr)?.balance;
                Ok(Value::Uint(balance))
            }
            "assert" => {
                if args.is_empty() || args.len() > 2 {
                    return Err(ChainError::WrongArgumentCount {
                        method: name.to_string(),
                        expected: 1,
                        got: args.len(),
                    });
                }
                if !args[0].truthy() {
                    let msg = args
                        .get(1)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "assertion failed".to_string());
                    return Err(ChainError::Reverted(msg));
                }
                Ok(Value::Null)
            }
            "revert" => {
                expect_args(name, &args, 1)?;
                Err(ChainError::Reverted(args[0].to_string()))
            }
            "keccak" => {
                expect_args(name, &args, 1)?;
                let digest = crate::crypto::keccak256(args[0].to_string().as_bytes());
                Ok(Value::Str(format!("0x{}", hex::encode(digest))))
            }
            "random" => {
                expect_args(name, &args, 0)?;
                Ok(deterministic_random(&self.env.parent_hash, self.monitor))
            }
            "abi_encode" => Ok(Value::Str(abi_encode(&args))),
            "lowercase" => {
                expect_args(name, &args, 1)?;
                Ok(Value::Str(args[0].as_str()?.to_lowercase()))
            }
            "uppercase" => {
                expect_args(name, &args, 1)?;
                Ok(Value::Str(args[0].as_str()?.to_uppercase()))
            }
            "block_hash" => {
                expect_args(name, &args, 1)?;
                let height = coerce_amount(&args[0])?;
                if height.0 > primitive_types::U256::from(u64::MAX) {
                    return Ok(Value::Null);
                }
                Ok(match self.env.store.block_hash_at(height.0.as_u64()) {
                    Some(hash) => Value::Str(hash.clone()),
                    None => Value::Null,
                })
            }
            "block_time" => {
                expect_args(name, &args, 1)?;
                let hash = args[0].as_str()?;
                match self.env.store.block_height_by_hash(hash) {
                    Some(height) => {
                        let block = self.env.store.load_block(height)?;
                        Ok(Value::Uint(Amount::from_u64(block.timestamp)))
                    }
                    None => Ok(Value::Null),
                }
            }
            "block_height" => {
                expect_args(name, &args, 1)?;
                let hash = args[0].as_str()?;
                Ok(match self.env.store.block_height_by_hash(hash) {
                    Some(height) => Value::Uint(Amount::from_u64(height)),
                    None => Value::Null,
                })
            }
            "caller" => {
                expect_args(name, &args, 0)?;
                Ok(Value::Str(self.caller.to_string()))
            }
            "self_address" => {
                expect_args(name, &args, 0)?;
                Ok(Value::Str(self.contract.to_string()))
            }
            other => Err(ChainError::UnknownMethod(format!(
                "no host capability named {:?}",
                other
            ))),
        }
    }
}

fn expect_args(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(ChainError::WrongArgumentCount {
            method: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn add(a: Amount, b: Amount) -> Result<Amount> {
    a.checked_add(b)
        .ok_or_else(|| ChainError::Execution("amount overflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EMPTY_HASH;
    use tempfile::TempDir;

    const COUNTER: &str = r#"
        state counter = 0;

        fn increment() {
            counter = counter + 1;
        }

        view fn current() {
            return counter;
        }
    "#;

    struct Fixture {
        _dir: TempDir,
        store: StateStore,
        overlay: Overlay,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path(), true, 16, 16).unwrap();
        Fixture {
            _dir: dir,
            store,
            overlay: Overlay::new(),
        }
    }

    fn env<'a>(fx: &'a mut Fixture) -> BlockEnv<'a> {
        BlockEnv {
            store: &fx.store,
            overlay: &mut fx.overlay,
            height: 1,
            parent_hash: EMPTY_HASH.to_string(),
        }
    }

    fn fund(fx: &mut Fixture, addr: &Address, whole: u64) {
        fx.overlay
            .account_mut(&fx.store, addr)
            .unwrap()
            .mint(Amount::from_whole(whole))
            .unwrap();
    }

    #[test]
    fn test_mint_requires_system_sender() {
        let mut fx = fixture();
        let engine = ExecutionEngine::default();
        let tx = Transaction::new(
            Address::derive(b"alice"),
            0,
            vec![Instruction::Mint {
                to: Address::derive(b"alice"),
                amount: Amount::from_u64(5),
            }],
        )
        .unwrap();
        let failed = engine.execute_transaction(&tx, &mut env(&mut fx)).unwrap_err();
        assert!(matches!(failed.error, ChainError::InvalidTransaction(_)));
        assert!(failed.fees.is_zero());
    }

    #[test]
    fn test_transfer_moves_value_and_burns_fee() {
        let mut fx = fixture();
        let engine = ExecutionEngine::default();
        let alice = Address::derive(b"alice");
        let bob = Address::derive(b"bob");
        fund(&mut fx, &alice, 10);

        let tx = Transaction::new(
            alice.clone(),
            0,
            vec![Instruction::Transfer {
                to: bob.clone(),
                amount: Amount::from_whole(4),
            }],
        )
        .unwrap();
        let receipt = engine.execute_transaction(&tx, &mut env(&mut fx)).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.fees, engine.fee_schedule().transfer);

        let bob_balance = fx.overlay.account(&fx.store, &bob).unwrap().balance;
        assert_eq!(bob_balance, Amount::from_whole(4));
        let alice_acct = fx.overlay.account(&fx.store, &alice).unwrap();
        let expected = Amount::from_whole(6)
            .checked_sub(engine.fee_schedule().transfer)
            .unwrap();
        assert_eq!(alice_acct.balance, expected);
        assert_eq!(alice_acct.tx_count, 1);
        assert_eq!(fx.overlay.burned(), engine.fee_schedule().transfer);
    }

    #[test]
    fn test_tx_count_increments_once_regardless_of_instruction_count() {
        let mut fx = fixture();
        let engine = ExecutionEngine::default();
        let alice = Address::derive(b"alice");
        fund(&mut fx, &alice, 10);

        let tx = Transaction::new(
            alice.clone(),
            0,
            vec![
                Instruction::Transfer {
                    to: Address::derive(b"bob"),
                    amount: Amount::from_whole(1),
                },
                Instruction::Transfer {
                    to: Address::derive(b"carol"),
                    amount: Amount::from_whole(1),
                },
            ],
        )
        .unwrap();
        engine.execute_transaction(&tx, &mut env(&mut fx)).unwrap();
        assert_eq!(fx.overlay.account(&fx.store, &alice).unwrap().tx_count, 1);
    }

    #[test]
    fn test_create_then_execute_counter() {
        let mut fx = fixture();
        let engine = ExecutionEngine::default();
        let alice = Address::derive(b"alice");
        let contract = Address::derive(b"counter-contract");
        fund(&mut fx, &alice, 10);

        let create = Transaction::new(
            alice.clone(),
            0,
            vec![Instruction::Create {
                address: contract.clone(),
                code: COUNTER.to_string(),
                interface: None,
            }],
        )
        .unwrap();
        let receipt = engine
            .execute_transaction(&create, &mut env(&mut fx))
            .unwrap();
        assert_eq!(receipt.created_contract.as_ref(), Some(&contract));
        assert_eq!(receipt.fees, engine.fee_schedule().create);

        let execute = Transaction::new(
            alice.clone(),
            1,
            vec![Instruction::Execute {
                address: contract.clone(),
                method: "increment".to_string(),
                args: vec![],
            }],
        )
        .unwrap();
        let receipt = engine
            .execute_transaction(&execute, &mut env(&mut fx))
            .unwrap();
        // one call's unit cost
        assert_eq!(receipt.fees, engine.fee_schedule().call_unit);

        let account = fx.overlay.account(&fx.store, &contract).unwrap();
        let storage = account.storage.as_ref().unwrap();
        let counter: Amount = serde_json::from_value(storage["counter"].clone()).unwrap();
        assert_eq!(counter, Amount::from_u64(1));
    }

    #[test]
    fn test_create_on_occupied_address_fails() {
        let mut fx = fixture();
        let engine = ExecutionEngine::default();
        let alice = Address::derive(b"alice");
        let contract = Address::derive(b"occupied");
        fund(&mut fx, &alice, 10);

        let deploy = |nonce: u64| {
            Transaction::new(
                alice.clone(),
                nonce,
                vec![Instruction::Create {
                    address: contract.clone(),
                    code: COUNTER.to_string(),
                    interface: None,
                }],
            )
            .unwrap()
        };
        engine
            .execute_transaction(&deploy(0), &mut env(&mut fx))
            .unwrap();
        let failed = engine
            .execute_transaction(&deploy(1), &mut env(&mut fx))
            .unwrap_err();
        assert!(matches!(failed.error, ChainError::AddressOccupied(_)));
    }

    #[test]
    fn test_attribute_read_and_unknown_method() {
        let mut fx = fixture();
        let engine = ExecutionEngine::default();
        let alice = Address::derive(b"alice");
        let contract = Address::derive(b"attrs");
        fund(&mut fx, &alice, 10);

        let create = Transaction::new(
            alice.clone(),
            0,
            vec![Instruction::Create {
                address: contract.clone(),
                code: COUNTER.to_string(),
                interface: None,
            }],
        )
        .unwrap();
        engine
            .execute_transaction(&create, &mut env(&mut fx))
            .unwrap();

        let mut monitor = CallMonitor::new("0xtest".to_string());
        let mut e = env(&mut fx);
        let value = engine
            .dispatch(
                &mut e,
                &mut monitor,
                alice.clone(),
                &contract,
                "counter",
                vec![],
            )
            .unwrap();
        assert_eq!(value, Value::Uint(Amount::zero()));

        let err = engine
            .dispatch(
                &mut e,
                &mut monitor,
                alice.clone(),
                &contract,
                "missing",
                vec![],
            )
            .unwrap_err();
        assert!(matches!(err, ChainError::UnknownMethod(_)));
    }

    #[test]
    fn test_nested_calls_share_the_budget() {
        let mut fx = fixture();
        let limits = VmLimits {
            max_calls: 5,
            ..VmLimits::default()
        };
        let engine = ExecutionEngine::new(limits, FeeSchedule::default());
        let alice = Address::derive(b"alice");
        let pinger = Address::derive(b"pinger");
        fund(&mut fx, &alice, 100);

        // a contract that calls itself forever
        let code = format!(
            r#"
            state hops = 0;
            fn ping() {{
                hops = hops + 1;
                call("{}", "ping");
            }}
            "#,
            pinger
        );
        let create = Transaction::new(
            alice.clone(),
            0,
            vec![Instruction::Create {
                address: pinger.clone(),
                code,
                interface: None,
            }],
        )
        .unwrap();
        engine
            .execute_transaction(&create, &mut env(&mut fx))
            .unwrap();

        let execute = Transaction::new(
            alice.clone(),
            1,
            vec![Instruction::Execute {
                address: pinger.clone(),
                method: "ping".to_string(),
                args: vec![],
            }],
        )
        .unwrap();
        let failed = engine
            .execute_transaction(&execute, &mut env(&mut fx))
            .unwrap_err();
        assert!(matches!(failed.error, ChainError::ExecutionLimit(_)));
        // fees for the calls consumed before the ceiling are accounted
        assert!(!failed.fees.is_zero());
    }

    #[test]
    fn test_readonly_call_reports_failure_structurally() {
        let fx = fixture();
        let engine = ExecutionEngine::default();
        let outcome = engine.call_readonly(
            &fx.store,
            &Address::derive(b"nobody"),
            "anything",
            vec![],
        );
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_value_conservation_enforced() {
        let mut fx = fixture();
        let engine = ExecutionEngine::default();
        let alice = Address::derive(b"alice");
        fund(&mut fx, &alice, 10);

        let mut tx = Transaction::new(
            alice.clone(),
            0,
            vec![Instruction::Transfer {
                to: Address::derive(b"bob"),
                amount: Amount::from_whole(1),
            }],
        )
        .unwrap();
        tx.value = Amount::from_whole(2);
        tx.hash = tx.compute_hash().unwrap();
        let failed = engine.execute_transaction(&tx, &mut env(&mut fx)).unwrap_err();
        assert!(matches!(failed.error, ChainError::InvalidTransaction(_)));
    }
}
