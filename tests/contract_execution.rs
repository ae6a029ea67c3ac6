//! Integration tests for contract deployment and sandboxed execution.

use slatechain::crypto::{Address, Amount};
use slatechain::ledger::{Ledger, LedgerConfig};
use slatechain::mempool::{Mempool, SelectionPolicy};
use slatechain::store::StateStore;
use slatechain::transaction::Instruction;
use slatechain::vm::engine::{ExecutionEngine, FeeSchedule};
use slatechain::vm::Value;
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

fn ledger_at(dir: &TempDir) -> Result<Ledger, Box<dyn std::error::Error>> {
    let store = StateStore::open(dir.path(), true, 32, 32)?;
    let mempool = Mempool::new(1000, SelectionPolicy::Arrival, FeeSchedule::default());
    Ok(Ledger::new(
        store,
        mempool,
        ExecutionEngine::default(),
        LedgerConfig::default(),
    ))
}

fn bootstrap(dir: &TempDir) -> Result<(Ledger, Address), Box<dyn std::error::Error>> {
    let mut ledger = ledger_at(dir)?;
    let miner = Address::derive(b"miner");
    ledger.init_genesis(&miner, 1_700_000_000_000)?;
    Ok((ledger, miner))
}

fn stored_counter(ledger: &Ledger, contract: &Address) -> Result<Amount, Box<dyn std::error::Error>> {
    let account = ledger.account(contract)?;
    let storage = account.storage.expect("contract storage present");
    Ok(serde_json::from_value(storage["counter"].clone())?)
}

#[test]
fn test_deploy_and_increment_counter() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let (mut ledger, miner) = bootstrap(&dir)?;
    let contract = Address::derive(b"counter-contract");

    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Create {
            address: contract.clone(),
            code: COUNTER.to_string(),
            interface: None,
        }],
        None,
    )?;
    ledger.produce_block(&miner, 1_700_000_060_000, 0)?;

    // constructor ran: counter starts at 0, interface was derived
    let deployed = ledger.account(&contract)?;
    assert!(deployed.is_contract());
    let interface = deployed.interface.as_ref().expect("interface derived");
    assert!(interface.method("increment").is_some());
    assert!(!interface.method("current").unwrap().mutating);
    assert_eq!(stored_counter(&ledger, &contract)?, Amount::zero());

    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Execute {
            address: contract.clone(),
            method: "increment".to_string(),
            args: vec![],
        }],
        None,
    )?;
    let block = ledger
        .produce_block(&miner, 1_700_000_120_000, 0)?
        .expect("block produced");

    // persisted storage is {counter: 1} and the fee is one call's unit cost
    assert_eq!(stored_counter(&ledger, &contract)?, Amount::from_u64(1));
    let schedule = FeeSchedule::default();
    assert_eq!(block.receipts[0].fees, schedule.call_unit);
    Ok(())
}

#[test]
fn test_view_calls_through_the_readonly_surface() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let (mut ledger, miner) = bootstrap(&dir)?;
    let contract = Address::derive(b"counter-contract");

    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Create {
            address: contract.clone(),
            code: COUNTER.to_string(),
            interface: None,
        }],
        None,
    )?;
    ledger.produce_block(&miner, 1_700_000_060_000, 0)?;

    // a view method and an attribute are both valid call targets
    let outcome = ledger.call_contract(&contract, "current", vec![]);
    assert!(outcome.success);
    assert_eq!(outcome.value, Some(Value::Uint(Amount::zero())));

    let outcome = ledger.call_contract(&contract, "counter", vec![]);
    assert!(outcome.success);
    assert_eq!(outcome.value, Some(Value::Uint(Amount::zero())));

    // wrong argument count is a structured failure, not a crash
    let outcome = ledger.call_contract(&contract, "current", vec!["extra".to_string()]);
    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    Ok(())
}

#[test]
fn test_create_once_protects_other_effects() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let (mut ledger, miner) = bootstrap(&dir)?;
    let contract = Address::derive(b"counter-contract");
    let bob = Address::derive(b"bob");

    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Create {
            address: contract.clone(),
            code: COUNTER.to_string(),
            interface: None,
        }],
        None,
    )?;
    ledger.produce_block(&miner, 1_700_000_060_000, 0)?;
    let balance_before = ledger.account(&bob)?.balance;

    // transfer + re-deploy in one transaction: the second create targets an
    // occupied address, so the whole transaction fails and the transfer
    // must not apply either
    ledger.submit_transaction(
        miner.clone(),
        vec![
            Instruction::Transfer {
                to: bob.clone(),
                amount: Amount::from_whole(1),
            },
            Instruction::Create {
                address: contract.clone(),
                code: COUNTER.to_string(),
                interface: None,
            },
        ],
        None,
    )?;
    let produced = ledger.produce_block(&miner, 1_700_000_120_000, 0)?;
    assert!(produced.is_none(), "failed transaction should leave nothing to produce");
    assert_eq!(ledger.account(&bob)?.balance, balance_before);
    // the original deployment is untouched
    assert!(ledger.account(&contract)?.is_contract());
    Ok(())
}

#[test]
fn test_call_budget_bounds_fan_out() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let (mut ledger, miner) = bootstrap(&dir)?;
    let contract = Address::derive(b"spammer");

    let code = r#"
        state rounds = 0;
        fn noop() {
        }
        fn spam() {
            let i = 0;
            while i < 1200 {
                call(self_address(), "noop");
                i = i + 1;
            }
            rounds = rounds + 1;
        }
    "#;
    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Create {
            address: contract.clone(),
            code: code.to_string(),
            interface: None,
        }],
        None,
    )?;
    ledger.produce_block(&miner, 1_700_000_060_000, 0)?;

    // >= 1000 cumulative (nested) calls: the transaction fails and commits
    // zero storage changes
    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Execute {
            address: contract.clone(),
            method: "spam".to_string(),
            args: vec![],
        }],
        None,
    )?;
    let produced = ledger.produce_block(&miner, 1_700_000_120_000, 0)?;
    assert!(produced.is_none());

    let account = ledger.account(&contract)?;
    let storage = account.storage.expect("contract storage present");
    let rounds: Amount = serde_json::from_value(storage["rounds"].clone())?;
    assert_eq!(rounds, Amount::zero());
    Ok(())
}

#[test]
fn test_cross_contract_call_moves_state_and_value() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let (mut ledger, miner) = bootstrap(&dir)?;
    let vault = Address::derive(b"vault");
    let ledger_book = Address::derive(b"ledger-book");

    // the book records deposits; the vault forwards value and notifies it
    let book_code = r#"
        state deposits = 0;
        fn record(amount) {
            deposits = deposits + int(amount);
        }
    "#;
    let vault_code = format!(
        r#"
        state vaulted = 0;
        fn deposit(amount) {{
            vaulted = vaulted + int(amount);
            call("{}", "record", amount);
        }}
        "#,
        ledger_book
    );

    ledger.submit_transaction(
        miner.clone(),
        vec![
            Instruction::Create {
                address: ledger_book.clone(),
                code: book_code.to_string(),
                interface: None,
            },
            Instruction::Create {
                address: vault.clone(),
                code: vault_code,
                interface: None,
            },
        ],
        None,
    )?;
    ledger.produce_block(&miner, 1_700_000_060_000, 0)?;

    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Execute {
            address: vault.clone(),
            method: "deposit".to_string(),
            args: vec!["42".to_string()],
        }],
        None,
    )?;
    let block = ledger
        .produce_block(&miner, 1_700_000_120_000, 0)?
        .expect("block produced");

    let vault_storage = ledger.account(&vault)?.storage.expect("storage");
    let vaulted: Amount = serde_json::from_value(vault_storage["vaulted"].clone())?;
    assert_eq!(vaulted, Amount::from_u64(42));

    let book_storage = ledger.account(&ledger_book)?.storage.expect("storage");
    let deposits: Amount = serde_json::from_value(book_storage["deposits"].clone())?;
    assert_eq!(deposits, Amount::from_u64(42));

    // two calls shared one monitor: the fee covers both
    let schedule = FeeSchedule::default();
    assert_eq!(
        block.receipts[0].fees,
        schedule.call_unit.checked_mul_u64(2).unwrap()
    );
    Ok(())
}

#[test]
fn test_author_supplied_interface_is_validated() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let (mut ledger, miner) = bootstrap(&dir)?;
    let contract = Address::derive(b"typed");

    // legacy descriptor shape: bare string params plus annotations
    let descriptor = serde_json::from_str(
        r#"{
            "methods": [
                {"name": "increment", "params": [], "annotation": "@mutate"},
                {"name": "current", "params": [], "annotation": "@view"}
            ],
            "attributes": [{"name": "counter", "ty": "uint"}]
        }"#,
    )?;
    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Create {
            address: contract.clone(),
            code: COUNTER.to_string(),
            interface: Some(descriptor),
        }],
        None,
    )?;
    ledger.produce_block(&miner, 1_700_000_060_000, 0)?;
    assert!(ledger.account(&contract)?.is_contract());

    // a descriptor that disagrees with the source is rejected at deploy
    let bogus = serde_json::from_str(
        r#"{
            "methods": [{"name": "missing", "params": [], "annotation": "@mutate"}],
            "attributes": []
        }"#,
    )?;
    let other = Address::derive(b"typed-2");
    ledger.submit_transaction(
        miner.clone(),
        vec![Instruction::Create {
            address: other.clone(),
            code: COUNTER.to_string(),
            interface: Some(bogus),
        }],
        None,
    )?;
    assert!(ledger.produce_block(&miner, 1_700_000_120_000, 0)?.is_none());
    assert!(!ledger.account(&other)?.is_contract());
    Ok(())
}
