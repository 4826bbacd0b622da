use revm::{
    primitives::{address, Address, U256},
    Database,
};

use evm_state_bench::{
    benchmarks::suite,
    config::ExecutionConfig,
    evm,
    state::{CommitOutcome, KvStore, MemoryStore, RedbStore, SledStore, StateDb},
};

const SENDER: Address = address!("00000000000000000000000000000000000000aa");

/// Funds a fixed sender, deploys the storage contract and calls it twice, committing after each step.
fn scenario<S: KvStore + 'static>(store: S) -> (Vec<CommitOutcome>, Address, StateDb<S>) {
    let config = ExecutionConfig::default();
    let benchmark = suite()
        .unwrap()
        .into_iter()
        .find(|b| b.function == "storageSetGetLoop")
        .unwrap();

    let mut db = StateDb::new(store);
    db.set_balance(SENDER, config.sender_balance).unwrap();
    let mut evm = evm::build_evm(db, &config);
    let contract = evm::create(&mut evm, SENDER, benchmark.bytecode(), config.gas_limit).unwrap();

    let mut outcomes = vec![evm.db_mut().commit(0, true).unwrap()];
    for block in 1..=2 {
        evm::call(
            &mut evm,
            SENDER,
            contract,
            benchmark.calldata.clone(),
            config.gas_limit,
        )
        .unwrap();
        outcomes.push(evm.db_mut().commit(block, true).unwrap());
    }

    let db = evm.into_context().evm.inner.db;
    (outcomes, contract, db)
}

#[test]
fn every_store_commits_the_same_batches() {
    let redb_dir = tempfile::tempdir().unwrap();
    let sled_dir = tempfile::tempdir().unwrap();

    let (memory, memory_contract, _) = scenario(MemoryStore::default());
    let (redb, redb_contract, _) = scenario(RedbStore::open(redb_dir.path()).unwrap());
    let (sled, sled_contract, _) = scenario(SledStore::open(sled_dir.path()).unwrap());

    assert_eq!(memory, redb);
    assert_eq!(memory, sled);
    assert_eq!(memory_contract, redb_contract);
    assert_eq!(memory_contract, sled_contract);
    assert_ne!(memory[0].digest, memory[1].digest);
    assert_ne!(memory[0].state_root, memory[1].state_root);
    assert_ne!(memory[1].state_root, memory[2].state_root);
}

#[test]
fn redb_state_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();

    let (outcomes, contract, mut db) = scenario(RedbStore::open(dir.path()).unwrap());
    let root = outcomes[2].state_root;
    let code_hash = db.basic(contract).unwrap().unwrap().code_hash;
    drop(db);

    let mut db = StateDb::new(RedbStore::open(dir.path()).unwrap());
    assert_eq!(db.head().unwrap(), Some(2));
    assert_eq!(
        db.storage(contract, U256::ZERO).unwrap(),
        U256::from(10_000)
    );
    assert!(!db.code_by_hash(code_hash).unwrap().is_empty());
    assert_eq!(db.basic(SENDER).unwrap().unwrap().nonce, 3);
    assert_eq!(db.state_root().unwrap(), Some(root));
    assert_eq!(db.commit(3, true).unwrap().state_root, root);
}

#[test]
fn sled_state_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();

    let (outcomes, contract, mut db) = scenario(SledStore::open(dir.path()).unwrap());
    let root = outcomes[2].state_root;
    db.flush().unwrap();
    drop(db);

    let mut db = StateDb::new(SledStore::open(dir.path()).unwrap());
    assert_eq!(db.head().unwrap(), Some(2));
    assert_eq!(
        db.storage(contract, U256::ZERO).unwrap(),
        U256::from(10_000)
    );
    assert_eq!(db.basic(SENDER).unwrap().unwrap().nonce, 3);
    assert_eq!(db.state_root().unwrap(), Some(root));
}

#[test]
fn mock_addresses_are_funded_and_distinct() {
    let mut db = StateDb::new(MemoryStore::default());

    let a = evm::new_mock_address(&mut db, U256::from(7), &[]).unwrap();
    let b = evm::new_mock_address(&mut db, U256::from(7), &[0x60, 0x00]).unwrap();
    db.commit(1, true).unwrap();

    assert_ne!(a, b);
    assert_eq!(db.basic(a).unwrap().unwrap().balance, U256::from(7));
    let code_hash = db.basic(b).unwrap().unwrap().code_hash;
    assert_eq!(
        db.code_by_hash(code_hash).unwrap().original_bytes().to_vec(),
        vec![0x60, 0x00]
    );
}
