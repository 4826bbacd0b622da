//! Wiring between the benchmarks and the revm interpreter.
//!
//! Two execution paths are exposed:
//!
//! - the full [`Evm`] over a [`StateDb`], built with [`build_evm`] and driven with [`create`] and [`call`];
//! - the bare [`Interpreter`] over a [`DummyHost`], with no state at all, driven through [`InterpreterFixture`] or
//!   [`run_interpreter`].
//!
//! # Examples
//!
//! ```
//! use evm_state_bench::{config::ExecutionConfig, evm::run_interpreter};
//! use revm::primitives::Bytes;
//!
//! // PUSH1 2, PUSH1 1, ADD, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
//! let code = Bytes::from_static(&[
//!     0x60, 0x02, 0x60, 0x01, 0x01, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
//! ]);
//! let outcome = run_interpreter(code, Bytes::new(), &ExecutionConfig::default()).unwrap();
//!
//! assert_eq!(outcome.output[31], 3);
//! ```

use revm::{
    interpreter::{
        opcode::{make_instruction_table, InstructionTable},
        Contract, DummyHost, InstructionResult, Interpreter, SharedMemory,
    },
    primitives::{
        address, Address, Bytecode, Bytes, CancunSpec, EVMError, ExecutionResult, HaltReason, Output,
        TxKind, U256,
    },
    Evm,
};

use crate::{
    config::ExecutionConfig,
    state::{KvStore, StateDb, StateError},
};

/// Caller used by the bare interpreter.
pub const INTERPRETER_CALLER: Address = address!("1000000000000000000000000000000000000001");
/// Address the bare interpreter pretends to execute at.
pub const INTERPRETER_ADDRESS: Address = address!("2000000000000000000000000000000000000002");

/// Errors produced while executing bytecode.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The EVM rejected the transaction or the database failed underneath it.
    #[error("evm: {0}")]
    Evm(#[from] EVMError<StateError>),
    /// The state database failed outside of a transaction.
    #[error("state: {0}")]
    State(#[from] StateError),
    /// Execution ended with `REVERT`.
    #[error("reverted after {gas_used} gas with output {output}")]
    Revert {
        /// Gas consumed before reverting.
        gas_used: u64,
        /// Revert data.
        output: Bytes,
    },
    /// Execution halted exceptionally.
    #[error("halted after {gas_used} gas: {reason:?}")]
    Halt {
        /// Why execution halted.
        reason: HaltReason,
        /// Gas consumed before halting.
        gas_used: u64,
    },
    /// A contract creation succeeded without producing an address.
    #[error("contract creation returned no address")]
    NoAddress,
    /// The bare interpreter stopped without returning, or returned an error.
    #[error("interpreter stopped with {0:?}")]
    Interpreter(InstructionResult),
}

/// Data returned by a successful execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOutcome {
    /// Return data.
    pub output: Bytes,
    /// Gas consumed.
    pub gas_used: u64,
}

/// Builds an EVM over `db` in the environment described by `config`.
pub fn build_evm<'a, S: KvStore>(
    db: StateDb<S>,
    config: &ExecutionConfig,
) -> Evm<'a, (), StateDb<S>> {
    Evm::builder()
        .with_db(db)
        .with_env(Box::new(config.env()))
        .with_spec_id(config.spec)
        .build()
}

/// Creates an account at a random address with `balance` and, if non-empty, `code`.
///
/// # Errors
///
/// Fails if the state database cannot be read.
pub fn new_mock_address<S: KvStore>(
    db: &mut StateDb<S>,
    balance: U256,
    code: &[u8],
) -> Result<Address, StateError> {
    let address = Address::from(rand::random::<[u8; 20]>());
    db.set_balance(address, balance)?;
    if !code.is_empty() {
        db.set_code(address, Bytes::copy_from_slice(code))?;
    }
    log::trace!("created mock address {address}");
    Ok(address)
}

/// Deploys `initcode` from `sender` and returns the address of the new contract.
///
/// The resulting state is committed to the database's pending changes, not to its store.
///
/// # Errors
///
/// Fails if the transaction is invalid, reverts or halts.
pub fn create<S: KvStore>(
    evm: &mut Evm<'_, (), StateDb<S>>,
    sender: Address,
    initcode: Bytes,
    gas_limit: u64,
) -> Result<Address, ExecutionError> {
    prepare_tx(evm, sender, TxKind::Create, initcode, gas_limit);
    match evm.transact_commit()? {
        ExecutionResult::Success {
            output: Output::Create(_, Some(address)),
            ..
        } => Ok(address),
        ExecutionResult::Success { .. } => Err(ExecutionError::NoAddress),
        result => Err(failure(result)),
    }
}

/// Sends a message call with `input` from `sender` to `target`.
///
/// The resulting state is committed to the database's pending changes, not to its store.
///
/// # Errors
///
/// Fails if the transaction is invalid, reverts or halts.
pub fn call<S: KvStore>(
    evm: &mut Evm<'_, (), StateDb<S>>,
    sender: Address,
    target: Address,
    input: Bytes,
    gas_limit: u64,
) -> Result<CallOutcome, ExecutionError> {
    prepare_tx(evm, sender, TxKind::Call(target), input, gas_limit);
    match evm.transact_commit()? {
        ExecutionResult::Success {
            output, gas_used, ..
        } => Ok(CallOutcome {
            output: output.into_data(),
            gas_used,
        }),
        result => Err(failure(result)),
    }
}

fn prepare_tx<S: KvStore>(
    evm: &mut Evm<'_, (), StateDb<S>>,
    sender: Address,
    kind: TxKind,
    data: Bytes,
    gas_limit: u64,
) {
    let tx = evm.tx_mut();
    tx.caller = sender;
    tx.transact_to = kind;
    tx.data = data;
    tx.value = U256::ZERO;
    tx.gas_limit = gas_limit;
}

fn failure(result: ExecutionResult) -> ExecutionError {
    match result {
        ExecutionResult::Revert { gas_used, output } => ExecutionError::Revert { gas_used, output },
        ExecutionResult::Halt { reason, gas_used } => ExecutionError::Halt { reason, gas_used },
        ExecutionResult::Success { .. } => ExecutionError::NoAddress,
    }
}

/// Reusable bare interpreter over fixed code and input.
///
/// Every [`InterpreterFixture::run`] starts from a fresh interpreter and a cleared host, so passes do not observe
/// each other's storage.
pub struct InterpreterFixture {
    contract: Contract,
    host: DummyHost,
    table: InstructionTable<DummyHost>,
    gas_limit: u64,
}

impl InterpreterFixture {
    /// Prepares `code` to be run with `input` in the environment described by `config`.
    #[must_use]
    pub fn new(code: Bytes, input: Bytes, config: &ExecutionConfig) -> Self {
        let bytecode = Bytecode::new_raw(code);
        let hash = bytecode.hash_slow();
        let contract = Contract::new(
            input,
            bytecode,
            Some(hash),
            INTERPRETER_ADDRESS,
            INTERPRETER_CALLER,
            U256::ZERO,
        );

        let mut env = config.env();
        env.tx.caller = INTERPRETER_CALLER;
        env.tx.transact_to = TxKind::Call(INTERPRETER_ADDRESS);

        Self {
            contract,
            host: DummyHost::new(env),
            table: make_instruction_table::<DummyHost, CancunSpec>(),
            gas_limit: config.stateless_gas_limit,
        }
    }

    /// Runs the code once.
    ///
    /// # Errors
    ///
    /// Fails if the code reverts, halts or tries to call out to another contract.
    pub fn run(&mut self) -> Result<CallOutcome, ExecutionError> {
        let mut interpreter = Interpreter::new(self.contract.clone(), self.gas_limit, false);
        let action = interpreter.run(SharedMemory::new(), &self.table, &mut self.host);
        self.host.clear();

        let result = action
            .into_result_return()
            .ok_or(ExecutionError::Interpreter(interpreter.instruction_result))?;
        let gas_used = result.gas.spent();

        if result.result.is_ok() {
            Ok(CallOutcome {
                output: result.output,
                gas_used,
            })
        } else if result.result.is_revert() {
            Err(ExecutionError::Revert {
                gas_used,
                output: result.output,
            })
        } else {
            Err(ExecutionError::Interpreter(result.result))
        }
    }
}

/// Runs `code` once with `input` on a fresh bare interpreter.
///
/// # Errors
///
/// See [`InterpreterFixture::run`].
pub fn run_interpreter(
    code: Bytes,
    input: Bytes,
    config: &ExecutionConfig,
) -> Result<CallOutcome, ExecutionError> {
    InterpreterFixture::new(code, input, config).run()
}

#[cfg(test)]
mod tests {
    use ethers_core::abi::Token;

    use super::*;
    use crate::{artifact::Artifact, contracts, state::MemoryStore};

    fn word(outcome: &CallOutcome) -> U256 {
        U256::from_be_slice(&outcome.output)
    }

    fn input(artifact: &Artifact, name: &str, args: &[u64]) -> Bytes {
        let tokens: Vec<Token> = args.iter().map(|arg| Token::Uint((*arg).into())).collect();
        Bytes::from(artifact.encode_call(name, &tokens).unwrap().0)
    }

    #[test]
    fn interpreter_runs_deployed_code() {
        let artifact = contracts::load(contracts::ARITHMETIC).unwrap();
        let mut fixture = InterpreterFixture::new(
            Bytes::from(artifact.deployed_bytecode.0.clone()),
            input(&artifact, "mul", &[4, 2, 10]),
            &ExecutionConfig::default(),
        );

        let first = fixture.run().unwrap();
        let second = fixture.run().unwrap();
        assert_eq!(word(&first), U256::from(8));
        assert_eq!(first, second);
        assert!(first.gas_used > 0);
    }

    #[test]
    fn interpreter_reports_revert() {
        let artifact = contracts::load(contracts::ARITHMETIC).unwrap();
        let err = run_interpreter(
            Bytes::from(artifact.deployed_bytecode.0.clone()),
            Bytes::from_static(&[0xde, 0xad]),
            &ExecutionConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Revert { .. }));
    }

    #[test]
    fn interpreter_sees_configured_environment() {
        let artifact = contracts::load(contracts::ENVIRONMENT).unwrap();
        let outcome = run_interpreter(
            Bytes::from(artifact.deployed_bytecode.0.clone()),
            input(&artifact, "environmentLoop", &[3]),
            &ExecutionConfig::default(),
        )
        .unwrap();
        assert_eq!(word(&outcome), U256::from(1000 + 1000 + 1337));
    }

    #[test]
    fn deploy_and_call_through_state() {
        let config = ExecutionConfig::default();
        let artifact = contracts::load(contracts::STORAGE).unwrap();

        let mut db = StateDb::new(MemoryStore::default());
        let sender = new_mock_address(&mut db, config.sender_balance, &[]).unwrap();
        let mut evm = build_evm(db, &config);

        let contract = create(
            &mut evm,
            sender,
            Bytes::from(artifact.bytecode.0.clone()),
            config.gas_limit,
        )
        .unwrap();

        let outcome = call(
            &mut evm,
            sender,
            contract,
            input(&artifact, "storageSetGetLoop", &[5]),
            config.gas_limit,
        )
        .unwrap();
        assert_eq!(word(&outcome), U256::from(5));

        let db = evm.db_mut();
        db.commit(1, true).unwrap();
        assert_eq!(
            revm::Database::storage(db, contract, U256::ZERO).unwrap(),
            U256::from(5)
        );

        let outcome = call(
            &mut evm,
            sender,
            contract,
            input(&artifact, "get", &[]),
            config.gas_limit,
        )
        .unwrap();
        assert_eq!(word(&outcome), U256::from(5));
    }

    #[test]
    fn mock_address_with_code_is_callable() {
        let config = ExecutionConfig::default();
        let artifact = contracts::load(contracts::JUMP_TABLE).unwrap();

        let mut db = StateDb::new(MemoryStore::default());
        let sender = new_mock_address(&mut db, config.sender_balance, &[]).unwrap();
        let contract =
            new_mock_address(&mut db, config.sender_balance, &artifact.deployed_bytecode).unwrap();
        let mut evm = build_evm(db, &config);

        let outcome = call(
            &mut evm,
            sender,
            contract,
            input(&artifact, "jumpLoop", &[8]),
            config.gas_limit,
        )
        .unwrap();
        assert_eq!(word(&outcome), U256::from(20));
    }

    #[test]
    fn call_revert_is_an_error() {
        let config = ExecutionConfig::default();
        let artifact = contracts::load(contracts::HASH).unwrap();

        let mut db = StateDb::new(MemoryStore::default());
        let sender = new_mock_address(&mut db, config.sender_balance, &[]).unwrap();
        let contract =
            new_mock_address(&mut db, U256::ZERO, &artifact.deployed_bytecode).unwrap();
        let mut evm = build_evm(db, &config);

        let err = call(&mut evm, sender, contract, Bytes::new(), config.gas_limit).unwrap_err();
        assert!(matches!(err, ExecutionError::Revert { .. }));
    }
}
