//! Utilities for creating and working with runners.
//!
//! A runner is one way of executing a benchmark: on the bare interpreter with no state, or as message calls against
//! a state database over one of the [`crate::state`] stores. [`Runner::prepare`] sets a benchmark up once and hands
//! back a [`Fixture`] whose [`Fixture::iterate`] runs a single pass.
//!
//! # Examples
//!
//! ```
//! use evm_state_bench::{
//!     benchmarks::suite,
//!     runners::{Runner, RunnerKind, RunnerOptions},
//! };
//!
//! let benchmark = suite().unwrap().remove(0);
//! let runner = Runner::new(RunnerKind::Memory);
//!
//! let mut fixture = runner.prepare(&benchmark, &RunnerOptions::default()).expect("could not prepare fixture");
//! fixture.iterate(0).expect("could not run pass");
//! ```

use std::{
    fmt::{self, Display, Formatter},
    path::PathBuf,
};

use anyhow::Context;
use clap::ValueEnum;
use revm::{
    primitives::{Address, Bytes},
    Evm,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::{
    benchmarks::Benchmark,
    config::ExecutionConfig,
    evm::{self, CallOutcome, InterpreterFixture},
    state::{KvStore, MemoryStore, RedbStore, SledStore, StateDb},
};

/// Unique identifier for a runner.
///
/// # Examples
///
/// ```
/// use evm_state_bench::runners::Identifier;
///
/// let identifier = Identifier::from("foo");
///
/// assert_eq!(identifier.to_string(), "foo");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(String);

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier(s)
    }
}

/// Execution mode of a runner.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Bare interpreter over the runtime code, no state database.
    Stateless,
    /// Message calls against an in-memory store.
    Memory,
    /// Message calls against a redb store on disk.
    Redb,
    /// Message calls against a sled store on disk.
    Sled,
}

impl RunnerKind {
    /// Every kind, in the order they are usually run.
    pub const ALL: [Self; 4] = [Self::Stateless, Self::Memory, Self::Redb, Self::Sled];

    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stateless => "stateless",
            Self::Memory => "memory",
            Self::Redb => "redb",
            Self::Sled => "sled",
        }
    }

    /// Whether this kind keeps its state on disk.
    #[must_use]
    pub const fn is_disk(self) -> bool {
        matches!(self, Self::Redb | Self::Sled)
    }
}

impl Display for RunnerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Settings shared by every runner.
#[derive(Clone, Debug, Default)]
pub struct RunnerOptions {
    /// Execution environment.
    pub config: ExecutionConfig,
    /// Parent directory for the temporary directories of disk stores. Defaults to the system temp directory.
    pub data_dir: Option<PathBuf>,
}

/// Total representation of a runner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Runner {
    /// Unique identifier for this runner.
    pub identifier: Identifier,
    /// Execution mode of this runner.
    pub kind: RunnerKind,
}

impl Runner {
    /// Creates the runner of the given kind, identified by the kind's name.
    #[must_use]
    pub fn new(kind: RunnerKind) -> Self {
        Self {
            identifier: Identifier::from(kind.name()),
            kind,
        }
    }

    /// Creates one runner per kind, skipping duplicates.
    #[must_use]
    pub fn from_kinds(kinds: &[RunnerKind]) -> Vec<Self> {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        kinds.into_iter().map(Self::new).collect()
    }

    /// Sets `benchmark` up for repeated passes.
    ///
    /// Stateless runners only load the runtime code. Stateful runners open their store, fund a sender, deploy the
    /// contract and commit that setup as block zero, so passes only measure the benchmarked call and its commit.
    ///
    /// # Errors
    ///
    /// Fails if a store cannot be opened or the contract cannot be deployed.
    pub fn prepare(&self, benchmark: &Benchmark, options: &RunnerOptions) -> anyhow::Result<Fixture> {
        log::debug!(
            "[{}] preparing benchmark ({})...",
            self.identifier,
            benchmark.identifier
        );
        let config = &options.config;

        let fixture = match self.kind {
            RunnerKind::Stateless => Fixture::Stateless(InterpreterFixture::new(
                benchmark.deployed_bytecode(),
                benchmark.calldata.clone(),
                config,
            )),
            RunnerKind::Memory => Fixture::Memory(StatefulFixture::new(
                MemoryStore::default(),
                None,
                benchmark,
                config,
            )?),
            RunnerKind::Redb => {
                let dir = scratch_dir(options)?;
                let store = RedbStore::open(dir.path()).context("could not open redb store")?;
                Fixture::Redb(StatefulFixture::new(store, Some(dir), benchmark, config)?)
            }
            RunnerKind::Sled => {
                let dir = scratch_dir(options)?;
                let store = SledStore::open(dir.path()).context("could not open sled store")?;
                Fixture::Sled(StatefulFixture::new(store, Some(dir), benchmark, config)?)
            }
        };

        log::debug!("[{}] prepared benchmark ({})", self.identifier, benchmark.identifier);
        Ok(fixture)
    }
}

fn scratch_dir(options: &RunnerOptions) -> anyhow::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("evm-state-bench-");
    let dir = match &options.data_dir {
        Some(parent) => {
            std::fs::create_dir_all(parent).context("could not create data directory")?;
            builder.tempdir_in(parent)
        }
        None => builder.tempdir(),
    }
    .context("could not create temporary store directory")?;
    log::trace!("created store directory {}", dir.path().display());
    Ok(dir)
}

/// A benchmark set up on a runner, ready for passes.
pub enum Fixture {
    /// Bare interpreter.
    Stateless(InterpreterFixture),
    /// In-memory state.
    Memory(StatefulFixture<MemoryStore>),
    /// redb state.
    Redb(StatefulFixture<RedbStore>),
    /// sled state.
    Sled(StatefulFixture<SledStore>),
}

impl Fixture {
    /// Runs pass number `index`.
    ///
    /// # Errors
    ///
    /// Fails if execution or the commit that follows it fails.
    pub fn iterate(&mut self, index: u64) -> anyhow::Result<CallOutcome> {
        match self {
            Self::Stateless(fixture) => Ok(fixture.run()?),
            Self::Memory(fixture) => fixture.iterate(index),
            Self::Redb(fixture) => fixture.iterate(index),
            Self::Sled(fixture) => fixture.iterate(index),
        }
    }

    /// Flushes the store, if any, once all passes are done.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be flushed.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        match self {
            Self::Stateless(_) => Ok(()),
            Self::Memory(fixture) => fixture.finish(),
            Self::Redb(fixture) => fixture.finish(),
            Self::Sled(fixture) => fixture.finish(),
        }
    }
}

/// A deployed contract and a funded sender on a [`StateDb`].
///
/// Holds the temporary directory of disk stores, which is removed once the fixture is dropped.
pub struct StatefulFixture<S: KvStore + 'static> {
    evm: Evm<'static, (), StateDb<S>>,
    sender: Address,
    contract: Address,
    calldata: Bytes,
    gas_limit: u64,
    // Dropped after the store it contains.
    _dir: Option<TempDir>,
}

impl<S: KvStore + 'static> StatefulFixture<S> {
    /// Deploys `benchmark` on `store` and commits the setup as block zero.
    ///
    /// # Errors
    ///
    /// Fails if the sender cannot be funded, the contract cannot be deployed or the setup cannot be committed.
    pub fn new(
        store: S,
        dir: Option<TempDir>,
        benchmark: &Benchmark,
        config: &ExecutionConfig,
    ) -> anyhow::Result<Self> {
        let mut db = StateDb::new(store);
        let sender = evm::new_mock_address(&mut db, config.sender_balance, &[])
            .context("could not fund sender")?;

        let mut evm = evm::build_evm(db, config);
        let contract = evm::create(&mut evm, sender, benchmark.bytecode(), config.gas_limit)
            .with_context(|| format!("could not deploy {}", benchmark.identifier))?;
        let outcome = evm
            .db_mut()
            .commit(0, true)
            .context("could not commit deployment")?;
        log::trace!("deployed {contract} from {sender}: {outcome:?}");

        Ok(Self {
            evm,
            sender,
            contract,
            calldata: benchmark.calldata.clone(),
            gas_limit: config.gas_limit,
            _dir: dir,
        })
    }

    /// Address of the deployed contract.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// State database the contract lives in.
    pub fn db(&self) -> &StateDb<S> {
        self.evm.db()
    }

    /// Calls the contract once and commits the result as block `index + 1`.
    ///
    /// # Errors
    ///
    /// Fails if the call fails or the commit fails.
    pub fn iterate(&mut self, index: u64) -> anyhow::Result<CallOutcome> {
        let outcome = evm::call(
            &mut self.evm,
            self.sender,
            self.contract,
            self.calldata.clone(),
            self.gas_limit,
        )
        .with_context(|| format!("pass {index} failed"))?;
        self.evm
            .db_mut()
            .commit(index + 1, true)
            .with_context(|| format!("could not commit pass {index}"))?;
        Ok(outcome)
    }

    /// Flushes the underlying store.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be flushed.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        self.evm
            .db_mut()
            .flush()
            .context("could not flush state store")
    }
}
