//! Execution parameters shared by every runner.
//!
//! [`ExecutionConfig::default`] describes a development chain at block 1000 with a Cancun rule set. A JSON file
//! with any subset of the fields can override it, see [`ExecutionConfig::from_path`].

use std::{fs::File, io::BufReader, path::Path};

use revm::primitives::{Address, Env, SpecId, U256};
use serde::{Deserialize, Serialize};

/// Errors produced while loading an [`ExecutionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be opened.
    #[error("could not open config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON for this structure.
    #[error("could not deserialize config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Block context, chain rules and gas limits used to execute benchmarks.
///
/// # Examples
///
/// ```
/// use evm_state_bench::config::ExecutionConfig;
///
/// let config: ExecutionConfig = serde_json::from_str(r#"{"chain_id": 1}"#).unwrap();
///
/// assert_eq!(config.chain_id, 1);
/// assert_eq!(config.block_number, 1000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Number of the block every transaction executes in.
    pub block_number: u64,
    /// Timestamp of that block.
    pub timestamp: u64,
    /// Difficulty of that block.
    pub difficulty: U256,
    /// Gas limit of that block. Not enforced against transactions.
    pub block_gas_limit: u64,
    /// Base fee of that block. Not charged.
    pub base_fee: u64,
    /// Beneficiary of that block.
    pub coinbase: Address,
    /// Chain identifier returned by `CHAINID`.
    pub chain_id: u64,
    /// Hardfork rules for stateful execution.
    pub spec: SpecId,
    /// Balance given to freshly created mock accounts.
    pub sender_balance: U256,
    /// Gas limit of every contract creation and message call.
    pub gas_limit: u64,
    /// Gas limit of every bare interpreter run.
    pub stateless_gas_limit: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            block_number: 1000,
            timestamp: 1000,
            difficulty: U256::from(1),
            block_gas_limit: 8_000_000,
            base_fee: 1_000_000_000,
            coinbase: Address::ZERO,
            chain_id: 1337,
            spec: SpecId::CANCUN,
            sender_balance: U256::from(1_000_000_000_000_000_000_u64),
            gas_limit: 100_000_000,
            stateless_gas_limit: u64::MAX,
        }
    }
}

impl ExecutionConfig {
    /// Reads a configuration from a JSON file. Missing fields keep their default values.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or deserialized.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("loading execution config from {}...", path.display());
        let config = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        log::trace!("execution config: {config:#?}");
        Ok(config)
    }

    /// Builds the environment every benchmark transaction runs in.
    ///
    /// Transactions pay no gas: the gas price is zero and the base fee, block gas limit and beneficiary reward
    /// checks are disabled. The nonce check is skipped so one sender can be reused across passes.
    #[must_use]
    pub fn env(&self) -> Env {
        let mut env = Env::default();

        env.cfg.chain_id = self.chain_id;
        env.cfg.disable_base_fee = true;
        env.cfg.disable_block_gas_limit = true;
        env.cfg.disable_beneficiary_reward = true;

        env.block.number = U256::from(self.block_number);
        env.block.timestamp = U256::from(self.timestamp);
        env.block.difficulty = self.difficulty;
        env.block.gas_limit = U256::from(self.block_gas_limit);
        env.block.basefee = U256::from(self.base_fee);
        env.block.coinbase = self.coinbase;

        env.tx.gas_limit = self.gas_limit;
        env.tx.gas_price = U256::ZERO;
        env.tx.nonce = None;

        env
    }
}
