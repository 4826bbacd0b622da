//! Fixture contracts shipped with the crate.
//!
//! The contracts are hand-assembled bytecode packaged as compiler-style artifacts: an ABI, constructor code that
//! returns the runtime code appended to it, and the runtime code. Arithmetic wraps, nothing reverts on overflow.
//!
//! Each constant holds the raw JSON artifact of one contract, embedded at compile time. Decode them with
//! [`Artifact::from_slice`] or through [`load`].
//!
//! # Examples
//!
//! ```
//! use evm_state_bench::contracts;
//!
//! let artifact = contracts::load(contracts::STORAGE).expect("could not decode storage artifact");
//!
//! assert!(artifact.function("storageSetGetLoop").is_ok());
//! ```

use crate::artifact::{Artifact, ArtifactError};

/// `add`, `sub`, `mul` and `div` over two words, repeated `n` times.
pub const ARITHMETIC: &[u8] = include_bytes!("../contracts/Arithmetic.json");
/// Memory store and load through the free memory pointer.
pub const MEMORY: &[u8] = include_bytes!("../contracts/Memory.json");
/// Repeated writes and reads of storage slot zero.
pub const STORAGE: &[u8] = include_bytes!("../contracts/Storage.json");
/// Keccak-256 of a single word, through the free memory pointer and through scratch space, and a chained hash loop.
pub const HASH: &[u8] = include_bytes!("../contracts/Hash.json");
/// Four-way jump dispatch per loop iteration.
pub const JUMP_TABLE: &[u8] = include_bytes!("../contracts/JumpTable.json");
/// Reads of the block and transaction context.
pub const ENVIRONMENT: &[u8] =
    include_bytes!("../contracts/Environment.json");

/// All embedded artifacts, keyed by contract name.
pub const ALL: [(&str, &[u8]); 6] = [
    ("Arithmetic", ARITHMETIC),
    ("Memory", MEMORY),
    ("Storage", STORAGE),
    ("Hash", HASH),
    ("JumpTable", JUMP_TABLE),
    ("Environment", ENVIRONMENT),
];

/// Decodes one of the embedded artifacts.
///
/// # Errors
///
/// Only fails if the embedded document is corrupt.
pub fn load(raw: &[u8]) -> Result<Artifact, ArtifactError> {
    Artifact::from_slice(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_artifacts_decode() {
        for (name, raw) in ALL {
            let artifact = load(raw).unwrap_or_else(|err| panic!("{name}: {err}"));
            assert!(!artifact.bytecode.is_empty(), "{name} has no constructor");
            assert!(
                !artifact.deployed_bytecode.is_empty(),
                "{name} has no runtime code"
            );
            assert!(
                artifact.bytecode.ends_with(&artifact.deployed_bytecode),
                "{name} constructor does not carry its runtime code"
            );
        }
    }

    #[test]
    fn arithmetic_wraps_instead_of_reverting() {
        use ethers_core::abi::Token;
        use revm::primitives::{Bytes, U256};

        use crate::{config::ExecutionConfig, evm::run_interpreter};

        let artifact = load(ARITHMETIC).unwrap();
        let run = |name: &str, a: u64, b: u64| {
            let args: Vec<Token> = [a, b, 3].iter().map(|v| Token::Uint((*v).into())).collect();
            let input = Bytes::from(artifact.encode_call(name, &args).unwrap().0);
            let code = Bytes::from(artifact.deployed_bytecode.0.clone());
            let outcome = run_interpreter(code, input, &ExecutionConfig::default()).unwrap();
            U256::from_be_slice(&outcome.output)
        };

        assert_eq!(run("sub", 2, 4), U256::MAX - U256::from(1));
        assert_eq!(run("add", u64::MAX, 1), U256::from(u64::MAX) + U256::from(1));
        assert_eq!(run("div", 2, 0), U256::ZERO);
    }

    #[test]
    fn arithmetic_exposes_all_operations() {
        let artifact = load(ARITHMETIC).unwrap();
        for name in ["add", "sub", "mul", "div"] {
            let function = artifact.function(name).unwrap();
            assert_eq!(function.inputs.len(), 3);
            assert_eq!(function.outputs.len(), 1);
        }
    }
}
