//! Utilities for creating and working with benchmarks.
//!
//! A benchmark is one call of one function of a compiled contract. The built-in [`suite`] covers the embedded
//! [`crate::contracts`]; further suites are described on disk by `*.benchmark.json` files and loaded with [`load`].
//!
//! # Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use evm_state_bench::benchmarks::load;
//!
//! let path = PathBuf::from("benchmarks");
//!
//! let benchmarks = load(&path, None);
//! ```

use std::{
    fmt::{self, Display, Formatter},
    fs::{self, File},
    path::{Path, PathBuf},
};

use anyhow::Context;
use ethers_core::abi::Token;
use revm::primitives::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    artifact::{Artifact, ArtifactError},
    contracts,
};

mod metadata;

pub use metadata::{BenchmarkMetadata, BenchmarkMetadataCost};

/// Glob pattern for benchmark metadata files.
pub const FILE_PATTERN: &str = "**/*.benchmark.json";

/// Unique identifier for a benchmark.
///
/// # Examples
///
/// ```
/// use evm_state_bench::benchmarks::Identifier;
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
        Self(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Total representation of a benchmark.
///
/// Encapsulates all the information needed to execute a benchmark, any [`crate::Runner`] can take this struct and
/// run the benchmark with no additional data needed. Typically, this comes from [`suite`] or [`load`], but it can
/// also be built by hand with [`Benchmark::new`].
#[derive(Clone, Debug)]
pub struct Benchmark {
    /// Unique identifier for this benchmark.
    pub identifier: Identifier,
    /// Decoded artifact of the benchmarked contract.
    pub artifact: Artifact,
    /// Name of the called function.
    pub function: String,
    /// Rough cost of one pass.
    pub cost: BenchmarkMetadataCost,
    /// Encoded call data, selector included.
    pub calldata: Bytes,
}

impl Benchmark {
    /// Builds a benchmark calling `function` of `artifact` with `args`.
    ///
    /// # Errors
    ///
    /// Fails if the function is unknown or the arguments do not match its inputs.
    pub fn new(
        identifier: impl Into<Identifier>,
        artifact: Artifact,
        function: &str,
        args: &[Token],
        cost: BenchmarkMetadataCost,
    ) -> Result<Self, ArtifactError> {
        let calldata = Bytes::from(artifact.encode_call(function, args)?.0);
        Ok(Self {
            identifier: identifier.into(),
            artifact,
            function: function.to_string(),
            cost,
            calldata,
        })
    }

    /// Constructor code, sent in the deploying transaction.
    #[must_use]
    pub fn bytecode(&self) -> Bytes {
        Bytes::from(self.artifact.bytecode.0.clone())
    }

    /// Runtime code, as stored at the deployed address.
    #[must_use]
    pub fn deployed_bytecode(&self) -> Bytes {
        Bytes::from(self.artifact.deployed_bytecode.0.clone())
    }

    /// Decodes data returned by one pass.
    ///
    /// # Errors
    ///
    /// Fails if the data does not match the function's outputs.
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>, ArtifactError> {
        self.artifact.decode_output(&self.function, data)
    }
}

/// Built-in benchmarks over the embedded contracts.
///
/// # Errors
///
/// Only fails if an embedded artifact is corrupt.
///
/// # Examples
///
/// ```
/// use evm_state_bench::benchmarks::suite;
///
/// let benchmarks = suite().expect("could not build suite");
///
/// assert!(benchmarks.iter().any(|b| b.identifier.to_string() == "hashSingle"));
/// ```
pub fn suite() -> Result<Vec<Benchmark>, ArtifactError> {
    use BenchmarkMetadataCost::{Cheap, Moderate};

    let table: [(&[u8], &str, &[u64], BenchmarkMetadataCost); 11] = [
        (contracts::ARITHMETIC, "add", &[4, 2, 10_000], Moderate),
        (contracts::ARITHMETIC, "sub", &[4, 2, 10_000], Moderate),
        (contracts::ARITHMETIC, "mul", &[4, 2, 10_000], Moderate),
        (contracts::ARITHMETIC, "div", &[4, 2, 10_000], Moderate),
        (contracts::MEMORY, "memorySetGetFreeLoop", &[10_000], Moderate),
        (contracts::STORAGE, "storageSetGetLoop", &[10_000], Moderate),
        (contracts::HASH, "hashSingle", &[42], Cheap),
        (contracts::HASH, "hashAssembly", &[42], Cheap),
        (contracts::HASH, "hashLoop", &[10_000], Moderate),
        (contracts::JUMP_TABLE, "jumpLoop", &[10_000], Moderate),
        (contracts::ENVIRONMENT, "environmentLoop", &[10_000], Moderate),
    ];

    table
        .into_iter()
        .map(|(raw, function, args, cost)| {
            let args: Vec<Token> = args.iter().map(|arg| Token::Uint((*arg).into())).collect();
            Benchmark::new(function, contracts::load(raw)?, function, &args, cost)
        })
        .collect()
}

/// Finds all benchmark metadata files under the given path.
///
/// Searches for all files matching the [`FILE_PATTERN`] pattern under the given path and attempts to deserialize
/// them into [`BenchmarkMetadata`] structs. Returns each metadata together with the canonical path of the artifact
/// it points to.
///
/// # Errors
///
/// If the glob pattern cannot be constructed or the glob search fails, then the error is returned.
///
/// If any of the files matching the pattern cannot be opened, deserialized, or its artifact path canonicalized, then
/// the error is logged and the file is skipped.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
///
/// use evm_state_bench::benchmarks::find_all_metadata;
///
/// let path = PathBuf::from("benchmarks");
///
/// let metadata = find_all_metadata(&path);
/// ```
pub fn find_all_metadata(path: &Path) -> anyhow::Result<Vec<(BenchmarkMetadata, PathBuf)>> {
    log::info!(
        "finding all benchmark metadata files under {}...",
        path.display()
    );
    let mut metadatas: Vec<(BenchmarkMetadata, PathBuf)> = glob::glob(
        path.join(FILE_PATTERN)
            .to_str()
            .context("could not convert benchmark metadata pattern to string")?,
    )
    .context("searching for all benchmark metadata files")?
    .filter_map(|r| {
        let path = r
            .map_err(|err| {
                log::warn!("could not get globbed path: {err}, skipping...");
            })
            .ok()?;

        log::debug!("processing benchmark metadata file ({})...", path.display());

        let metadata: BenchmarkMetadata = serde_json::from_reader(
            File::open(&path)
                .map_err(|err| {
                    log::warn!("could not open benchmark metadata file: {err}, skipping...");
                })
                .ok()?,
        )
        .map_err(|err| {
            log::warn!("could not deserialize benchmark metadata: {err}, skipping...");
        })
        .ok()?;

        let artifact_path = path
            .parent()
            .or_else(|| {
                log::warn!("could not get parent of benchmark metadata file, skipping...");
                None
            })?
            .join(&metadata.artifact)
            .canonicalize()
            .map_err(|err| {
                log::warn!("could not canonicalize artifact path: {err}, skipping...");
            })
            .ok()?;

        log::debug!("processed benchmark metadata file");
        Some((metadata, artifact_path))
    })
    .collect();
    metadatas.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));
    log::info!("found {} benchmark metadata files", metadatas.len());
    log::trace!("benchmark metadatas: {metadatas:#?}");

    Ok(metadatas)
}

/// Loads all benchmarks under the given path.
///
/// Reads and decodes the artifact of every metadata entry, then encodes the call data from its arguments. If the
/// optional `metadatas` argument is provided, then it is used instead of searching with [`find_all_metadata`].
///
/// # Errors
///
/// If benchmark metadata cannot be found, then the error is returned. Entries whose artifact cannot be read or
/// decoded, or whose arguments do not match the function, are logged and skipped.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
///
/// use evm_state_bench::benchmarks::load;
///
/// let path = PathBuf::from("benchmarks");
///
/// let benchmarks = load(&path, None);
/// ```
pub fn load(
    benchmarks: &Path,
    metadatas: Option<Vec<(BenchmarkMetadata, PathBuf)>>,
) -> anyhow::Result<Vec<Benchmark>> {
    let metadatas = if let Some(metadatas) = metadatas {
        metadatas
    } else {
        find_all_metadata(benchmarks)?
    };

    log::info!("loading benchmarks...");
    let benchmarks: Vec<Benchmark> = metadatas
        .into_iter()
        .filter_map(|(metadata, artifact_path)| {
            let identifier = Identifier(metadata.name.clone());

            let raw = fs::read(&artifact_path)
                .map_err(|err| {
                    log::warn!("[{identifier}] could not read artifact: {err}, skipping...");
                })
                .ok()?;
            let artifact = Artifact::from_slice(&raw)
                .map_err(|err| {
                    log::warn!("[{identifier}] could not decode artifact: {err}, skipping...");
                })
                .ok()?;
            let args = artifact
                .tokenize(&metadata.function, &metadata.args)
                .map_err(|err| {
                    log::warn!("[{identifier}] could not parse arguments: {err}, skipping...");
                })
                .ok()?;

            let benchmark = Benchmark::new(
                identifier.clone(),
                artifact,
                &metadata.function,
                &args,
                metadata.cost,
            )
            .map_err(|err| {
                log::warn!("[{identifier}] could not encode call data: {err}, skipping...");
            })
            .ok()?;

            log::info!("[{identifier}] successfully loaded benchmark");
            Some(benchmark)
        })
        .collect();
    log::info!("loaded {} benchmarks", benchmarks.len());
    log::trace!("benchmarks: {benchmarks:#?}");

    Ok(benchmarks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_covers_every_contract() {
        let benchmarks = suite().unwrap();
        assert_eq!(benchmarks.len(), 11);
        for benchmark in &benchmarks {
            assert_eq!(
                &benchmark.calldata[..4],
                benchmark
                    .artifact
                    .function(&benchmark.function)
                    .unwrap()
                    .short_signature()
                    .as_slice()
            );
            assert!(!benchmark.deployed_bytecode().is_empty());
        }
    }

    #[test]
    fn benchmark_rejects_wrong_arguments() {
        let artifact = contracts::load(contracts::ARITHMETIC).unwrap();
        let err = Benchmark::new(
            "add",
            artifact,
            "add",
            &[Token::Uint(1u64.into())],
            BenchmarkMetadataCost::Cheap,
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Arguments { .. }));
    }
}
