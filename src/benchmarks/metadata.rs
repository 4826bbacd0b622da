use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Contents of a `*.benchmark.json` file.
///
/// # Examples
///
/// ```
/// use evm_state_bench::benchmarks::{BenchmarkMetadata, BenchmarkMetadataCost};
///
/// let metadata: BenchmarkMetadata = serde_json::from_str(
///     r#"{
///         "name": "hash_loop",
///         "artifact": "../contracts/Hash.json",
///         "function": "hashLoop",
///         "args": ["10000"],
///         "cost": "moderate"
///     }"#,
/// )
/// .unwrap();
///
/// assert_eq!(metadata.cost, BenchmarkMetadataCost::Moderate);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkMetadata {
    /// Name of the benchmark, used as its identifier.
    pub name: String,
    /// Path of the compiled artifact, relative to the metadata file.
    pub artifact: PathBuf,
    /// Function of the artifact's ABI to call.
    pub function: String,
    /// Arguments of the call, parsed against the function's input types.
    #[serde(default)]
    pub args: Vec<String>,
    /// Rough cost of one pass.
    pub cost: BenchmarkMetadataCost,
}

/// Rough cost of one pass of a benchmark, used to pick how many passes to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkMetadataCost {
    /// Well under a millisecond.
    Cheap,
    /// Around a millisecond.
    Moderate,
    /// Several milliseconds or more.
    Expensive,
}
