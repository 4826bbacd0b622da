//! Micro-benchmarks for the revm interpreter and its state backends.
//!
//! evm-state-bench measures how fast the [revm] interpreter executes a set of contract workloads (arithmetic,
//! memory, storage, hashing, control flow and environment access), both on the bare interpreter and as full message
//! calls whose state changes are committed to a store after every pass. The stores compared are an in-memory map,
//! [redb] and [sled].
//!
//! # Suite
//! The crate ships a small suite of hand-assembled contracts, see [`contracts`], and a matching set of benchmarks, see
//! [`benchmarks::suite`]. Any other compiled contract can be benchmarked by describing it in a `*.benchmark.json`
//! metadata file:
//!
//! ```json
//! {
//!     "name": "hash_loop",
//!     "artifact": "../contracts/Hash.json",
//!     "function": "hashLoop",
//!     "args": ["10000"],
//!     "cost": "moderate"
//! }
//! ```
//!
//! The artifact is the JSON file a compiler toolchain writes for a contract, see [`artifact`].
//!
//! # Usage
//! evm-state-bench is primarily designed to be used as an executable, but it can also be used as a library for more
//! granular control over the benchmarking scope and process.
//!
//! ## As an executable
//! Refer to the output of the `--help` flag for information on how to use the evm-state-bench binary:
//! ```console
//! $ evm-state-bench --help
//! Micro-benchmarks for the revm interpreter and its state backends under contract workloads.
//!
//! Usage: evm-state-bench [OPTIONS]
//!
//! Options:
//!   -b, --benchmarks <BENCHMARKS>  Path to a directory containing benchmark metadata files, the built-in suite is used if absent
//!   -r, --runners <RUNNERS>        Runners to execute every benchmark on [default: stateless,memory,redb,sled] [possible values: stateless, memory, redb, sled]
//!   -n, --passes <PASSES>          Number of passes per run, chosen from the benchmark cost if absent
//!   -c, --config <CONFIG>          Path to a JSON execution config
//!       --data-dir <DATA_DIR>      Directory to create disk stores in, the system temp directory if absent
//!   -o, --output <OUTPUT>          Path to a directory to dump outputs in [default: results]
//!   -h, --help                     Print help
//!   -V, --version                  Print version
//! ```
//!
//! ## As a library
//! ```
//! use evm_state_bench::{benchmarks::suite, execute, Runner, RunnerKind, RunnerOptions};
//!
//! let benchmarks = suite().expect("could not build suite");
//! let runners = Runner::from_kinds(&[RunnerKind::Stateless, RunnerKind::Memory]);
//!
//! let runs = execute(&benchmarks[..2], &runners, &RunnerOptions::default(), Some(1)).expect("could not run benchmarks");
//!
//! assert_eq!(runs.len(), 4);
//! ```
//!
//! # Results
//! The executable writes every run, with per-pass durations and gas usage, to a `results.<timestamp>.json` file in
//! the output directory. The `criterion` bench target (`cargo bench`) runs the same matrix under a statistical
//! harness.
//!
//! [revm]: https://github.com/bluealloy/revm
//! [redb]: https://github.com/cberner/redb
//! [sled]: https://github.com/spacejam/sled

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

pub mod artifact;
pub mod benchmarks;
pub mod config;
pub mod contracts;
pub mod evm;
pub mod runners;
pub mod runs;
pub mod state;

pub use artifact::{Artifact, ArtifactError};
pub use benchmarks::Benchmark;
pub use config::ExecutionConfig;
pub use runners::{Runner, RunnerKind, RunnerOptions};
pub use runs::{execute, execute_all};
pub use state::{KvStore, StateDb};
