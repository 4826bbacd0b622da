//! Orchestration for running benchmarks on runners.
//!
//! Prepares every benchmark on every runner, times each pass, and packages the timings into [`Run`]s. Runs are
//! executed strictly one after the other to keep timings free of interference. The primary function is [`execute`].
//!
//! # Examples
//!
//! ```
//! use evm_state_bench::{
//!     benchmarks::suite,
//!     runners::{Runner, RunnerKind, RunnerOptions},
//!     runs::execute,
//! };
//!
//! let benchmarks = suite().unwrap();
//! let runners = Runner::from_kinds(&[RunnerKind::Stateless]);
//!
//! let runs = execute(&benchmarks[..1], &runners, &RunnerOptions::default(), Some(2)).expect("could not run benchmarks");
//!
//! assert_eq!(runs[0].durations.len(), 2);
//! ```

use std::{
    fmt::{self, Display, Formatter},
    path::Path,
    time::{Duration, Instant},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    benchmarks::{self, Benchmark, BenchmarkMetadataCost, Identifier as BenchmarkIdentifier},
    runners::{Identifier as RunnerIdentifier, Runner, RunnerKind, RunnerOptions},
};

/// Unique identifier for this run.
///
/// Typically constructed from the [`RunnerIdentifier`] and [`BenchmarkIdentifier`] of the run.
///
/// # Examples
///
/// ```
/// use evm_state_bench::runs::Identifier;
/// use evm_state_bench::runners::Identifier as RunnerIdentifier;
/// use evm_state_bench::benchmarks::Identifier as BenchmarkIdentifier;
///
/// let identifier = Identifier::from(format!("{}_{}", RunnerIdentifier::from("foo"), BenchmarkIdentifier::from("bar")));
///
/// assert_eq!(identifier.to_string(), "foo_bar");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
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

/// Total representation of a run.
///
/// Encapsulates all the relevant information from a benchmarking run. This is the result of running a benchmark on a
/// runner, and contains the duration and gas usage of each pass of the benchmark. Typically, this is produced by the
/// running process using something like the [`execute`] function.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run.
    pub identifier: Identifier,
    /// Unique identifier for the runner used in this run.
    pub runner_identifier: RunnerIdentifier,
    /// Unique identifier for the benchmark used in this run.
    pub benchmark_identifier: BenchmarkIdentifier,
    /// Durations of each pass of the benchmark.
    pub durations: Vec<Duration>,
    /// Average run time of the benchmark.
    pub average_duration: Duration,
    /// Gas used by each pass of the benchmark.
    pub gas_used: Vec<u64>,
}

/// Default number of passes for a benchmark of the given cost.
#[must_use]
pub fn num_runs_for_benchmark_cost(cost: BenchmarkMetadataCost) -> u32 {
    match cost {
        BenchmarkMetadataCost::Cheap => 25,
        BenchmarkMetadataCost::Moderate => 10,
        BenchmarkMetadataCost::Expensive => 3,
    }
}

fn average(durations: &[Duration]) -> anyhow::Result<Duration> {
    Ok(if durations.is_empty() {
        Duration::from_secs(0)
    } else {
        durations.iter().sum::<Duration>() / u32::try_from(durations.len())?
    })
}

/// Runs a benchmark on a runner.
///
/// Prepares the benchmark on the runner, then times `passes` passes (or the default for the benchmark's cost) one
/// after the other. Only the pass itself is timed, setup and teardown are not.
///
/// # Errors
///
/// If the benchmark cannot be prepared, or any pass fails, the run is aborted and the error is returned.
pub fn execute_single(
    benchmark: &Benchmark,
    runner: &Runner,
    options: &RunnerOptions,
    passes: Option<u32>,
) -> anyhow::Result<Run> {
    let run_identifier = Identifier(format!("{}_{}", runner.identifier, benchmark.identifier));
    let passes = passes.unwrap_or_else(|| num_runs_for_benchmark_cost(benchmark.cost));

    log::debug!(
        "[{run_identifier}] running benchmark ({}) on runner ({}) for {passes} passes...",
        benchmark.identifier,
        runner.identifier
    );

    let mut fixture = runner
        .prepare(benchmark, options)
        .with_context(|| format!("[{run_identifier}] could not prepare benchmark"))?;

    let mut durations = Vec::with_capacity(passes as usize);
    let mut gas_used = Vec::with_capacity(passes as usize);
    for index in 0..u64::from(passes) {
        let timer = Instant::now();
        let outcome = fixture.iterate(index);
        let duration = timer.elapsed();

        let outcome = outcome.with_context(|| format!("[{run_identifier}] pass {index} failed"))?;
        log::trace!(
            "[{run_identifier}] pass {index} took {duration:?} and {} gas",
            outcome.gas_used
        );
        durations.push(duration);
        gas_used.push(outcome.gas_used);
    }

    fixture
        .finish()
        .with_context(|| format!("[{run_identifier}] could not finish benchmark"))?;

    Ok(Run {
        average_duration: average(&durations)?,
        identifier: run_identifier,
        runner_identifier: runner.identifier.clone(),
        benchmark_identifier: benchmark.identifier.clone(),
        durations,
        gas_used,
    })
}

/// Runs every benchmark on every runner, sequentially.
///
/// # Errors
///
/// The first failing run aborts the whole execution and its error is returned.
pub fn execute(
    benchmarks: &[Benchmark],
    runners: &[Runner],
    options: &RunnerOptions,
    passes: Option<u32>,
) -> anyhow::Result<Vec<Run>> {
    log::info!(
        "running {} benchmarks on {} runners...",
        benchmarks.len(),
        runners.len()
    );

    let mut runs = Vec::with_capacity(benchmarks.len() * runners.len());
    for runner in runners {
        for benchmark in benchmarks {
            let run = execute_single(benchmark, runner, options, passes)?;
            log::info!(
                "[{}] run finished with {} passes (avg: {:?})",
                run.identifier,
                run.durations.len(),
                run.average_duration,
            );
            log::trace!("[{}] run durations: {:#?}", run.identifier, run.durations);
            runs.push(run);
        }
    }

    Ok(runs)
}

/// Runs all benchmarks on the runners of the given kinds.
///
/// Benchmarks come from the metadata under `benchmarks_path` if given, and from the built-in
/// [`benchmarks::suite`] otherwise. This is a convenience function that simply calls [`benchmarks::load`] and
/// [`execute`] in sequence.
///
/// # Errors
///
/// If any of the steps fail, then this function will return an error.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
///
/// use evm_state_bench::{runners::{RunnerKind, RunnerOptions}, runs::execute_all};
///
/// let benchmarks_path = PathBuf::from("benchmarks");
///
/// let runs = execute_all(Some(&benchmarks_path), &RunnerKind::ALL, &RunnerOptions::default(), None)
///     .expect("could not run benchmarks");
/// ```
pub fn execute_all(
    benchmarks_path: Option<&Path>,
    kinds: &[RunnerKind],
    options: &RunnerOptions,
    passes: Option<u32>,
) -> anyhow::Result<Vec<Run>> {
    let benchmarks = match benchmarks_path {
        Some(path) => benchmarks::load(path, None)?,
        None => benchmarks::suite().context("could not build the built-in suite")?,
    };
    let runners = Runner::from_kinds(kinds);
    execute(&benchmarks, &runners, options, passes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_follow_cost_unless_overridden() {
        let benchmark = benchmarks::suite()
            .unwrap()
            .into_iter()
            .find(|b| b.cost == BenchmarkMetadataCost::Cheap)
            .unwrap();
        let runner = Runner::new(RunnerKind::Stateless);

        let run = execute_single(&benchmark, &runner, &RunnerOptions::default(), None).unwrap();
        assert_eq!(run.durations.len(), 25);
        assert_eq!(run.gas_used.len(), 25);
        assert_eq!(run.identifier.to_string(), format!("stateless_{}", benchmark.identifier));

        let run = execute_single(&benchmark, &runner, &RunnerOptions::default(), Some(3)).unwrap();
        assert_eq!(run.durations.len(), 3);
    }

    #[test]
    fn zero_passes_average_to_zero() {
        assert_eq!(average(&[]).unwrap(), Duration::ZERO);
        assert_eq!(
            average(&[Duration::from_millis(1), Duration::from_millis(3)]).unwrap(),
            Duration::from_millis(2)
        );
    }

    #[test]
    fn failing_pass_aborts_the_run() {
        let mut benchmark = benchmarks::suite().unwrap().remove(0);
        benchmark.calldata = revm::primitives::Bytes::from_static(&[0xff, 0xff, 0xff, 0xff]);

        let err = execute(
            &[benchmark],
            &[Runner::new(RunnerKind::Memory)],
            &RunnerOptions::default(),
            Some(1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("pass 0 failed"));
    }
}
