use std::{fs, path::PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;

use evm_state_bench::{execute_all, ExecutionConfig, RunnerKind, RunnerOptions};

#[derive(Parser, Serialize, Deserialize)]
#[command(author, version, about)]
struct Args {
    /// Path to a directory containing benchmark metadata files, the built-in suite is used if absent
    #[arg(short, long)]
    benchmarks: Option<PathBuf>,

    /// Runners to execute every benchmark on
    #[arg(
        short,
        long,
        value_enum,
        value_delimiter = ',',
        default_value = "stateless,memory,redb,sled"
    )]
    runners: Vec<RunnerKind>,

    /// Number of passes per run, chosen from the benchmark cost if absent
    #[arg(short = 'n', long)]
    passes: Option<u32>,

    /// Path to a JSON execution config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to create disk stores in, the system temp directory if absent
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(short, long, default_value = "results")]
    /// Path to a directory to dump outputs in
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    human_panic::setup_panic!();
    env_logger::init();

    let args = Args::parse();

    let start_time = Utc::now();

    let config = match &args.config {
        Some(path) => ExecutionConfig::from_path(path)
            .with_context(|| format!("could not load config from {}", path.display()))?,
        None => ExecutionConfig::default(),
    };
    log::info!(
        "executing at block {} on chain {} with {:?} rules",
        config.block_number,
        config.chain_id,
        config.spec
    );

    let options = RunnerOptions {
        config,
        data_dir: args.data_dir.clone(),
    };
    let benchmarks = args
        .benchmarks
        .as_ref()
        .map(|path| path.canonicalize())
        .transpose()
        .context("could not find benchmarks directory")?;

    let runs = execute_all(benchmarks.as_deref(), &args.runners, &options, args.passes).map_err(
        |err| {
            log::error!("{err:#}");
            err
        },
    )?;

    let output = serde_json::to_string_pretty(&json!({
        "args": args,
        "config": options.config,
        "runs": runs,
    }))?;

    let output_file_path = args.output.join(format!(
        "results.{}.json",
        start_time.format("%Y-%m-%dT%H-%M-%S%z")
    ));
    log::info!(
        "writing result output to {}...",
        output_file_path.to_string_lossy()
    );
    fs::create_dir_all(&args.output).context("could not create output directory structure")?;
    fs::write(&output_file_path, output).context(format!(
        "could not write to output file {}",
        output_file_path.to_string_lossy()
    ))?;

    Ok(())
}
