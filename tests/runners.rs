use ethers_core::{abi::Token, utils::hex};
use revm::primitives::U256;

use evm_state_bench::{
    benchmarks::suite,
    runners::{Runner, RunnerKind, RunnerOptions},
};

fn expected(function: &str) -> Token {
    let uint = |value: u64| Token::Uint(value.into());
    let word = |value: &str| Token::FixedBytes(hex::decode(value).unwrap());
    match function {
        "add" => uint(6),
        "sub" | "div" => uint(2),
        "mul" => uint(8),
        "memorySetGetFreeLoop" => uint(9999),
        "storageSetGetLoop" => uint(10_000),
        "hashSingle" | "hashAssembly" => {
            word("beced09521047d05b8960b7e7bcc1d1292cf3e4b2a6b63f48335cbde5f7545d2")
        }
        "hashLoop" => word("067b44cb1cc46275b78df229d6f92be8f1fa5e549748b6a6ca60abc43577a8cd"),
        "jumpLoop" => uint(25_000),
        "environmentLoop" => uint(3337),
        other => panic!("no expected output for {other}"),
    }
}

#[test]
fn every_benchmark_returns_the_same_value_on_every_runner() {
    let benchmarks = suite().unwrap();
    let options = RunnerOptions::default();

    for kind in RunnerKind::ALL {
        let runner = Runner::new(kind);
        for benchmark in &benchmarks {
            let mut fixture = runner.prepare(benchmark, &options).unwrap();
            for index in 0..2 {
                let outcome = fixture.iterate(index).unwrap();
                let tokens = benchmark.decode_output(&outcome.output).unwrap();
                assert_eq!(
                    tokens,
                    vec![expected(&benchmark.function)],
                    "{} on {kind}, pass {index}",
                    benchmark.identifier
                );
                assert!(outcome.gas_used > 0);
            }
            fixture.finish().unwrap();
        }
    }
}

#[test]
fn storage_loop_persists_its_counter_between_passes() {
    let benchmark = suite()
        .unwrap()
        .into_iter()
        .find(|b| b.function == "storageSetGetLoop")
        .unwrap();

    for kind in [RunnerKind::Memory, RunnerKind::Redb, RunnerKind::Sled] {
        let mut fixture = Runner::new(kind)
            .prepare(&benchmark, &RunnerOptions::default())
            .unwrap();
        let first = fixture.iterate(0).unwrap();
        let second = fixture.iterate(1).unwrap();

        assert_eq!(
            U256::from_be_slice(&first.output),
            U256::from_be_slice(&second.output)
        );
        // The second pass overwrites a warm, non-zero slot.
        assert!(second.gas_used < first.gas_used, "{kind}");
    }
}

#[test]
fn custom_data_dir_is_cleaned_up() {
    let parent = tempfile::tempdir().unwrap();
    let options = RunnerOptions {
        data_dir: Some(parent.path().join("stores")),
        ..RunnerOptions::default()
    };
    let benchmark = suite().unwrap().remove(0);

    for kind in [RunnerKind::Redb, RunnerKind::Sled] {
        let mut fixture = Runner::new(kind).prepare(&benchmark, &options).unwrap();
        fixture.iterate(0).unwrap();
        fixture.finish().unwrap();
        drop(fixture);
    }

    assert_eq!(
        std::fs::read_dir(parent.path().join("stores")).unwrap().count(),
        0
    );
}
