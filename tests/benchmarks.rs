use std::{fs, path::Path};

use evm_state_bench::{
    benchmarks::{find_all_metadata, load, BenchmarkMetadataCost},
    contracts,
};

fn write_metadata(dir: &Path, file: &str, name: &str, function: &str, args: &str) {
    fs::write(
        dir.join(file),
        format!(
            r#"{{"name": "{name}", "artifact": "Hash.json", "function": "{function}", "args": {args}, "cost": "cheap"}}"#
        ),
    )
    .unwrap();
}

#[test]
fn broken_metadata_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Hash.json"), contracts::HASH).unwrap();

    write_metadata(dir.path(), "good.benchmark.json", "good", "hashSingle", r#"["42"]"#);
    write_metadata(dir.path(), "arity.benchmark.json", "arity", "hashSingle", r#"[]"#);
    write_metadata(dir.path(), "unknown.benchmark.json", "unknown", "nope", r#"[]"#);
    fs::write(dir.path().join("garbage.benchmark.json"), "{").unwrap();
    fs::write(
        dir.path().join("dangling.benchmark.json"),
        r#"{"name": "dangling", "artifact": "Missing.json", "function": "f", "cost": "cheap"}"#,
    )
    .unwrap();
    fs::write(dir.path().join("ignored.json"), "{").unwrap();

    let metadatas = find_all_metadata(dir.path()).unwrap();
    let names: Vec<&str> = metadatas.iter().map(|(m, _)| m.name.as_str()).collect();
    assert_eq!(names, vec!["arity", "good", "unknown"]);

    let benchmarks = load(dir.path(), Some(metadatas)).unwrap();
    assert_eq!(benchmarks.len(), 1);
    assert_eq!(benchmarks[0].identifier.to_string(), "good");
    assert_eq!(benchmarks[0].cost, BenchmarkMetadataCost::Cheap);
}

#[test]
fn nested_metadata_is_found() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("hash").join("single");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("Hash.json"), contracts::HASH).unwrap();
    write_metadata(&nested, "a.benchmark.json", "nested", "hashAssembly", r#"["1"]"#);

    let benchmarks = load(dir.path(), None).unwrap();
    assert_eq!(benchmarks.len(), 1);
    assert_eq!(benchmarks[0].function, "hashAssembly");
}

#[test]
fn shipped_benchmarks_load() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("benchmarks");

    let benchmarks = load(&path, None).unwrap();
    let names: Vec<String> = benchmarks.iter().map(|b| b.identifier.to_string()).collect();

    assert_eq!(
        names,
        vec![
            "arithmetic_wrapping_sub",
            "hash_loop_large",
            "storage_get",
            "storage_single_write"
        ]
    );
}
