// Config loading and reporter output, through files on disk

use approx::assert_relative_eq;
use pinbench_core::error::BenchError;
use pinbench_core::{Reporter, RunResult, SampleSet, WorkloadSize};
use pinbench_manager::config::{BenchConfig, JsonlConfig};
use pinbench_manager::reporters::JsonlReporter;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const FULL: &str = r#"
[[jobs]]
name = "matmul"
size = 1024
batch_size = 8
backend_name = "numpy"
docker_path = "jobs/matmul"
docker_build_args = { PYVER = "3.12" }
command = ["python", "bench.py"]

[[jobs]]
name = "conv"
size = "large"
batch_size = 1
backend_name = "torch"
docker_path = "jobs/conv"
command = ["./conv"]

[sampling]
min_samples = 3
min_runtime_secs = 0.5

[reporters.jsonl]
path = "out/results.jsonl"
archive_dir = "out/archive"

[reporters.console]
show_samples = true
"#;

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("bench.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_full_config_from_file() {
    let dir = TempDir::new().unwrap();
    let config = BenchConfig::from_file(write_config(&dir, FULL)).unwrap();

    assert_eq!(config.jobs.len(), 2);
    let matmul = config.job("matmul").unwrap();
    assert_eq!(matmul.image.context_dir, dir.path().join("jobs/matmul"));
    assert_eq!(matmul.image.build_args["PYVER"], "3.12");
    assert_eq!(matmul.launch_command, vec!["python", "bench.py"]);

    let conv = config.job("conv").unwrap();
    assert_eq!(conv.size, WorkloadSize::Text("large".to_string()));

    assert_eq!(config.sampling.min_samples, 3);
    assert_relative_eq!(config.sampling.min_runtime_secs, 0.5);

    let jsonl = config.reporters.jsonl.as_ref().unwrap();
    assert_eq!(jsonl.path, dir.path().join("out/results.jsonl"));
    assert_eq!(jsonl.archive_dir, dir.path().join("out/archive"));
    assert!(config.reporters.console.as_ref().unwrap().show_samples);
}

#[test]
fn test_duplicate_job_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    let doubled = FULL.replace("name = \"conv\"", "name = \"matmul\"");
    let err = BenchConfig::from_file(write_config(&dir, &doubled)).unwrap_err();

    assert!(matches!(err, BenchError::Config(_)));
    assert!(err.to_string().contains("matmul"));
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    for (from, to) in [
        ("batch_size = 8", "batch_size = 0"),
        ("command = [\"./conv\"]", "command = []"),
        ("min_samples = 3", "min_samples = 0"),
        ("min_runtime_secs = 0.5", "min_runtime_secs = -1.0"),
        ("name = \"conv\"", "name = \"\""),
    ] {
        let broken = FULL.replace(from, to);
        let result = BenchConfig::from_file(write_config(&dir, &broken));
        assert!(
            matches!(result, Err(BenchError::Config(_))),
            "{} should be rejected",
            to
        );
    }
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = BenchConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, BenchError::Config(_)));
}

#[test]
fn test_jsonl_reporter_archives_and_appends() {
    let dir = TempDir::new().unwrap();
    let config = BenchConfig::from_file(write_config(&dir, FULL)).unwrap();
    let jsonl: JsonlConfig = config.reporters.jsonl.clone().unwrap();

    let output = TempDir::new().unwrap();
    fs::write(output.path().join("stderr.log"), "warm\n").unwrap();
    fs::create_dir_all(output.path().join("profiles")).unwrap();
    fs::write(output.path().join("profiles/trace.txt"), "hot loop\n").unwrap();

    let result = RunResult {
        start_time: chrono::Local::now(),
        job: config.job("matmul").unwrap().clone(),
        min_runtime_secs: 0.125,
        all_samples: SampleSet::new(vec![0.125, 0.25]).unwrap(),
        inner_loop_count: 40,
        is_realtime: false,
        local_output_dir: output.path().to_path_buf(),
    };

    let mut reporter = JsonlReporter::with_hostname(jsonl.clone(), "bench-01");
    let reference = reporter.log_result(&result).unwrap().unwrap();
    reporter.log_result(&result).unwrap();

    let archived = PathBuf::from(reference.strip_prefix("file://").unwrap());
    assert!(archived.starts_with(fs::canonicalize(&jsonl.archive_dir).unwrap()));
    assert_eq!(
        fs::read_to_string(archived.join("profiles/trace.txt")).unwrap(),
        "hot loop\n"
    );
    assert!(archived.join("stderr.log").is_file());

    let contents = fs::read_to_string(&jsonl.path).unwrap();
    let rows: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["hostname"], "bench-01");
    assert_eq!(rows[0]["job_name"], "matmul");
    assert_eq!(rows[0]["size"], "1024");
    assert_eq!(rows[0]["samples"], "0.12500000, 0.25000000");
    assert_eq!(rows[0]["reference"], reference.as_str());
    assert_eq!(rows[0]["is_realtime"], false);
}
