//! Result hand-off to reporters
//!
//! The core builds one [`RunResult`] per successful job and passes it to
//! every configured [`Reporter`]. What a reporter does with it (append a row,
//! upload the output directory, print a summary) is up to the reporter.

use crate::error::BenchResult;
use crate::job::JobSpec;
use crate::sampling::SampleSet;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;

/// Measurements of one job, plus where its artifacts were written
#[derive(Debug, Clone)]
pub struct RunResult {
    pub start_time: DateTime<Local>,
    pub job: JobSpec,
    /// Fastest per-iteration time among `all_samples`
    pub min_runtime_secs: f64,
    pub all_samples: SampleSet,
    /// Inner-loop count the accepted samples were taken at
    pub inner_loop_count: u64,
    /// Always false until realtime scheduling is supported
    pub is_realtime: bool,
    /// Temporary directory holding the workload's artifacts; removed once
    /// every reporter has seen the result
    pub local_output_dir: PathBuf,
}

impl RunResult {
    /// Flatten into the row layout reporters persist
    pub fn row(&self, hostname: &str, reference: Option<&str>) -> ResultRow {
        ResultRow {
            start_time: self.start_time.to_rfc3339(),
            hostname: hostname.to_string(),
            job_name: self.job.name.clone(),
            size: self.job.size.to_string(),
            batch_size: self.job.batch_size,
            backend_name: self.job.backend_name.clone(),
            min_runtime_secs: self.min_runtime_secs,
            samples: format_samples(&self.all_samples),
            reference: reference.unwrap_or_default().to_string(),
            is_realtime: self.is_realtime,
        }
    }
}

/// One persisted result line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub start_time: String,
    pub hostname: String,
    pub job_name: String,
    pub size: String,
    pub batch_size: u64,
    pub backend_name: String,
    pub min_runtime_secs: f64,
    pub samples: String,
    pub reference: String,
    pub is_realtime: bool,
}

/// Samples as `0.20000000, 0.21000000`
pub fn format_samples(samples: &SampleSet) -> String {
    samples
        .values()
        .iter()
        .map(|s| format!("{:.8}", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sink for finished results
pub trait Reporter {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Record a result; may return a reference (URL, path) to what was stored
    fn log_result(&mut self, result: &RunResult) -> BenchResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ImageBuildSpec, WorkloadSize};
    use std::collections::BTreeMap;

    #[test]
    fn test_row_layout() {
        let result = RunResult {
            start_time: Local::now(),
            job: JobSpec {
                name: "matmul".to_string(),
                size: WorkloadSize::Text("large".to_string()),
                batch_size: 16,
                backend_name: "blas".to_string(),
                image: ImageBuildSpec {
                    context_dir: PathBuf::from("jobs/matmul"),
                    build_args: BTreeMap::new(),
                },
                launch_command: vec!["./run".to_string()],
            },
            min_runtime_secs: 0.2,
            all_samples: SampleSet::new(vec![0.25, 0.2]).unwrap(),
            inner_loop_count: 25,
            is_realtime: false,
            local_output_dir: PathBuf::from("/tmp/x"),
        };

        let row = result.row("bench-host", Some("file:///archive/matmul"));
        assert_eq!(row.hostname, "bench-host");
        assert_eq!(row.size, "large");
        assert_eq!(row.batch_size, 16);
        assert_eq!(row.samples, "0.25000000, 0.20000000");
        assert_eq!(row.reference, "file:///archive/matmul");
        assert!(!row.is_realtime);

        assert_eq!(result.row("h", None).reference, "");
    }
}
