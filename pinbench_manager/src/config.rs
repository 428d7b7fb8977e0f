//! Benchmark configuration file
//!
//! ```toml
//! [[jobs]]
//! name = "matmul"
//! size = 1024
//! batch_size = 8
//! backend_name = "numpy"
//! docker_path = "jobs/matmul"
//! docker_build_args = { PYVER = "3.12" }
//! command = ["python", "bench.py"]
//!
//! [sampling]
//! min_samples = 5
//! min_runtime_secs = 5.0
//!
//! [reporters.jsonl]
//! path = "results.jsonl"
//! archive_dir = "archive"
//!
//! [reporters.console]
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use pinbench_core::error::{BenchError, BenchResult};
use pinbench_core::{ImageBuildSpec, JobSpec, SamplingPolicy, WorkloadSize};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// A validated configuration, paths already resolved
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    pub jobs: Vec<JobSpec>,
    pub sampling: SamplingPolicy,
    pub reporters: ReportersConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportersConfig {
    pub jsonl: Option<JsonlConfig>,
    pub console: Option<ConsoleConfig>,
}

impl ReportersConfig {
    pub fn is_empty(&self) -> bool {
        self.jsonl.is_none() && self.console.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonlConfig {
    /// File rows are appended to
    pub path: PathBuf,
    /// Directory the output directories are archived under
    pub archive_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsoleConfig {
    /// Also print every sample, not just the minimum
    #[serde(default)]
    pub show_samples: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    jobs: Vec<RawJob>,
    #[serde(default)]
    sampling: SamplingPolicy,
    #[serde(default)]
    reporters: ReportersConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJob {
    name: String,
    size: WorkloadSize,
    batch_size: u64,
    backend_name: String,
    docker_path: PathBuf,
    #[serde(default)]
    docker_build_args: BTreeMap<String, String>,
    command: Vec<String>,
}

impl RawJob {
    fn into_spec(self, base_dir: &Path) -> JobSpec {
        JobSpec {
            name: self.name,
            size: self.size,
            batch_size: self.batch_size,
            backend_name: self.backend_name,
            image: ImageBuildSpec {
                context_dir: resolve(base_dir, self.docker_path),
                build_args: self.docker_build_args,
            },
            launch_command: self.command,
        }
    }
}

impl BenchConfig {
    /// Load and validate a config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BenchError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml(&contents, base_dir)
    }

    /// Parse and validate TOML, resolving relative paths against `base_dir`
    pub fn from_toml(contents: &str, base_dir: &Path) -> BenchResult<Self> {
        let raw: RawConfig = toml::from_str(contents)
            .map_err(|e| BenchError::config(format!("Failed to parse config TOML: {}", e)))?;

        let jobs: Vec<JobSpec> = raw
            .jobs
            .into_iter()
            .map(|job| job.into_spec(base_dir))
            .collect();

        let mut reporters = raw.reporters;
        if let Some(jsonl) = reporters.jsonl.as_mut() {
            jsonl.path = resolve(base_dir, std::mem::take(&mut jsonl.path));
            jsonl.archive_dir = resolve(base_dir, std::mem::take(&mut jsonl.archive_dir));
        }

        let config = Self {
            jobs,
            sampling: raw.sampling,
            reporters,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.jobs.is_empty() {
            return Err(BenchError::config("at least one [[jobs]] entry is required"));
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !names.insert(job.name.as_str()) {
                return Err(BenchError::config(format!(
                    "job name '{}' is used more than once",
                    job.name
                )));
            }
        }

        self.sampling.validate()
    }

    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
