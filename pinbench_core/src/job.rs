//! Job descriptions
//!
//! A job is a workload image plus the command that runs it. The `size`,
//! `batch_size` and `backend_name` fields are never interpreted by the core;
//! they only travel through to the reporters.

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Workload size as written in the job file (a number or a label)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkloadSize {
    Int(i64),
    Text(String),
}

impl fmt::Display for WorkloadSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadSize::Int(n) => write!(f, "{}", n),
            WorkloadSize::Text(s) => f.write_str(s),
        }
    }
}

/// How to build the isolated runtime image for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBuildSpec {
    /// Build context directory containing the image recipe
    pub context_dir: PathBuf,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

/// One benchmark job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub size: WorkloadSize,
    pub batch_size: u64,
    pub backend_name: String,
    pub image: ImageBuildSpec,
    pub launch_command: Vec<String>,
}

impl JobSpec {
    pub fn validate(&self) -> BenchResult<()> {
        if self.name.trim().is_empty() {
            return Err(BenchError::config("job name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(BenchError::config(format!(
                "job '{}': batch_size must be greater than 0",
                self.name
            )));
        }
        if self.launch_command.is_empty() {
            return Err(BenchError::config(format!(
                "job '{}': command must not be empty",
                self.name
            )));
        }
        Ok(())
    }
}
