//! Unified error handling for PINBENCH
//!
//! Every failure the benchmark core can detect is a variant of [`BenchError`].
//! None of them are retried; they propagate to the session, which ends the
//! affected job and moves on.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for PINBENCH operations
#[derive(Debug, Error)]
pub enum BenchError {
    /// The host topology query could not run or produced malformed output
    #[error("CPU topology unavailable: {0}")]
    TopologyUnavailable(String),

    /// No logical CPU sits on physical core 0
    #[error("No logical CPUs found on physical core 0; refusing to pin to an empty set")]
    EmptyPinningSet,

    /// A CPU control file could not be read or written
    #[error("Cannot access CPU control file {}: {source}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CPU control hierarchy has no `cpuN` entries
    #[error("No CPUs detected under {}", .0.display())]
    NoCpusDetected(PathBuf),

    /// A CPU control file held something other than the expected value
    #[error("Invalid value {value:?} in CPU control file {}", path.display())]
    InvalidControlValue { path: PathBuf, value: String },

    /// Building the job image failed
    #[error("Image build failed for job '{job}':\n{diagnostics}")]
    BuildFailed { job: String, diagnostics: String },

    /// The sandboxed workload exited with a nonzero status
    #[error("Job '{job}' exited with status {exit_code}:\n{stderr}")]
    JobExecutionFailed {
        job: String,
        exit_code: i64,
        stderr: String,
    },

    /// The workload printed a line that is not a duration
    #[error("Malformed workload output: {0}")]
    MalformedOutput(String),

    /// The inner-loop count outgrew its integer range before runs got long enough
    #[error("Sampling did not converge; inner loop count {inner_loop_count} cannot grow further")]
    SamplingDiverged { inner_loop_count: u64 },

    /// The container runtime itself misbehaved (CLI missing, bad reply, ...)
    #[error("Container runtime error: {0}")]
    ContainerRuntime(String),

    /// A sandbox operation was invoked in the wrong lifecycle state
    #[error("Sandbox for job '{job}' is {state}, cannot {operation}")]
    SandboxState {
        job: String,
        state: &'static str,
        operation: &'static str,
    },

    /// A reporter failed to record a result
    #[error("Reporter '{reporter}' failed: {message}")]
    Reporter { reporter: String, message: String },

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using BenchError
pub type BenchResult<T> = Result<T, BenchError>;

// Helper methods
impl BenchError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        BenchError::Config(msg.into())
    }

    /// Create a container runtime error
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        BenchError::ContainerRuntime(msg.into())
    }

    /// Create a reporter error with reporter name and message
    pub fn reporter<S: Into<String>, T: Into<String>>(reporter: S, message: T) -> Self {
        BenchError::Reporter {
            reporter: reporter.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O failure on a CPU control file
    pub fn permission_denied<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        BenchError::PermissionDenied {
            path: path.into(),
            source,
        }
    }

    /// Check if this is a permission error
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, BenchError::PermissionDenied { .. })
    }

    /// Check if the error carries workload diagnostics (build log or stderr)
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            BenchError::BuildFailed { diagnostics, .. } => Some(diagnostics),
            BenchError::JobExecutionFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
