//! # PINBENCH Core
//!
//! Execution core of the PINBENCH micro-benchmark harness. Workloads run in
//! isolated container instances pinned to the logical CPUs of one physical
//! core, on a host whose CPU clocks are locked for the duration of the pass.
//!
//! - **Topology**: maps logical CPUs to cores, NUMA nodes and caches
//! - **Host**: scoped performance-governor lock with guaranteed restoration
//! - **Sampling**: grows the inner iteration count until timings are long enough
//! - **Sandbox**: builds the job image, launches pinned instances, parses timings
//! - **Session**: ties the above together for a list of jobs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pinbench_core::{topology, BenchmarkSession, DockerCli, HostEnvironment};
//!
//! # fn jobs() -> Vec<pinbench_core::JobSpec> { Vec::new() }
//! let docker = DockerCli::default();
//! let table = topology::resolve()?;
//! let summary = BenchmarkSession::new(&docker)
//!     .with_host(HostEnvironment::default())
//!     .run(&jobs(), &table)?;
//! assert!(summary.all_succeeded());
//! # Ok::<(), pinbench_core::BenchError>(())
//! ```

pub mod duration;
pub mod error;
pub mod host;
pub mod job;
pub mod report;
pub mod runtime;
pub mod sampling;
pub mod sandbox;
pub mod session;
pub mod topology;

// Re-export commonly used types for easy access
pub use error::{BenchError, BenchResult};
pub use host::{HostEnvironment, HostPowerState, PerformanceMode};
pub use job::{ImageBuildSpec, JobSpec, WorkloadSize};
pub use report::{Reporter, ResultRow, RunResult};
pub use runtime::{ContainerRuntime, DockerCli};
pub use sampling::{run_to_sufficiency, JobRunner, SampleSet, SamplingPolicy};
pub use sandbox::{JobSandbox, SandboxState};
pub use session::{BenchmarkSession, JobOutcome, JobReport, SessionSummary};
pub use topology::{LogicalCpu, TopologyTable};
