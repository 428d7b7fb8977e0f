//! Sandboxed job execution
//!
//! A [`JobSandbox`] builds its job's image once and then launches one pinned
//! instance per sampling round. Every launched instance is torn down again
//! (stopped with a short grace period, then removed) whether the round
//! succeeded or not, and its error stream is saved to `stderr.log` in the
//! round's output directory first.
//!
//! Workloads see two environment variables:
//!
//! - `PINBENCH_OUTPUT_DIR`: a writable directory for artifacts
//! - `PINBENCH_LOOP_STEPS`: the inner iteration count for this launch

use crate::duration::parse_samples;
use crate::error::{BenchError, BenchResult};
use crate::job::JobSpec;
use crate::runtime::{
    ContainerRuntime, ImageHandle, InstanceHandle, LaunchSpec, LogStream, VolumeBinding,
};
use crate::sampling::{JobRunner, SampleSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Mount point of the output directory inside the instance
pub const CONTAINER_OUTPUT_DIR: &str = "/pinbench_output";
pub const ENV_OUTPUT_DIR: &str = "PINBENCH_OUTPUT_DIR";
pub const ENV_LOOP_STEPS: &str = "PINBENCH_LOOP_STEPS";
/// File the instance's error stream is saved to
pub const STDERR_LOG: &str = "stderr.log";
/// Grace period before a stopped instance is killed
pub const STOP_GRACE_TIMEOUT: Duration = Duration::from_secs(2);
/// Lets the workload raise its own scheduling priority. Realtime
/// scheduling is not granted.
pub const RAISE_PRIORITY_CAPABILITY: &str = "SYS_NICE";

/// Lifecycle of a sandbox
///
/// `Completed` describes the most recent instance; the image stays usable for
/// further runs. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Unbuilt,
    Prepared,
    Running,
    Completed,
    Failed,
}

impl SandboxState {
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxState::Unbuilt => "unbuilt",
            SandboxState::Prepared => "prepared",
            SandboxState::Running => "running",
            SandboxState::Completed => "completed",
            SandboxState::Failed => "failed",
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One job's image and the instances launched from it
pub struct JobSandbox<'a> {
    runtime: &'a dyn ContainerRuntime,
    job: &'a JobSpec,
    image: Option<ImageHandle>,
    state: SandboxState,
}

impl<'a> JobSandbox<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, job: &'a JobSpec) -> Self {
        Self {
            runtime,
            job,
            image: None,
            state: SandboxState::Unbuilt,
        }
    }

    pub fn job(&self) -> &'a JobSpec {
        self.job
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn image(&self) -> Option<&ImageHandle> {
        self.image.as_ref()
    }

    /// Build the job image; reused by every later [`JobSandbox::run`]
    pub fn prepare(&mut self) -> BenchResult<&ImageHandle> {
        if self.state != SandboxState::Unbuilt {
            return Err(self.state_error("prepare"));
        }

        log::debug!(
            "Building image for job '{}' from {}",
            self.job.name,
            self.job.image.context_dir.display()
        );
        let built = self
            .runtime
            .build(&self.job.image.context_dir, &self.job.image.build_args)
            .map_err(|e| match e {
                BenchError::BuildFailed { diagnostics, .. } => BenchError::BuildFailed {
                    job: self.job.name.clone(),
                    diagnostics,
                },
                other => other,
            });

        match built {
            Ok(image) => {
                log::info!("Built image {} for job '{}'", image.id(), self.job.name);
                self.state = SandboxState::Prepared;
                Ok(self.image.insert(image))
            }
            Err(e) => {
                self.state = SandboxState::Failed;
                Err(e)
            }
        }
    }

    /// Launch one pinned instance and collect its per-iteration timings
    pub fn run(
        &mut self,
        iteration_count: u64,
        cpus: &BTreeSet<usize>,
        output_dir: &Path,
    ) -> BenchResult<SampleSet> {
        let image = match (self.state, &self.image) {
            (SandboxState::Prepared | SandboxState::Completed, Some(image)) => image.clone(),
            _ => return Err(self.state_error("run")),
        };
        if !output_dir.is_dir() {
            return Err(BenchError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("output directory {} does not exist", output_dir.display()),
            )));
        }

        let launch = self.launch_spec(image, iteration_count, cpus, output_dir);
        self.state = SandboxState::Running;
        let instance = match self.runtime.run(&launch) {
            Ok(instance) => instance,
            Err(e) => {
                self.state = SandboxState::Failed;
                return Err(e);
            }
        };
        log::debug!(
            "Started instance {} of job '{}' on CPUs {:?}",
            instance.id(),
            self.job.name,
            cpus
        );

        let mut stderr_saved = false;
        let result = self.collect(&instance, iteration_count, output_dir, &mut stderr_saved);
        let teardown = self.teardown(&instance, output_dir, stderr_saved);

        let outcome = match (result, teardown) {
            (Ok(samples), Ok(())) => Ok(samples),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                log::warn!(
                    "Teardown of instance {} also failed: {}",
                    instance.id(),
                    teardown_err
                );
                Err(e)
            }
        };
        self.state = if outcome.is_ok() {
            SandboxState::Completed
        } else {
            SandboxState::Failed
        };
        outcome
    }

    fn launch_spec(
        &self,
        image: ImageHandle,
        iteration_count: u64,
        cpus: &BTreeSet<usize>,
        output_dir: &Path,
    ) -> LaunchSpec {
        let env = BTreeMap::from([
            (ENV_OUTPUT_DIR.to_string(), CONTAINER_OUTPUT_DIR.to_string()),
            (ENV_LOOP_STEPS.to_string(), iteration_count.to_string()),
        ]);
        LaunchSpec {
            image,
            command: self.job.launch_command.clone(),
            env,
            volumes: vec![VolumeBinding {
                host_path: output_dir.to_path_buf(),
                container_path: CONTAINER_OUTPUT_DIR.to_string(),
                read_write: true,
            }],
            cpuset: cpus.clone(),
            capabilities: vec![RAISE_PRIORITY_CAPABILITY.to_string()],
        }
    }

    fn collect(
        &self,
        instance: &InstanceHandle,
        iteration_count: u64,
        output_dir: &Path,
        stderr_saved: &mut bool,
    ) -> BenchResult<SampleSet> {
        let exit_code = self.runtime.wait(instance)?;

        let stderr = self.runtime.logs(instance, LogStream::Stderr)?;
        save_stderr(output_dir, &stderr)?;
        *stderr_saved = true;

        if exit_code != 0 {
            let stderr = String::from_utf8_lossy(&stderr).into_owned();
            log::error!(
                "Job '{}' exited with status {}:\n{}",
                self.job.name,
                exit_code,
                stderr
            );
            return Err(BenchError::JobExecutionFailed {
                job: self.job.name.clone(),
                exit_code,
                stderr,
            });
        }

        let stdout = self.runtime.logs(instance, LogStream::Stdout)?;
        let stdout = String::from_utf8(stdout).map_err(|_| {
            BenchError::MalformedOutput(format!("job '{}' wrote non-UTF-8 output", self.job.name))
        })?;
        parse_samples(&stdout, iteration_count)
    }

    /// Save stderr if still pending, stop, remove; every step is attempted
    fn teardown(
        &self,
        instance: &InstanceHandle,
        output_dir: &Path,
        stderr_saved: bool,
    ) -> BenchResult<()> {
        let mut first_error = None;

        if !stderr_saved {
            let saved = self
                .runtime
                .logs(instance, LogStream::Stderr)
                .and_then(|stderr| save_stderr(output_dir, &stderr));
            if let Err(e) = saved {
                log::warn!("Could not save stderr of instance {}: {}", instance.id(), e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.runtime.stop(instance, STOP_GRACE_TIMEOUT) {
            log::warn!("Could not stop instance {}: {}", instance.id(), e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.runtime.remove(instance) {
            log::warn!("Could not remove instance {}: {}", instance.id(), e);
            first_error.get_or_insert(e);
        }

        first_error.map_or(Ok(()), Err)
    }

    fn state_error(&self, operation: &'static str) -> BenchError {
        BenchError::SandboxState {
            job: self.job.name.clone(),
            state: self.state.as_str(),
            operation,
        }
    }
}

fn save_stderr(output_dir: &Path, stderr: &[u8]) -> BenchResult<()> {
    fs::write(output_dir.join(STDERR_LOG), stderr)?;
    Ok(())
}

/// Adapts a prepared sandbox to the sampling controller
pub struct SandboxRunner<'s, 'a> {
    sandbox: &'s mut JobSandbox<'a>,
    cpus: &'s BTreeSet<usize>,
    output_dir: &'s Path,
}

impl<'s, 'a> SandboxRunner<'s, 'a> {
    pub fn new(
        sandbox: &'s mut JobSandbox<'a>,
        cpus: &'s BTreeSet<usize>,
        output_dir: &'s Path,
    ) -> Self {
        Self {
            sandbox,
            cpus,
            output_dir,
        }
    }
}

impl JobRunner for SandboxRunner<'_, '_> {
    fn run(&mut self, inner_loop_count: u64) -> BenchResult<SampleSet> {
        self.sandbox.run(inner_loop_count, self.cpus, self.output_dir)
    }
}
