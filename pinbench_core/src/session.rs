//! Benchmark session: the top-level run loop
//!
//! ```text
//! topology -> pinning set
//! prepare every job (image builds, host untouched)
//! enter performance mode
//!     for each prepared job, sequentially:
//!         temp output dir -> sample to sufficiency -> reporters
//! restore host
//! ```
//!
//! A failure inside one job ends that job only. Host restoration always runs.

use crate::error::{BenchError, BenchResult};
use crate::host::{HostEnvironment, HostPowerState};
use crate::job::JobSpec;
use crate::report::{Reporter, RunResult};
use crate::runtime::ContainerRuntime;
use crate::sampling::{run_to_sufficiency, SampleSet, SamplingPolicy};
use crate::sandbox::{JobSandbox, SandboxRunner};
use crate::topology::{format_cpu_list, physical_core_zero_cpus, TopologyTable};
use std::collections::BTreeSet;

/// What happened to one job
#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        samples: SampleSet,
        min_runtime_secs: f64,
        inner_loop_count: u64,
        /// References returned by reporters
        references: Vec<String>,
    },
    Failed {
        error: BenchError,
    },
}

#[derive(Debug)]
pub struct JobReport {
    pub job: String,
    pub outcome: JobOutcome,
}

impl JobReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }
}

/// Per-job outcomes, in job order
#[derive(Debug)]
pub struct SessionSummary {
    pub pinned_cpus: BTreeSet<usize>,
    pub jobs: Vec<JobReport>,
}

impl SessionSummary {
    pub fn all_succeeded(&self) -> bool {
        self.jobs.iter().all(JobReport::is_completed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|r| !r.is_completed())
    }
}

/// Runs a list of jobs against one container runtime
pub struct BenchmarkSession<'a> {
    runtime: &'a dyn ContainerRuntime,
    policy: SamplingPolicy,
    reporters: Vec<Box<dyn Reporter + 'a>>,
    host: Option<HostEnvironment>,
}

impl<'a> BenchmarkSession<'a> {
    /// Session with the default policy, no reporters and no host control
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self {
            runtime,
            policy: SamplingPolicy::default(),
            reporters: Vec::new(),
            host: None,
        }
    }

    pub fn with_policy(mut self, policy: SamplingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn Reporter + 'a>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Lock CPU frequencies through `host` for the duration of each run
    pub fn with_host(mut self, host: HostEnvironment) -> Self {
        self.host = Some(host);
        self
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    /// Benchmark every job on the CPUs of physical core 0
    ///
    /// Errors only for problems that affect the whole pass: no pinning set,
    /// invalid policy, or host configuration that could not be entered or
    /// restored. Per-job failures land in the summary.
    pub fn run(&mut self, jobs: &[JobSpec], topology: &TopologyTable) -> BenchResult<SessionSummary> {
        self.policy.validate()?;
        let cpus = physical_core_zero_cpus(topology)?;
        log::info!(
            "First physical core corresponds to logical CPUs: {}",
            format_cpu_list(&cpus)
        );

        let mut slots = Vec::with_capacity(jobs.len());
        for job in jobs {
            log::info!("Preparing job {}", job.name);
            let mut sandbox = JobSandbox::new(self.runtime, job);
            let slot = match job.validate().and_then(|_| sandbox.prepare().map(|_| ())) {
                Ok(()) => Ok(sandbox),
                Err(error) => {
                    log::error!("Skipping job {}: {}", job.name, error);
                    Err(error)
                }
            };
            slots.push(slot);
        }

        let policy = &self.policy;
        let reporters = &mut self.reporters;
        let body = |saved: &HostPowerState| -> BenchResult<Vec<JobOutcome>> {
            if saved.is_locked() {
                log::debug!("CPU clocks were already locked before this pass");
            }
            let outcomes = slots
                .into_iter()
                .map(|slot| match slot {
                    Ok(mut sandbox) => {
                        log::info!("Running job {}", sandbox.job().name);
                        run_job(&mut sandbox, &cpus, policy, reporters).unwrap_or_else(|error| {
                            log::error!("Job {} failed: {}", sandbox.job().name, error);
                            JobOutcome::Failed { error }
                        })
                    }
                    Err(error) => JobOutcome::Failed { error },
                })
                .collect();
            Ok(outcomes)
        };

        let outcomes = match self.host.as_mut() {
            Some(host) => host.with_performance_mode(body)?,
            None => {
                log::warn!("Host power settings left unchanged; timings may be noisy");
                body(&HostPowerState::default())?
            }
        };

        let jobs = jobs
            .iter()
            .zip(outcomes)
            .map(|(job, outcome)| JobReport {
                job: job.name.clone(),
                outcome,
            })
            .collect();

        Ok(SessionSummary {
            pinned_cpus: cpus,
            jobs,
        })
    }
}

fn run_job(
    sandbox: &mut JobSandbox<'_>,
    cpus: &BTreeSet<usize>,
    policy: &SamplingPolicy,
    reporters: &mut [Box<dyn Reporter + '_>],
) -> BenchResult<JobOutcome> {
    let output_dir = tempfile::Builder::new().prefix("pinbench-").tempdir()?;
    log::debug!(
        "Temporary output directory is {}",
        output_dir.path().display()
    );

    let start_time = chrono::Local::now();
    let mut runner = SandboxRunner::new(sandbox, cpus, output_dir.path());
    let sampled = run_to_sufficiency(&mut runner, policy)?;

    let result = RunResult {
        start_time,
        job: sandbox.job().clone(),
        min_runtime_secs: sampled.samples.min(),
        all_samples: sampled.samples,
        inner_loop_count: sampled.inner_loop_count,
        is_realtime: false,
        local_output_dir: output_dir.path().to_path_buf(),
    };

    let mut references = Vec::new();
    let mut first_error = None;
    for reporter in reporters.iter_mut() {
        match reporter.log_result(&result) {
            Ok(Some(reference)) => {
                log::info!("{} recorded {} at {}", reporter.name(), result.job.name, reference);
                references.push(reference);
            }
            Ok(None) => log::debug!("{} recorded {}", reporter.name(), result.job.name),
            Err(e) => {
                log::error!("{} failed for {}: {}", reporter.name(), result.job.name, e);
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(JobOutcome::Completed {
        min_runtime_secs: result.min_runtime_secs,
        samples: result.all_samples,
        inner_loop_count: result.inner_loop_count,
        references,
    })
}
