//! Run command - benchmark every job of a config file

use crate::config::BenchConfig;
use crate::reporters::build_reporters;
use anyhow::{Context, Result};
use colored::*;
use pinbench_core::host::DEFAULT_CPU_ROOT;
use pinbench_core::topology::{self, format_cpu_list};
use pinbench_core::{BenchmarkSession, DockerCli, HostEnvironment, JobOutcome, SessionSummary};
use std::path::PathBuf;

/// Options of `pinbench run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: PathBuf,
    pub cpu_root: PathBuf,
    /// Leave the CPU governor and frequency range untouched
    pub skip_host_config: bool,
}

impl RunOptions {
    pub fn new<P: Into<PathBuf>>(config: P) -> Self {
        Self {
            config: config.into(),
            cpu_root: PathBuf::from(DEFAULT_CPU_ROOT),
            skip_host_config: false,
        }
    }
}

/// Load the config, run the session and print the summary
pub fn run_benchmarks(options: &RunOptions) -> Result<SessionSummary> {
    let config = BenchConfig::from_file(&options.config)
        .with_context(|| format!("Failed to load {}", options.config.display()))?;
    log::info!(
        "Loaded {} job(s) from {}",
        config.jobs.len(),
        options.config.display()
    );

    let topology = topology::resolve().context("Failed to resolve CPU topology")?;
    let docker = DockerCli::default();

    let mut session = BenchmarkSession::new(&docker).with_policy(config.sampling);
    for reporter in build_reporters(&config.reporters) {
        session = session.with_reporter(reporter);
    }
    if !options.skip_host_config {
        session = session.with_host(HostEnvironment::new(&options.cpu_root));
    }

    let summary = match session.run(&config.jobs, &topology) {
        Ok(summary) => summary,
        Err(e) if e.is_permission_denied() => {
            return Err(anyhow::Error::new(e).context(
                "Cannot change CPU power settings; run as root or pass --no-host-config",
            ))
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Benchmark session aborted")),
    };
    print_summary(&summary);
    Ok(summary)
}

pub fn print_summary(summary: &SessionSummary) {
    println!();
    println!(
        "{} (pinned to CPUs {})",
        "Benchmark summary".green().bold(),
        format_cpu_list(&summary.pinned_cpus)
    );
    for report in &summary.jobs {
        match &report.outcome {
            JobOutcome::Completed {
                min_runtime_secs,
                inner_loop_count,
                references,
                ..
            } => {
                println!(
                    "  {} {} {:.9} s/iter at {} iterations",
                    "[OK]".green(),
                    format!("{:20}", report.job).cyan(),
                    min_runtime_secs,
                    inner_loop_count
                );
                for reference in references {
                    println!("       {}", reference.dimmed());
                }
            }
            JobOutcome::Failed { error } => {
                let message = error.to_string();
                let headline = message.lines().next().unwrap_or_default();
                println!(
                    "  {} {} {}",
                    "[ERR]".red(),
                    format!("{:20}", report.job).cyan(),
                    headline.red()
                );
                if let Some(diagnostics) = error.diagnostics() {
                    for line in diagnostics.lines() {
                        println!("       {}", line.dimmed());
                    }
                }
            }
        }
    }

    let failed = summary.failures().count();
    println!();
    if failed == 0 {
        println!("{}", format!("All {} job(s) completed", summary.jobs.len()).green());
    } else {
        println!(
            "{}",
            format!("{} of {} job(s) failed", failed, summary.jobs.len()).red()
        );
    }
}
