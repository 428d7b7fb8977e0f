//! Doctor command - is this machine ready to benchmark?
//!
//! Checks CPU power settings, privileges, the container runtime and the
//! topology, and reports each as OK, warning or error.

use colored::*;
use pinbench_core::host::{HostPowerState, PERFORMANCE_GOVERNOR};
use pinbench_core::topology::{self, format_cpu_list, physical_core_zero_cpus};
use pinbench_core::{DockerCli, HostEnvironment};
use std::path::Path;

/// Represents a diagnostic check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

/// Tally of the checks printed so far
#[derive(Debug, Default)]
pub struct CheckReport {
    pub warnings: usize,
    pub errors: usize,
}

impl CheckReport {
    /// Count `status` and return the rendered line
    pub fn record(&mut self, name: &str, status: CheckStatus, detail: &str) -> String {
        let (tag, detail) = match status {
            CheckStatus::Ok => ("[OK]".green(), detail.normal()),
            CheckStatus::Warning => {
                self.warnings += 1;
                ("[WARN]".yellow(), detail.yellow())
            }
            CheckStatus::Error => {
                self.errors += 1;
                ("[ERR]".red(), detail.red())
            }
        };
        format!("  {:<6} {} {}", tag, format!("{:20}", name).cyan(), detail)
    }

    fn check(&mut self, name: &str, (status, detail): (CheckStatus, String)) {
        println!("{}", self.record(name, status, &detail));
    }

    pub fn passed(&self) -> bool {
        self.errors == 0
    }
}

/// Run all checks; returns true when none of them errored
pub fn run_doctor(cpu_root: &Path, verbose: bool) -> bool {
    println!("{}", "PINBENCH System Diagnostics".green().bold());
    println!();

    let mut report = CheckReport::default();
    report.check("Privileges", check_privileges());

    let host = HostEnvironment::new(cpu_root);
    match host.capture() {
        Ok(state) => {
            report.check("CPU governor", check_governors(&state, verbose));
            report.check("CPU frequency", check_frequency_range(&state, verbose));
        }
        Err(e) => report.check("CPU power controls", (CheckStatus::Error, e.to_string())),
    }

    report.check("Docker", check_container_runtime(&DockerCli::default()));

    match topology::resolve() {
        Ok(table) => {
            report.check(
                "Topology",
                (
                    CheckStatus::Ok,
                    format!(
                        "{} logical CPUs, {} cores, {} NUMA node(s)",
                        table.logical_cpus().len(),
                        table.physical_core_count(),
                        table.numa_node_count()
                    ),
                ),
            );
            let pinning = match physical_core_zero_cpus(&table) {
                Ok(cpus) => (CheckStatus::Ok, format!("CPUs {}", format_cpu_list(&cpus))),
                Err(e) => (CheckStatus::Error, e.to_string()),
            };
            report.check("Pinning set", pinning);
        }
        Err(e) => report.check("Topology", (CheckStatus::Error, e.to_string())),
    }

    println!();
    if report.errors > 0 {
        println!("{} error(s), {} warning(s)", report.errors, report.warnings);
        println!(
            "  {} Benchmarks will fail until the errors are fixed",
            "Tip:".dimmed()
        );
    } else if report.warnings > 0 {
        println!("{} warning(s), no errors", report.warnings);
        println!(
            "  {} `pinbench run` locks CPU frequencies itself when run as root",
            "Note:".dimmed()
        );
    } else {
        println!("{}", "All checks passed!".green());
    }

    report.passed()
}

fn check_privileges() -> (CheckStatus, String) {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        (CheckStatus::Ok, "running as root".to_string())
    } else {
        (
            CheckStatus::Warning,
            format!("uid {}: CPU frequency settings cannot be changed", euid),
        )
    }
}

/// Every CPU must be on the performance governor
pub fn check_governors(state: &HostPowerState, verbose: bool) -> (CheckStatus, String) {
    let off: Vec<String> = state
        .settings()
        .iter()
        .filter(|s| s.governor != PERFORMANCE_GOVERNOR)
        .map(|s| {
            if verbose {
                format!("cpu{}={}", s.cpu, s.governor)
            } else {
                format!("cpu{}", s.cpu)
            }
        })
        .collect();

    if off.is_empty() {
        (
            CheckStatus::Ok,
            format!("{} on all {} CPUs", PERFORMANCE_GOVERNOR, state.len()),
        )
    } else {
        (
            CheckStatus::Warning,
            format!("not '{}': {}", PERFORMANCE_GOVERNOR, off.join(", ")),
        )
    }
}

/// Every CPU must have a fixed frequency (min == max)
pub fn check_frequency_range(state: &HostPowerState, verbose: bool) -> (CheckStatus, String) {
    let floating: Vec<String> = state
        .settings()
        .iter()
        .filter(|s| s.scaling_min_freq != s.scaling_max_freq)
        .map(|s| {
            if verbose {
                format!(
                    "cpu{}={}..{} kHz",
                    s.cpu, s.scaling_min_freq, s.scaling_max_freq
                )
            } else {
                format!("cpu{}", s.cpu)
            }
        })
        .collect();

    if floating.is_empty() {
        (CheckStatus::Ok, "fixed on all CPUs".to_string())
    } else {
        (
            CheckStatus::Warning,
            format!("scaling range not fixed: {}", floating.join(", ")),
        )
    }
}

fn check_container_runtime(docker: &DockerCli) -> (CheckStatus, String) {
    match docker.server_version() {
        Ok(version) => (CheckStatus::Ok, format!("server {}", version)),
        Err(e) => (CheckStatus::Error, e.to_string()),
    }
}
