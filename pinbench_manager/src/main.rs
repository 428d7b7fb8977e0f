use clap::{Parser, Subcommand};
use colored::*;
use pinbench_core::host::DEFAULT_CPU_ROOT;
use std::path::PathBuf;

use pinbench_manager::commands::run::RunOptions;
use pinbench_manager::{commands, logging};

#[derive(Parser)]
#[command(name = "pinbench")]
#[command(about = "PINBENCH - pinned, frequency-locked container micro-benchmarks")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark every job in a config file
    Run {
        /// Path to the TOML config
        config: PathBuf,

        /// Log every sampling step
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,

        /// Root of the per-CPU control hierarchy
        #[arg(long = "cpu-root", default_value = DEFAULT_CPU_ROOT)]
        cpu_root: PathBuf,

        /// Do not change the CPU governor or frequency range
        #[arg(long = "no-host-config")]
        no_host_config: bool,
    },

    /// Show the CPU topology and the CPUs benchmarks are pinned to
    Topology {
        /// Print JSON instead of a table
        #[arg(long = "json")]
        json: bool,
    },

    /// Check that this machine is ready to benchmark
    Doctor {
        /// Show per-CPU details
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,

        /// Root of the per-CPU control hierarchy
        #[arg(long = "cpu-root", default_value = DEFAULT_CPU_ROOT)]
        cpu_root: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match run_command(cli.command) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Returns false when the command ran but something in it failed
fn run_command(command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Run {
            config,
            verbose,
            cpu_root,
            no_host_config,
        } => {
            logging::init(verbose);
            let options = RunOptions {
                config,
                cpu_root,
                skip_host_config: no_host_config,
            };
            let summary = commands::run::run_benchmarks(&options)?;
            Ok(summary.all_succeeded())
        }
        Commands::Topology { json } => {
            logging::init(false);
            commands::topology::show_topology(json)?;
            Ok(true)
        }
        Commands::Doctor { verbose, cpu_root } => {
            logging::init(verbose);
            Ok(commands::doctor::run_doctor(&cpu_root, verbose))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::parse_from(["pinbench", "run", "bench.toml"]);
        match cli.command {
            Commands::Run {
                config,
                verbose,
                cpu_root,
                no_host_config,
            } => {
                assert_eq!(config, PathBuf::from("bench.toml"));
                assert!(!verbose);
                assert_eq!(cpu_root, PathBuf::from(DEFAULT_CPU_ROOT));
                assert!(!no_host_config);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from([
            "pinbench",
            "run",
            "bench.toml",
            "-v",
            "--cpu-root",
            "/tmp/cpu",
            "--no-host-config",
        ]);
        assert!(matches!(
            cli.command,
            Commands::Run {
                verbose: true,
                no_host_config: true,
                ..
            }
        ));
    }
}
