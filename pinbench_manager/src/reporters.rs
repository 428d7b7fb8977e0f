//! Concrete result reporters
//!
//! - [`JsonlReporter`] archives the job's output directory and appends one
//!   JSON row per result.
//! - [`ConsoleReporter`] prints a short coloured summary.

use crate::config::{ConsoleConfig, JsonlConfig, ReportersConfig};
use colored::*;
use pinbench_core::error::{BenchError, BenchResult};
use pinbench_core::report::format_samples;
use pinbench_core::{Reporter, RunResult};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Build the reporters named in the config; console only when none are
pub fn build_reporters(config: &ReportersConfig) -> Vec<Box<dyn Reporter>> {
    let mut reporters: Vec<Box<dyn Reporter>> = Vec::new();
    if let Some(jsonl) = &config.jsonl {
        reporters.push(Box::new(JsonlReporter::new(jsonl.clone())));
    }
    if let Some(console) = &config.console {
        reporters.push(Box::new(ConsoleReporter::new(console.clone())));
    }
    if reporters.is_empty() {
        reporters.push(Box::new(ConsoleReporter::default()));
    }
    reporters
}

/// Name of the machine the rows are recorded on
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Appends JSON rows and keeps a copy of every output directory
pub struct JsonlReporter {
    config: JsonlConfig,
    hostname: String,
}

impl JsonlReporter {
    pub fn new(config: JsonlConfig) -> Self {
        Self::with_hostname(config, local_hostname())
    }

    pub fn with_hostname<S: Into<String>>(config: JsonlConfig, hostname: S) -> Self {
        Self {
            config,
            hostname: hostname.into(),
        }
    }

    fn archive(&self, result: &RunResult) -> BenchResult<PathBuf> {
        let stamp = result.start_time.format("%Y%m%dT%H%M%S%.3f");
        let target = self
            .config
            .archive_dir
            .join(format!("{}-{}", result.job.name, stamp));
        copy_tree(&result.local_output_dir, &target).map_err(|e| {
            BenchError::reporter(
                self.name(),
                format!("archiving to {} failed: {}", target.display(), e),
            )
        })?;
        Ok(target)
    }

    fn append_row(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.config.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)?;
        writeln!(file, "{}", line)
    }
}

impl Reporter for JsonlReporter {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn log_result(&mut self, result: &RunResult) -> BenchResult<Option<String>> {
        let archived = self.archive(result)?;
        let archived = fs::canonicalize(&archived).unwrap_or(archived);
        let reference = format!("file://{}", archived.display());

        let row = result.row(&self.hostname, Some(&reference));
        let line = serde_json::to_string(&row)
            .map_err(|e| BenchError::reporter(self.name(), e.to_string()))?;
        self.append_row(&line).map_err(|e| {
            BenchError::reporter(
                self.name(),
                format!("writing {} failed: {}", self.config.path.display(), e),
            )
        })?;

        Ok(Some(reference))
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Prints one line per finished job
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    config: ConsoleConfig,
}

impl ConsoleReporter {
    pub fn new(config: ConsoleConfig) -> Self {
        Self { config }
    }

    pub fn summary_line(&self, result: &RunResult) -> String {
        let mut line = format!(
            "{} {} size={} batch={} backend={}: {:.9} s/iter ({} samples, {} iterations)",
            "[DONE]".green(),
            result.job.name.cyan().bold(),
            result.job.size,
            result.job.batch_size,
            result.job.backend_name,
            result.min_runtime_secs,
            result.all_samples.len(),
            result.inner_loop_count
        );
        if self.config.show_samples {
            line.push_str(&format!("\n    {}", format_samples(&result.all_samples).dimmed()));
        }
        line
    }
}

impl Reporter for ConsoleReporter {
    fn name(&self) -> &str {
        "console"
    }

    fn log_result(&mut self, result: &RunResult) -> BenchResult<Option<String>> {
        println!("{}", self.summary_line(result));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reporter_is_console() {
        let reporters = build_reporters(&ReportersConfig::default());
        assert_eq!(reporters.len(), 1);
        assert_eq!(reporters[0].name(), "console");
    }

    #[test]
    fn test_configured_reporters_in_order() {
        let config = ReportersConfig {
            jsonl: Some(JsonlConfig {
                path: PathBuf::from("results.jsonl"),
                archive_dir: PathBuf::from("archive"),
            }),
            console: Some(ConsoleConfig::default()),
        };
        let names: Vec<_> = build_reporters(&config)
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["jsonl", "console"]);
    }

    #[test]
    fn test_hostname_is_never_empty() {
        assert!(!local_hostname().is_empty());
    }
}
