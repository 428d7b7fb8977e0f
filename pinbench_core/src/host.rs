//! Host CPU power configuration
//!
//! Benchmarks are only comparable when every CPU runs at a fixed clock. While a
//! [`PerformanceMode`] is alive, every CPU found under the cpufreq hierarchy
//! runs the `performance` governor with its scaling range clamped to its own
//! hardware maximum. The settings captured on entry are written back when the
//! scope ends, whether it ends normally, through an error or through a panic.
//!
//! Layout expected under the CPU root (normally `/sys/devices/system/cpu`):
//!
//! ```text
//! cpuN/cpufreq/scaling_governor
//! cpuN/cpufreq/scaling_min_freq
//! cpuN/cpufreq/scaling_max_freq
//! cpuN/cpufreq/cpuinfo_min_freq
//! cpuN/cpufreq/cpuinfo_max_freq
//! ```

use crate::error::{BenchError, BenchResult};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the per-CPU control hierarchy on Linux
pub const DEFAULT_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Governor selected while benchmarking
pub const PERFORMANCE_GOVERNOR: &str = "performance";

const GOVERNOR: &str = "cpufreq/scaling_governor";
const SCALING_MIN: &str = "cpufreq/scaling_min_freq";
const SCALING_MAX: &str = "cpufreq/scaling_max_freq";
const HARDWARE_MIN: &str = "cpufreq/cpuinfo_min_freq";
const HARDWARE_MAX: &str = "cpufreq/cpuinfo_max_freq";

/// Governor and scaling range of one logical CPU (frequencies in kHz)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuPowerSetting {
    pub cpu: usize,
    pub governor: String,
    pub scaling_min_freq: u64,
    pub scaling_max_freq: u64,
}

/// Hardware frequency limits of one logical CPU (kHz)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrequencyRange {
    pub min: u64,
    pub max: u64,
}

/// Power settings of every CPU, in enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostPowerState {
    settings: Vec<CpuPowerSetting>,
}

impl HostPowerState {
    pub fn settings(&self) -> &[CpuPowerSetting] {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    /// True when every CPU is on the performance governor with min == max
    pub fn is_locked(&self) -> bool {
        !self.settings.is_empty()
            && self.settings.iter().all(|s| {
                s.governor == PERFORMANCE_GOVERNOR && s.scaling_min_freq == s.scaling_max_freq
            })
    }
}

/// Access to the host's CPU power controls
///
/// Mutation goes through [`HostEnvironment::begin_performance_mode`], which
/// borrows the environment mutably so the scope cannot be entered twice.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    cpu_root: PathBuf,
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_ROOT)
    }
}

impl HostEnvironment {
    pub fn new<P: Into<PathBuf>>(cpu_root: P) -> Self {
        Self {
            cpu_root: cpu_root.into(),
        }
    }

    pub fn cpu_root(&self) -> &Path {
        &self.cpu_root
    }

    /// `(index, directory)` of every `cpuN` entry, sorted by index
    pub fn cpus(&self) -> BenchResult<Vec<(usize, PathBuf)>> {
        let entries = fs::read_dir(&self.cpu_root)
            .map_err(|e| BenchError::permission_denied(&self.cpu_root, e))?;

        let mut cpus = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BenchError::permission_denied(&self.cpu_root, e))?;
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix("cpu"))
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|digits| digits.parse::<usize>().ok())
            else {
                continue;
            };
            if entry.path().is_dir() {
                cpus.push((index, entry.path()));
            }
        }

        if cpus.is_empty() {
            return Err(BenchError::NoCpusDetected(self.cpu_root.clone()));
        }
        cpus.sort_by_key(|(index, _)| *index);
        Ok(cpus)
    }

    /// Read the current governor and scaling range of every CPU
    pub fn capture(&self) -> BenchResult<HostPowerState> {
        let settings = self
            .cpus()?
            .into_iter()
            .map(|(cpu, dir)| {
                Ok(CpuPowerSetting {
                    cpu,
                    governor: read_control(&dir.join(GOVERNOR))?,
                    scaling_min_freq: read_frequency(&dir.join(SCALING_MIN))?,
                    scaling_max_freq: read_frequency(&dir.join(SCALING_MAX))?,
                })
            })
            .collect::<BenchResult<Vec<_>>>()?;
        Ok(HostPowerState { settings })
    }

    /// Hardware frequency limits of every CPU, in enumeration order
    pub fn hardware_ranges(&self) -> BenchResult<Vec<(usize, FrequencyRange)>> {
        self.cpus()?
            .into_iter()
            .map(|(cpu, dir)| {
                Ok((
                    cpu,
                    FrequencyRange {
                        min: read_frequency(&dir.join(HARDWARE_MIN))?,
                        max: read_frequency(&dir.join(HARDWARE_MAX))?,
                    },
                ))
            })
            .collect()
    }

    /// Performance governor with min == max == hardware max, for every CPU
    pub fn performance_targets(&self) -> BenchResult<Vec<CpuPowerSetting>> {
        Ok(self
            .hardware_ranges()?
            .into_iter()
            .map(|(cpu, range)| CpuPowerSetting {
                cpu,
                governor: PERFORMANCE_GOVERNOR.to_string(),
                scaling_min_freq: range.max,
                scaling_max_freq: range.max,
            })
            .collect())
    }

    /// Write the given settings, stopping at the first failure
    pub fn apply(&self, targets: &[CpuPowerSetting]) -> BenchResult<()> {
        for setting in targets {
            self.write_setting(setting)?;
            log::debug!(
                "cpu{}: governor={} scaling={}..{} kHz",
                setting.cpu,
                setting.governor,
                setting.scaling_min_freq,
                setting.scaling_max_freq
            );
        }
        Ok(())
    }

    /// Write back a captured state
    ///
    /// Every CPU is attempted even when an earlier one fails; the first
    /// failure is returned once all CPUs have been visited.
    pub fn restore(&self, state: &HostPowerState) -> BenchResult<()> {
        let mut first_error = None;
        for setting in state.settings() {
            if let Err(e) = self.write_setting(setting) {
                log::error!("Failed to restore cpu{}: {}", setting.cpu, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                log::info!("Restored power settings of {} CPUs", state.len());
                Ok(())
            }
        }
    }

    /// Capture the current state and switch every CPU to performance mode
    ///
    /// The returned guard restores the captured state when dropped; call
    /// [`PerformanceMode::restore`] to observe restoration errors.
    pub fn begin_performance_mode(&mut self) -> BenchResult<PerformanceMode<'_>> {
        let saved = self.capture()?;
        let targets = self.performance_targets()?;

        // Created before applying so a half-applied state is rolled back.
        let mode = PerformanceMode {
            host: self,
            saved,
            restored: false,
        };
        mode.host.apply(&targets)?;
        log::info!(
            "Locked {} CPUs to the '{}' governor at maximum frequency",
            targets.len(),
            PERFORMANCE_GOVERNOR
        );
        Ok(mode)
    }

    /// Run `body` in performance mode and restore the host afterwards
    ///
    /// An error from `body` wins over a restoration error; the latter is
    /// still logged.
    pub fn with_performance_mode<T, E, F>(&mut self, body: F) -> Result<T, E>
    where
        F: FnOnce(&HostPowerState) -> Result<T, E>,
        E: From<BenchError>,
    {
        let mode = self.begin_performance_mode()?;
        let outcome = body(mode.saved_state());
        let restored = mode.restore();

        match (outcome, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore_err)) => {
                log::error!("Host restoration also failed: {}", restore_err);
                Err(e)
            }
        }
    }

    fn write_setting(&self, setting: &CpuPowerSetting) -> BenchResult<()> {
        let dir = self.cpu_root.join(format!("cpu{}", setting.cpu));
        write_control(&dir.join(GOVERNOR), &setting.governor)?;

        // The kernel rejects min > max, so order the two writes against the
        // range currently in force.
        let current_max = read_frequency(&dir.join(SCALING_MAX))?;
        let min = setting.scaling_min_freq.to_string();
        let max = setting.scaling_max_freq.to_string();
        if setting.scaling_min_freq > current_max {
            write_control(&dir.join(SCALING_MAX), &max)?;
            write_control(&dir.join(SCALING_MIN), &min)?;
        } else {
            write_control(&dir.join(SCALING_MIN), &min)?;
            write_control(&dir.join(SCALING_MAX), &max)?;
        }
        Ok(())
    }
}

/// Scoped performance mode; restores the captured state on drop
#[must_use = "dropping the guard immediately restores the previous power settings"]
pub struct PerformanceMode<'a> {
    host: &'a HostEnvironment,
    saved: HostPowerState,
    restored: bool,
}

impl PerformanceMode<'_> {
    /// State captured on entry
    pub fn saved_state(&self) -> &HostPowerState {
        &self.saved
    }

    /// Restore explicitly, surfacing the first per-CPU failure
    pub fn restore(mut self) -> BenchResult<()> {
        self.restored = true;
        self.host.restore(&self.saved)
    }
}

impl Drop for PerformanceMode<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        if let Err(e) = self.host.restore(&self.saved) {
            log::error!("Host power settings were not fully restored: {}", e);
        }
    }
}

fn read_control(path: &Path) -> BenchResult<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| BenchError::permission_denied(path, e))
}

fn read_frequency(path: &Path) -> BenchResult<u64> {
    let value = read_control(path)?;
    value
        .parse::<u64>()
        .map_err(|_| BenchError::InvalidControlValue {
            path: path.to_path_buf(),
            value,
        })
}

fn write_control(path: &Path, contents: &str) -> BenchResult<()> {
    fs::write(path, contents).map_err(|e| BenchError::permission_denied(path, e))
}
