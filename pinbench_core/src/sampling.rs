//! Adaptive sampling controller
//!
//! Short timed intervals are dominated by timer overhead and scheduler noise.
//! Rather than relaunching the sandbox for every attempt, the controller asks
//! the workload to run more inner iterations per measurement until each
//! measurement covers at least `min_runtime_secs` of wall time.

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};

/// Default minimum inner-loop count, and starting point of the search
pub const DEFAULT_MIN_SAMPLES: usize = 5;
/// Default minimum wall time a single measurement must cover
pub const DEFAULT_MIN_RUNTIME_SECS: f64 = 5.0;
/// Bounds on the per-round multiplicative growth of the inner-loop count
pub const MIN_GROWTH_FACTOR: f64 = 2.0;
pub const MAX_GROWTH_FACTOR: f64 = 100.0;

/// Seconds per iteration, one value per measurement, in reported order
///
/// Never empty; every value is finite and strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSet(Vec<f64>);

impl SampleSet {
    pub fn new(values: Vec<f64>) -> BenchResult<Self> {
        if values.is_empty() {
            return Err(BenchError::MalformedOutput("empty sample set".to_string()));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v <= 0.0) {
            return Err(BenchError::MalformedOutput(format!(
                "sample {} is not a positive duration",
                bad
            )));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fastest per-iteration time
    pub fn min(&self) -> f64 {
        self.0.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

/// Thresholds that decide when a sample set is trustworthy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingPolicy {
    pub min_samples: usize,
    pub min_runtime_secs: f64,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            min_runtime_secs: DEFAULT_MIN_RUNTIME_SECS,
        }
    }
}

impl SamplingPolicy {
    pub fn validate(&self) -> BenchResult<()> {
        if self.min_samples == 0 {
            return Err(BenchError::config("sampling.min_samples must be at least 1"));
        }
        if !self.min_runtime_secs.is_finite() || self.min_runtime_secs <= 0.0 {
            return Err(BenchError::config(
                "sampling.min_runtime_secs must be a positive number of seconds",
            ));
        }
        Ok(())
    }

    /// Every measurement covers at least `min_runtime_secs` of wall time
    pub fn is_sufficient(&self, samples: &SampleSet, inner_loop_count: u64) -> bool {
        !samples.is_empty()
            && samples
                .values()
                .iter()
                .all(|s| s * inner_loop_count as f64 >= self.min_runtime_secs)
    }

    /// Multiplier for the next round, projected from the first sample only
    pub fn growth_factor(&self, samples: &SampleSet) -> f64 {
        samples
            .values()
            .first()
            .map_or(MAX_GROWTH_FACTOR, |first| {
                (self.min_runtime_secs / first).clamp(MIN_GROWTH_FACTOR, MAX_GROWTH_FACTOR)
            })
    }
}

/// Something that can execute a workload with a given inner-loop count
pub trait JobRunner {
    fn run(&mut self, inner_loop_count: u64) -> BenchResult<SampleSet>;
}

impl<F> JobRunner for F
where
    F: FnMut(u64) -> BenchResult<SampleSet>,
{
    fn run(&mut self, inner_loop_count: u64) -> BenchResult<SampleSet> {
        self(inner_loop_count)
    }
}

/// Outcome of [`run_to_sufficiency`]
#[derive(Debug, Clone, PartialEq)]
pub struct SampledRun {
    pub samples: SampleSet,
    /// Inner-loop count of the accepted round
    pub inner_loop_count: u64,
    /// Number of runner invocations, accepted round included
    pub rounds: usize,
}

/// Grow the inner-loop count until every measurement is long enough
///
/// Runner errors propagate immediately; nothing is retried.
pub fn run_to_sufficiency<R>(runner: &mut R, policy: &SamplingPolicy) -> BenchResult<SampledRun>
where
    R: JobRunner + ?Sized,
{
    policy.validate()?;

    let mut inner_loop_count = policy.min_samples as u64;
    let mut rounds = 0;
    loop {
        rounds += 1;
        let samples = runner.run(inner_loop_count)?;
        log::info!(
            "inner_loop_count={}, samples={:?}",
            inner_loop_count,
            samples.values()
        );

        if policy.is_sufficient(&samples, inner_loop_count) {
            return Ok(SampledRun {
                samples,
                inner_loop_count,
                rounds,
            });
        }

        let factor = policy.growth_factor(&samples);
        let next = (inner_loop_count as f64 * factor).ceil();
        if next >= u64::MAX as f64 {
            return Err(BenchError::SamplingDiverged { inner_loop_count });
        }
        log::debug!(
            "Round {} too short, growing inner loop count by {:.2}x",
            rounds,
            factor
        );
        inner_loop_count = next as u64;
    }
}
