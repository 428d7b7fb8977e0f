//! Workload duration lines
//!
//! A workload prints one line per measurement, in one of three encodings:
//!
//! | line          | meaning                      |
//! |---------------|------------------------------|
//! | `2500000000ns`| total nanoseconds            |
//! | `3.2s`        | total seconds                |
//! | `4`           | total seconds                |
//!
//! Each total covers `iteration_count` inner iterations and is normalized to
//! seconds per iteration. Anything else is rejected; there is no fallback to
//! zero.

use crate::error::{BenchError, BenchResult};
use crate::sampling::SampleSet;

/// Unit encoding of a single measurement line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationFormat {
    /// `<number>ns`
    Nanoseconds,
    /// `<number>s`
    Seconds,
    /// `<number>`, read as seconds
    Bare,
}

impl DurationFormat {
    /// Split a line into its format and the numeric part
    ///
    /// `ns` is checked before `s`, so `"5ns"` never reads as `"5n"` seconds.
    pub fn detect(line: &str) -> (Self, &str) {
        if let Some(number) = line.strip_suffix("ns") {
            (DurationFormat::Nanoseconds, number)
        } else if let Some(number) = line.strip_suffix('s') {
            (DurationFormat::Seconds, number)
        } else {
            (DurationFormat::Bare, line)
        }
    }
}

/// Parse one measurement line into seconds per iteration
pub fn parse_duration_line(line: &str, iteration_count: u64) -> BenchResult<f64> {
    if iteration_count == 0 {
        return Err(BenchError::MalformedOutput(
            "iteration count must be positive".to_string(),
        ));
    }

    let trimmed = line.trim();
    let (format, number) = DurationFormat::detect(trimmed);
    let raw: f64 = number.trim().parse().map_err(|_| {
        BenchError::MalformedOutput(format!("{:?} is not a duration", line))
    })?;

    let per_iteration = match format {
        DurationFormat::Nanoseconds => raw / (iteration_count as f64 * 1e9),
        DurationFormat::Seconds | DurationFormat::Bare => raw / iteration_count as f64,
    };

    if !per_iteration.is_finite() || per_iteration <= 0.0 {
        return Err(BenchError::MalformedOutput(format!(
            "{:?} is not a positive finite duration",
            line
        )));
    }
    Ok(per_iteration)
}

/// Parse a whole stdout capture, one sample per line
///
/// Surrounding whitespace of the capture is ignored; a blank line between
/// measurements is malformed.
pub fn parse_samples(stdout: &str, iteration_count: u64) -> BenchResult<SampleSet> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Err(BenchError::MalformedOutput(
            "workload printed no measurements".to_string(),
        ));
    }

    let samples = stdout
        .lines()
        .map(|line| parse_duration_line(line, iteration_count))
        .collect::<BenchResult<Vec<f64>>>()?;
    SampleSet::new(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_detect() {
        assert_eq!(DurationFormat::detect("12ns"), (DurationFormat::Nanoseconds, "12"));
        assert_eq!(DurationFormat::detect("1.5s"), (DurationFormat::Seconds, "1.5"));
        assert_eq!(DurationFormat::detect("7"), (DurationFormat::Bare, "7"));
    }

    #[test]
    fn test_nanoseconds() {
        assert_relative_eq!(parse_duration_line("2500000000ns", 1).unwrap(), 2.5);
        assert_relative_eq!(parse_duration_line("2500000000ns", 5).unwrap(), 0.5);
    }

    #[test]
    fn test_seconds_suffix() {
        assert_relative_eq!(parse_duration_line("3.2s", 2).unwrap(), 1.6);
    }

    #[test]
    fn test_bare_seconds() {
        assert_relative_eq!(parse_duration_line("4", 4).unwrap(), 1.0);
        assert_relative_eq!(parse_duration_line("  4  \r", 4).unwrap(), 1.0);
    }

    #[test]
    fn test_malformed() {
        for line in ["abcns", "abc", "s", "ns", "", "1.0ms", "1 2", "NaN", "infs"] {
            assert!(
                matches!(
                    parse_duration_line(line, 1),
                    Err(BenchError::MalformedOutput(_))
                ),
                "{line:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_non_positive_rejected() {
        assert!(parse_duration_line("0s", 1).is_err());
        assert!(parse_duration_line("-1", 1).is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(parse_duration_line("1s", 0).is_err());
    }

    #[test]
    fn test_parse_samples_preserves_order() {
        let samples = parse_samples("1s\n2000000000ns\n3\n", 2).unwrap();
        let values = samples.values();
        assert_eq!(values.len(), 3);
        assert_relative_eq!(values[0], 0.5);
        assert_relative_eq!(values[1], 1.0);
        assert_relative_eq!(values[2], 1.5);
    }

    #[test]
    fn test_parse_samples_interior_blank_line() {
        assert!(matches!(
            parse_samples("1s\n\n2s\n", 1),
            Err(BenchError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_samples("1s\n   \n2s", 1),
            Err(BenchError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_parse_samples_surrounding_whitespace() {
        let samples = parse_samples("\n1s\n2s\n\n", 1).unwrap();
        assert_eq!(samples.values(), &[1.0, 2.0]);
    }

    #[test]
    fn test_parse_samples_empty_output() {
        assert!(matches!(
            parse_samples("\n  \n", 1),
            Err(BenchError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_parse_samples_one_bad_line_fails_all() {
        assert!(parse_samples("1s\noops\n", 1).is_err());
    }
}
