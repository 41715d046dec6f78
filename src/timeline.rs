//! Time columns of the analysis table.
//!
//! Elapsed seconds are generated first by arithmetic stepping and the
//! wall-clock column is derived from them, so both always have the same
//! number of rows.

use chrono::{DateTime, Duration, Utc};
use ndarray::Array1;

use crate::types::{AnalysisTable, PhotometryError, RecordingSession};

/// Drift between the computed end of the timeline and the stop mark that is
/// still considered normal (seconds)
const STOP_DRIFT_TOLERANCE: f64 = 1.0;

/// The two time columns of an analysis table.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub utc_timestamp: Vec<DateTime<Utc>>,
    pub elapsed_seconds: Array1<f64>,
}

impl Timeline {
    /// Builds `sample_count` rows spaced `interval` seconds apart, starting at `start`.
    ///
    /// `stop` is only used as a consistency check; a mismatch larger than a
    /// second is logged.
    pub fn build(
        sample_count: usize,
        interval: f64,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Self, PhotometryError> {
        if !(interval.is_finite() && interval > 0.0) {
            return Err(PhotometryError::Config(format!(
                "sampling interval must be positive, got {}",
                interval
            )));
        }

        let elapsed_seconds = Array1::from_shape_fn(sample_count, |i| i as f64 * interval);
        let utc_timestamp = elapsed_seconds
            .iter()
            .map(|&seconds| start + seconds_to_duration(seconds))
            .collect();

        let end = start + seconds_to_duration(sample_count as f64 * interval);
        let drift = (stop - end).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
        if drift.abs() > STOP_DRIFT_TOLERANCE {
            log::warn!(
                "Timeline ends at {} but the block stopped at {} ({:+.3} s)",
                end,
                stop,
                drift
            );
        }

        Ok(Timeline {
            utc_timestamp,
            elapsed_seconds,
        })
    }

    pub fn len(&self) -> usize {
        self.elapsed_seconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elapsed_seconds.is_empty()
    }
}

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::nanoseconds((seconds * 1e9).round() as i64)
}

/// Assembles the analysis table from (possibly decimated) channels of a session.
pub fn build_table(
    session: &RecordingSession,
    channel_a: Array1<f64>,
    channel_b: Array1<f64>,
    interval: f64,
) -> Result<AnalysisTable, PhotometryError> {
    let timeline = Timeline::build(channel_a.len(), interval, session.start, session.stop)?;
    AnalysisTable::new(
        timeline.utc_timestamp,
        timeline.elapsed_seconds,
        channel_a,
        channel_b,
        interval,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_650_000_000, 0).unwrap()
    }

    #[test]
    fn columns_have_equal_length() {
        // 0.1 s steps over 10 s is the case where np.arange overshoots
        let timeline = Timeline::build(100, 0.1, start(), start() + Duration::seconds(10)).unwrap();
        assert_eq!(timeline.len(), 100);
        assert_eq!(timeline.utc_timestamp.len(), 100);
    }

    #[test]
    fn elapsed_steps_by_interval() {
        let timeline = Timeline::build(5, 0.01, start(), start() + Duration::milliseconds(50)).unwrap();
        for (i, &t) in timeline.elapsed_seconds.iter().enumerate() {
            assert_abs_diff_eq!(t, i as f64 * 0.01, epsilon = 1e-15);
        }
        assert_eq!(timeline.elapsed_seconds[0], 0.0);
    }

    #[test]
    fn wall_clock_follows_elapsed() {
        let timeline = Timeline::build(4, 0.25, start(), start() + Duration::seconds(1)).unwrap();
        assert_eq!(timeline.utc_timestamp[0], start());
        assert_eq!(timeline.utc_timestamp[3], start() + Duration::milliseconds(750));
        assert!(timeline
            .utc_timestamp
            .windows(2)
            .all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn empty_timeline_is_allowed() {
        let timeline = Timeline::build(0, 0.01, start(), start()).unwrap();
        assert!(timeline.is_empty());
    }

    #[test]
    fn non_positive_interval_is_rejected() {
        assert!(Timeline::build(10, 0.0, start(), start()).is_err());
        assert!(Timeline::build(10, f64::NAN, start(), start()).is_err());
    }
}
