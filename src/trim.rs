//! Truncation of the analysis table at a cutoff derived from the LED onsets.

use ndarray::{s, Array1};

use crate::types::{AnalysisTable, PhotometryError};

/// Seconds kept clear after the last LED onset by default
pub const DEFAULT_SETTLE_SECONDS: f64 = 5.0;

/// End of the retained rows: `ceil(max(onsets) * fs) + ceil(settle_seconds * fs)`.
pub fn startup_cutoff(
    onsets: &[f64],
    sample_rate: f64,
    settle_seconds: f64,
) -> Result<usize, PhotometryError> {
    if onsets.is_empty() {
        return Err(PhotometryError::Trim(
            "no onset events to compute a startup cutoff".to_string(),
        ));
    }
    if onsets.iter().any(|t| !t.is_finite()) {
        return Err(PhotometryError::Trim(
            "onset events contain non-finite times".to_string(),
        ));
    }
    if !(sample_rate.is_finite() && sample_rate > 0.0) || !(settle_seconds >= 0.0) {
        return Err(PhotometryError::Config(format!(
            "invalid trim parameters: fs = {}, settle = {}",
            sample_rate, settle_seconds
        )));
    }

    let last_onset = onsets.iter().copied().fold(f64::MIN, f64::max).max(0.0);
    let onset_sample = samples_in(last_onset, sample_rate)?;
    let settle_samples = samples_in(settle_seconds, sample_rate)?;
    onset_sample.checked_add(settle_samples).ok_or_else(|| {
        PhotometryError::Trim(format!(
            "startup cutoff overflows: last onset {} s, settle {} s at {} Hz",
            last_onset, settle_seconds, sample_rate
        ))
    })
}

/// `ceil(seconds * fs)` as a row count.
fn samples_in(seconds: f64, sample_rate: f64) -> Result<usize, PhotometryError> {
    let samples = (seconds * sample_rate).ceil();
    if !samples.is_finite() || samples >= usize::MAX as f64 {
        return Err(PhotometryError::Trim(format!(
            "{} s at {} Hz is not a usable row count",
            seconds, sample_rate
        )));
    }
    Ok(samples as usize)
}

/// Truncates the table to the rows `[0, cutoff)`.
///
/// Rows keep their elapsed time and order. A cutoff at or past the end of
/// the table leaves it unchanged; a cutoff of 0 would leave nothing and fails.
pub fn trim_startup(
    table: AnalysisTable,
    onsets: &[f64],
    sample_rate: f64,
    settle_seconds: f64,
) -> Result<AnalysisTable, PhotometryError> {
    let cutoff = startup_cutoff(onsets, sample_rate, settle_seconds)?;
    if cutoff == 0 {
        return Err(PhotometryError::Trim(
            "startup cutoff at row 0 leaves an empty table".to_string(),
        ));
    }
    if cutoff >= table.len() {
        log::warn!(
            "Startup cutoff at row {} is past the end of a {}-row table; nothing trimmed",
            cutoff,
            table.len()
        );
        return Ok(table);
    }

    log::debug!(
        "Keeping rows before {} ({:.3} s), dropping {}",
        cutoff,
        cutoff as f64 / sample_rate,
        table.len() - cutoff
    );
    Ok(keep_prefix(table, cutoff))
}

fn keep_prefix(table: AnalysisTable, rows: usize) -> AnalysisTable {
    let head = |column: &Array1<f64>| column.slice(s![..rows]).to_owned();
    AnalysisTable {
        utc_timestamp: table.utc_timestamp[..rows].to_vec(),
        elapsed_seconds: head(&table.elapsed_seconds),
        channel_a: head(&table.channel_a),
        channel_b: head(&table.channel_b),
        normalized_signal: table.normalized_signal.as_ref().map(head),
        sampling_interval: table.sampling_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Timeline;
    use chrono::{Duration, TimeZone, Utc};

    fn table(rows: usize, interval: f64) -> AnalysisTable {
        let start = Utc.timestamp_opt(1_650_000_000, 0).unwrap();
        let stop = start + Duration::milliseconds((rows as f64 * interval * 1000.0) as i64);
        let timeline = Timeline::build(rows, interval, start, stop).unwrap();
        let ramp = Array1::from_shape_fn(rows, |i| i as f64);
        AnalysisTable::new(
            timeline.utc_timestamp,
            timeline.elapsed_seconds,
            ramp.clone(),
            ramp,
            interval,
        )
        .unwrap()
    }

    #[test]
    fn cutoff_uses_last_onset_plus_settle() {
        assert_eq!(startup_cutoff(&[1.0, 2.5], 1000.0, 5.0).unwrap(), 7500);
        assert_eq!(startup_cutoff(&[2.5, 1.0], 1000.0, 5.0).unwrap(), 7500);
    }

    #[test]
    fn cutoff_rounds_partial_samples_up() {
        assert_eq!(startup_cutoff(&[0.0015], 1000.0, 0.0).unwrap(), 2);
    }

    #[test]
    fn empty_onsets_fail() {
        assert!(matches!(
            startup_cutoff(&[], 1000.0, 5.0),
            Err(PhotometryError::Trim(_))
        ));
    }

    #[test]
    fn trim_keeps_exactly_the_rows_before_cutoff() {
        let trimmed = trim_startup(table(10000, 0.001), &[1.0, 2.5], 1000.0, 5.0).unwrap();
        assert_eq!(trimmed.len(), 7500);
        assert_eq!(trimmed.utc_timestamp.len(), 7500);
        assert_eq!(trimmed.channel_a.len(), 7500);
        assert_eq!(trimmed.channel_b.len(), 7500);
        // rows keep their values, order and elapsed time
        assert_eq!(trimmed.channel_a[0], 0.0);
        assert_eq!(trimmed.channel_a[7499], 7499.0);
        assert_eq!(trimmed.elapsed_seconds[0], 0.0);
        assert!((trimmed.elapsed_seconds[7499] - 7.499).abs() < 1e-9);
    }

    #[test]
    fn cutoff_past_end_keeps_the_whole_table() {
        let trimmed = trim_startup(table(5000, 0.001), &[2.5], 1000.0, 5.0).unwrap();
        assert_eq!(trimmed.len(), 5000);
        assert_eq!(trimmed.channel_a[4999], 4999.0);
    }

    #[test]
    fn zero_cutoff_fails() {
        let err = trim_startup(table(100, 0.001), &[0.0], 1000.0, 0.0).unwrap_err();
        assert!(matches!(err, PhotometryError::Trim(_)));
    }

    #[test]
    fn huge_onset_fails_instead_of_overflowing() {
        assert!(matches!(
            startup_cutoff(&[1.0e300], 1000.0, 5.0),
            Err(PhotometryError::Trim(_))
        ));
        // each term fits, the sum does not
        let near_max = (usize::MAX / 2) as f64;
        assert!(matches!(
            startup_cutoff(&[near_max], 1.0, near_max * 1.5),
            Err(PhotometryError::Trim(_))
        ));
    }
}
