//! Mapping video frames onto the normalized signal.
//!
//! Every query is a pure function of its arguments and never fails: frames
//! that cannot be resolved produce an empty [`PlotWindow`] or `None`, so
//! they can run on every rendered frame without interrupting playback.

use ndarray::{s, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::types::{AnalysisTable, FrameTimestamps, PlotRanges, PlotWindow};

/// Sample rate the look-back buffer assumes unless told to use the table's own rate
pub const ASSUMED_SAMPLE_RATE_HZ: f64 = 1000.0;
/// Seconds of signal shown before the previous frame
pub const DEFAULT_LOOKBACK_SECONDS: f64 = 5.0;
/// Size of a skip-forward / skip-back step (seconds)
pub const SKIP_SECONDS: f64 = 15.0;
/// Padding added around the data by [`PlotWindow::suggested_ranges`]
pub const AXIS_PADDING: f64 = 5.0;

/// How the look-back length in samples is derived from seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferRate {
    /// A fixed rate, independent of the table's actual sampling
    Assumed(f64),
    /// The table's effective (post-decimation) sample rate
    FromTable,
}

impl Default for BufferRate {
    fn default() -> Self {
        BufferRate::Assumed(ASSUMED_SAMPLE_RATE_HZ)
    }
}

/// Parameters of a synchronization query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub lookback_seconds: f64,
    pub buffer_rate: BufferRate,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            lookback_seconds: DEFAULT_LOOKBACK_SECONDS,
            buffer_rate: BufferRate::default(),
        }
    }
}

impl SyncConfig {
    /// Look-back length in samples for a table.
    pub fn lookback_samples(&self, table: &AnalysisTable) -> usize {
        let rate = match self.buffer_rate {
            BufferRate::Assumed(rate) => rate,
            BufferRate::FromTable => table.sample_rate(),
        };
        let samples = (self.lookback_seconds * rate).round();
        if samples.is_finite() && samples > 0.0 {
            samples as usize
        } else {
            0
        }
    }
}

/// Index of the value closest to `query`; ties go to the lowest index.
///
/// NaN values are skipped. Returns `None` for an empty input or a
/// non-finite query.
pub fn nearest_index(values: ArrayView1<f64>, query: f64) -> Option<usize> {
    if !query.is_finite() {
        return None;
    }
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        let distance = (query - v).abs();
        if distance.is_nan() {
            continue;
        }
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}

/// The window of normalized signal to draw when `frame` is displayed.
///
/// The window spans from the sample nearest the previous frame, extended
/// back by the look-back buffer and clamped at row 0, up to (excluding) the
/// sample nearest the current frame. Frame 0 has no previous frame and
/// yields an empty window, as do frames past the end, a table that has not
/// been normalized, and degenerate windows.
pub fn synchronize(
    frame: usize,
    frames: &FrameTimestamps,
    table: &AnalysisTable,
    config: &SyncConfig,
) -> PlotWindow {
    let Some(signal) = table.normalized_signal.as_ref() else {
        return PlotWindow::empty();
    };
    if frame == 0 {
        return PlotWindow::empty();
    }
    let (Some(previous_second), Some(current_second)) = (frames.get(frame - 1), frames.get(frame))
    else {
        return PlotWindow::empty();
    };

    let elapsed = table.elapsed_seconds.view();
    let (Some(previous_closest), Some(current_closest)) = (
        nearest_index(elapsed, previous_second),
        nearest_index(elapsed, current_second),
    ) else {
        return PlotWindow::empty();
    };

    let start = previous_closest.saturating_sub(config.lookback_samples(table));
    if start >= current_closest {
        return PlotWindow::empty();
    }

    PlotWindow {
        elapsed_seconds: elapsed.slice(s![start..current_closest]).to_vec(),
        signal: signal.slice(s![start..current_closest]).to_vec(),
    }
}

/// Frame to show after seeking to `seconds` (e.g. from a scrub bar).
pub fn seek_frame(seconds: f64, frames: &FrameTimestamps) -> Option<usize> {
    nearest_index(ArrayView1::from(frames.as_slice()), seconds)
}

/// Frame reached by skipping `delta_seconds` from `current_frame`.
///
/// Skips that leave the recording land on the first or last frame.
pub fn step_frame(
    current_frame: usize,
    delta_seconds: f64,
    frames: &FrameTimestamps,
) -> Option<usize> {
    let last = frames.len().checked_sub(1)?;
    let now = frames.get(current_frame.min(last))?;
    seek_frame(now + delta_seconds, frames)
}

impl PlotWindow {
    /// Axis ranges for the window: `[min - 5, max + 5]` for the signal and
    /// `[min - 5, max + (max - min)]` for time.
    ///
    /// The time axis leaves as much room ahead of the newest sample as the
    /// window covers, so the trace grows into it during playback.
    pub fn suggested_ranges(&self) -> Option<PlotRanges> {
        let (x_min, x_max) = finite_bounds(&self.elapsed_seconds)?;
        let (y_min, y_max) = finite_bounds(&self.signal)?;
        Some(PlotRanges {
            x: (x_min - AXIS_PADDING, x_max + (x_max - x_min)),
            y: (y_min - AXIS_PADDING, y_max + AXIS_PADDING),
        })
    }
}

fn finite_bounds(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |bounds, v| match bounds {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Timeline;
    use chrono::{Duration, TimeZone, Utc};
    use ndarray::{array, Array1};

    /// A normalized table with `rows` rows at `interval` spacing whose signal
    /// equals the row index.
    fn table(rows: usize, interval: f64) -> AnalysisTable {
        let start = Utc.timestamp_opt(1_650_000_000, 0).unwrap();
        let stop = start + Duration::milliseconds((rows as f64 * interval * 1000.0) as i64);
        let timeline = Timeline::build(rows, interval, start, stop).unwrap();
        let zeros = Array1::zeros(rows);
        let mut table = AnalysisTable::new(
            timeline.utc_timestamp,
            timeline.elapsed_seconds,
            zeros.clone(),
            zeros,
            interval,
        )
        .unwrap();
        table.normalized_signal = Some(Array1::from_shape_fn(rows, |i| i as f64));
        table
    }

    fn frames(onsets: &[f64]) -> FrameTimestamps {
        FrameTimestamps::new(onsets.to_vec()).unwrap()
    }

    #[test]
    fn nearest_picks_the_closer_sample() {
        let elapsed = array![0.0, 0.5, 1.0, 1.5, 2.0];
        assert_eq!(nearest_index(elapsed.view(), 0.74), Some(1));
        assert_eq!(nearest_index(elapsed.view(), 0.76), Some(2));
        assert_eq!(nearest_index(elapsed.view(), -3.0), Some(0));
        assert_eq!(nearest_index(elapsed.view(), 99.0), Some(4));
    }

    #[test]
    fn nearest_breaks_ties_towards_lowest_index() {
        let elapsed = array![0.0, 1.0, 2.0];
        assert_eq!(nearest_index(elapsed.view(), 0.5), Some(0));
        let repeated = array![1.0, 1.0, 1.0];
        assert_eq!(nearest_index(repeated.view(), 1.0), Some(0));
    }

    #[test]
    fn nearest_skips_missing_values() {
        let elapsed = array![f64::NAN, 0.9, f64::NAN];
        assert_eq!(nearest_index(elapsed.view(), 0.0), Some(1));
        assert_eq!(nearest_index(array![f64::NAN].view(), 0.0), None);
        assert_eq!(nearest_index(Array1::<f64>::zeros(0).view(), 0.0), None);
        assert_eq!(nearest_index(elapsed.view(), f64::NAN), None);
    }

    #[test]
    fn window_spans_buffer_before_previous_frame() {
        // 100 Hz table, frames every 10 s
        let table = table(3000, 0.01);
        let frames = frames(&[0.0, 10.0, 20.0]);
        let window = synchronize(2, &frames, &table, &SyncConfig::default());

        // previous closest 1000, buffer 5 s * 1000 Hz = 5000 samples -> clamped to 0
        assert_eq!(window.len(), 2000);
        assert_eq!(window.signal[0], 0.0);
        assert_eq!(window.signal[1999], 1999.0);
        assert_eq!(window.elapsed_seconds.len(), window.signal.len());
    }

    #[test]
    fn buffer_is_clamped_at_zero() {
        let table = table(100, 0.01);
        let frames = frames(&[0.0, 0.03, 0.5]);
        // previous closest = 3, buffer 5000 samples
        let window = synchronize(2, &frames, &table, &SyncConfig::default());
        assert_eq!(window.signal.first(), Some(&0.0));
        assert_eq!(window.len(), 50);
    }

    #[test]
    fn buffer_can_follow_the_table_rate() {
        let table = table(3000, 0.01);
        let frames = frames(&[0.0, 10.0, 20.0]);
        let config = SyncConfig {
            lookback_seconds: 5.0,
            buffer_rate: BufferRate::FromTable,
        };
        assert_eq!(config.lookback_samples(&table), 500);
        let window = synchronize(2, &frames, &table, &config);
        assert_eq!(window.signal.first(), Some(&500.0));
        assert_eq!(window.len(), 1500);
    }

    #[test]
    fn first_frame_has_no_window() {
        let table = table(100, 0.01);
        let frames = frames(&[0.2, 0.4]);
        assert!(synchronize(0, &frames, &table, &SyncConfig::default()).is_empty());
    }

    #[test]
    fn degenerate_window_is_empty() {
        let table = table(100, 0.01);
        // duplicated frame onsets resolve to the same sample
        let frames = frames(&[0.0, 0.3, 0.3]);
        let config = SyncConfig {
            lookback_seconds: 0.0,
            buffer_rate: BufferRate::default(),
        };
        assert!(synchronize(2, &frames, &table, &config).is_empty());
    }

    #[test]
    fn frames_past_the_end_are_empty() {
        let table = table(100, 0.01);
        let frames = frames(&[0.0, 0.3]);
        assert!(synchronize(2, &frames, &table, &SyncConfig::default()).is_empty());
        assert!(synchronize(99, &frames, &table, &SyncConfig::default()).is_empty());
    }

    #[test]
    fn unnormalized_table_is_empty() {
        let mut table = table(100, 0.01);
        table.normalized_signal = None;
        let frames = frames(&[0.0, 0.3]);
        assert!(synchronize(1, &frames, &table, &SyncConfig::default()).is_empty());
    }

    #[test]
    fn seek_and_step_resolve_to_nearest_frame() {
        let frames = frames(&[0.0, 0.033, 0.067, 0.1, 15.0, 30.0]);
        assert_eq!(seek_frame(0.045, &frames), Some(1));
        assert_eq!(seek_frame(14.0, &frames), Some(4));
        assert_eq!(step_frame(0, SKIP_SECONDS, &frames), Some(4));
        assert_eq!(step_frame(5, -SKIP_SECONDS, &frames), Some(4));
        assert_eq!(step_frame(5, SKIP_SECONDS, &frames), Some(5));
        assert_eq!(step_frame(0, -SKIP_SECONDS, &frames), Some(0));
        assert_eq!(seek_frame(1.0, &FrameTimestamps::default()), None);
        assert_eq!(step_frame(0, 1.0, &FrameTimestamps::default()), None);
    }

    #[test]
    fn ranges_pad_the_data() {
        let window = PlotWindow {
            elapsed_seconds: vec![10.0, 11.0, 12.0],
            signal: vec![-1.0, 0.5, 2.0],
        };
        let ranges = window.suggested_ranges().unwrap();
        assert_eq!(ranges.x, (5.0, 14.0));
        assert_eq!(ranges.y, (-6.0, 7.0));
        assert!(PlotWindow::empty().suggested_ranges().is_none());
    }
}
