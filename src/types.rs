use chrono::{DateTime, Utc};
use ndarray::Array1;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A complete recording block as read from a session directory.
///
/// Holds the two photometry channels at their native rate, the block's
/// wall-clock start and stop, and every event store (epocs and scalars)
/// found in the block, keyed by store name.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    /// Directory the block was read from
    pub directory: PathBuf,
    /// Name of the store read into `channel_a` (isosbestic reference, e.g. "405A")
    pub channel_a_name: String,
    /// Name of the store read into `channel_b` (calcium-dependent signal, e.g. "465A")
    pub channel_b_name: String,
    /// Reference channel samples
    pub channel_a: Array1<f64>,
    /// Signal channel samples
    pub channel_b: Array1<f64>,
    /// Common sample rate of both channels (Hz)
    pub sample_rate: f64,
    /// Wall-clock instant of the block start mark
    pub start: DateTime<Utc>,
    /// Wall-clock instant of the block stop mark
    pub stop: DateTime<Utc>,
    /// Event onsets in elapsed seconds since `start`, keyed by store name
    pub events: HashMap<String, Vec<f64>>,
}

impl RecordingSession {
    /// Returns the number of samples per channel.
    pub fn num_samples(&self) -> usize {
        self.channel_a.len()
    }

    /// Returns the duration of the recording in seconds.
    pub fn duration(&self) -> f64 {
        self.num_samples() as f64 / self.sample_rate
    }

    /// Looks up the onsets of an event store.
    ///
    /// A leading underscore in `name` is ignored, so `"_Cam1"` and `"Cam1"`
    /// refer to the same store.
    pub fn event(&self, name: &str) -> Option<&[f64]> {
        self.events
            .get(store_key(name))
            .map(|onsets| onsets.as_slice())
    }
}

/// Strips the underscore analysis tools prepend to store names starting with a digit.
pub(crate) fn store_key(name: &str) -> &str {
    name.trim_start_matches('_')
}

/// The working signal table of a session.
///
/// All columns share one length. `elapsed_seconds` is authoritative and
/// `utc_timestamp` is derived from it, see [`crate::timeline`].
#[derive(Debug, Clone)]
pub struct AnalysisTable {
    /// Wall-clock instant of each row
    pub utc_timestamp: Vec<DateTime<Utc>>,
    /// Seconds since the block start, strictly increasing
    pub elapsed_seconds: Array1<f64>,
    /// Reference channel (possibly decimated)
    pub channel_a: Array1<f64>,
    /// Signal channel (possibly decimated)
    pub channel_b: Array1<f64>,
    /// zdFF, present once the table has been normalized
    pub normalized_signal: Option<Array1<f64>>,
    /// Spacing of `elapsed_seconds` (seconds)
    pub sampling_interval: f64,
}

impl AnalysisTable {
    /// Assembles a table, checking that every column has the same length and
    /// that elapsed time strictly increases.
    pub fn new(
        utc_timestamp: Vec<DateTime<Utc>>,
        elapsed_seconds: Array1<f64>,
        channel_a: Array1<f64>,
        channel_b: Array1<f64>,
        sampling_interval: f64,
    ) -> Result<Self, PhotometryError> {
        let rows = elapsed_seconds.len();
        check_column("utc_timestamp", rows, utc_timestamp.len())?;
        check_column("channel_a", rows, channel_a.len())?;
        check_column("channel_b", rows, channel_b.len())?;

        if !(sampling_interval.is_finite() && sampling_interval > 0.0) {
            return Err(PhotometryError::Config(format!(
                "sampling interval must be positive, got {}",
                sampling_interval
            )));
        }

        if let Some(row) = elapsed_seconds
            .windows(2)
            .into_iter()
            .position(|pair| !(pair[1] > pair[0]))
        {
            return Err(PhotometryError::Alignment(format!(
                "elapsed_seconds is not strictly increasing at row {}",
                row + 1
            )));
        }

        Ok(AnalysisTable {
            utc_timestamp,
            elapsed_seconds,
            channel_a,
            channel_b,
            normalized_signal: None,
            sampling_interval,
        })
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.elapsed_seconds.len()
    }

    /// Returns true when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Effective sample rate of the table (Hz).
    pub fn sample_rate(&self) -> f64 {
        1.0 / self.sampling_interval
    }

    /// Seconds covered by the table, measured from its first row.
    pub fn duration(&self) -> f64 {
        self.len() as f64 * self.sampling_interval
    }
}

fn check_column(column: &str, expected: usize, actual: usize) -> Result<(), PhotometryError> {
    if expected != actual {
        return Err(PhotometryError::Alignment(format!(
            "column {} has {} rows, expected {}",
            column, actual, expected
        )));
    }
    Ok(())
}

/// Capture onset of each video frame, in elapsed seconds since the block start.
///
/// Index `i` is frame `i` (0-based). The spacing is not guaranteed to be even:
/// cameras drop and duplicate frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameTimestamps {
    onsets: Vec<f64>,
}

impl FrameTimestamps {
    /// Wraps a sequence of onsets, rejecting non-finite or decreasing values.
    pub fn new(onsets: Vec<f64>) -> Result<Self, PhotometryError> {
        if let Some(frame) = onsets.iter().position(|t| !t.is_finite()) {
            return Err(PhotometryError::Load(format!(
                "frame {} has a non-finite onset",
                frame
            )));
        }
        if let Some(frame) = onsets.windows(2).position(|pair| pair[1] < pair[0]) {
            return Err(PhotometryError::Load(format!(
                "frame onsets decrease at frame {}",
                frame + 1
            )));
        }
        Ok(FrameTimestamps { onsets })
    }

    /// Onset of `frame`, if it exists.
    pub fn get(&self, frame: usize) -> Option<f64> {
        self.onsets.get(frame).copied()
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.onsets.len()
    }

    /// Returns true when there are no frames.
    pub fn is_empty(&self) -> bool {
        self.onsets.is_empty()
    }

    /// All onsets in frame order.
    pub fn as_slice(&self) -> &[f64] {
        &self.onsets
    }
}

/// Axis ranges suggested to the plotting surface for a [`PlotWindow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotRanges {
    /// (min, max) of the time axis
    pub x: (f64, f64),
    /// (min, max) of the zdFF axis
    pub y: (f64, f64),
}

/// The slice of the normalized signal to draw for one rendered video frame.
///
/// Both vectors always have the same length; an empty window means
/// "nothing to draw" rather than an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotWindow {
    /// Time axis values (seconds since block start)
    pub elapsed_seconds: Vec<f64>,
    /// zdFF values
    pub signal: Vec<f64>,
}

impl PlotWindow {
    /// An empty window.
    pub fn empty() -> Self {
        PlotWindow::default()
    }

    /// Number of points in the window.
    pub fn len(&self) -> usize {
        self.elapsed_seconds.len()
    }

    /// Returns true when there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.elapsed_seconds.is_empty()
    }
}

/// Error type for loading and processing photometry sessions.
///
/// `Load` and `StoreNotFound` abort a session load, as do `Trim`,
/// `InsufficientData` and `Alignment`. Synchronization queries never return
/// an error.
#[derive(Debug, Error)]
pub enum PhotometryError {
    /// Missing or unreadable session data
    #[error("failed to load recording: {0}")]
    Load(String),
    /// A named store is not present in the block
    #[error("store '{store}' not found in {}", .directory.display())]
    StoreNotFound { store: String, directory: PathBuf },
    /// No startup cutoff can be computed
    #[error("cannot trim startup: {0}")]
    Trim(String),
    /// Too few samples remain for the normalization window
    #[error("insufficient data: need at least {required} samples, have {available}")]
    InsufficientData { required: usize, available: usize },
    /// Columns that must line up do not
    #[error("column alignment error: {0}")]
    Alignment(String),
    /// Invalid pipeline parameters
    #[error("invalid configuration: {0}")]
    Config(String),
    /// An I/O error occurred while reading
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
