mod reader;
pub mod config;
pub mod decimate;
pub mod normalize;
pub mod session;
pub mod sync;
pub mod timeline;
pub mod trim;
pub mod types;

use std::path::Path;

// Re-export types
pub use config::{load_config, save_config, PipelineConfig};
pub use session::{Session, SessionSlot};
pub use sync::{nearest_index, seek_frame, step_frame, synchronize, BufferRate, SyncConfig};
pub use types::*;

/// Loads the two photometry channels, timing and event stores of a TDT block.
///
/// # Examples
///
/// ```no_run
/// use photometry_sync::load_session;
///
/// let result = load_session("path/to/block", "_405A", "_465A");
/// match result {
///     Ok(recording) => println!("Sample rate: {} Hz", recording.sample_rate),
///     Err(e) => println!("Error loading block: {}", e),
/// }
/// ```
pub fn load_session<P: AsRef<Path>>(
    directory: P,
    channel_a: &str,
    channel_b: &str,
) -> Result<RecordingSession, PhotometryError> {
    reader::load_session(directory, channel_a, channel_b)
}

/// Loads the capture onset of every frame of a camera.
///
/// # Examples
///
/// ```no_run
/// use photometry_sync::load_frame_timestamps;
///
/// let frames = load_frame_timestamps("path/to/block", "Cam1").unwrap();
/// println!("{} frames", frames.len());
/// ```
pub fn load_frame_timestamps<P: AsRef<Path>>(
    directory: P,
    camera: &str,
) -> Result<FrameTimestamps, PhotometryError> {
    reader::load_frame_timestamps(directory, camera)
}

/// Runs the full pipeline on a block directory.
///
/// # Examples
///
/// ```no_run
/// use photometry_sync::{open_session, PipelineConfig};
///
/// let session = open_session("path/to/block", &PipelineConfig::default()).unwrap();
/// let window = session.window_at(120);
/// if let Some(ranges) = window.suggested_ranges() {
///     println!("x: {:?}, y: {:?}", ranges.x, ranges.y);
/// }
/// ```
pub fn open_session<P: AsRef<Path>>(
    directory: P,
    config: &PipelineConfig,
) -> Result<Session, PhotometryError> {
    Session::open(directory, config)
}
