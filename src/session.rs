use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::decimate::decimate_pair;
use crate::normalize::calculate_zdff;
use crate::reader;
use crate::sync::{seek_frame, step_frame, synchronize, SyncConfig};
use crate::timeline::build_table;
use crate::trim::trim_startup;
use crate::types::*;

/// Everything derived from one session directory.
///
/// Built once by [`Session::open`] and then only read; queries borrow it
/// immutably and may run from any thread.
#[derive(Debug, Clone)]
pub struct Session {
    pub directory: PathBuf,
    /// Native sample rate of the photometry channels (Hz)
    pub raw_sample_rate: f64,
    pub table: AnalysisTable,
    /// Camera onsets, when a camera store is configured
    pub frames: Option<FrameTimestamps>,
    pub sync: SyncConfig,
}

impl Session {
    /// Runs the whole pipeline on a block directory.
    ///
    /// Load, decimate, build the timeline, apply the startup trim (if enabled),
    /// normalize, then read the camera onsets. Any failure aborts the load.
    pub fn open<P: AsRef<Path>>(
        directory: P,
        config: &PipelineConfig,
    ) -> Result<Self, PhotometryError> {
        let tic = Instant::now();
        config.validate()?;
        let directory = directory.as_ref();

        let recording =
            reader::load_session(directory, &config.stores.channel_a, &config.stores.channel_b)?;
        let table = analysis_table(&recording, config)?;

        let frames = match &config.stores.camera {
            Some(camera) => Some(reader::load_frame_timestamps(directory, camera)?),
            None => None,
        };

        log::info!(
            "Session ready: {} rows at {:.3} Hz, {} frames ({:.1} seconds)",
            table.len(),
            table.sample_rate(),
            frames.as_ref().map(|f| f.len()).unwrap_or(0),
            tic.elapsed().as_secs_f64()
        );

        Ok(Session {
            directory: directory.to_path_buf(),
            raw_sample_rate: recording.sample_rate,
            table,
            frames,
            sync: config.sync,
        })
    }

    /// Plot window for a displayed frame; empty without camera onsets.
    pub fn window_at(&self, frame: usize) -> PlotWindow {
        match &self.frames {
            Some(frames) => synchronize(frame, frames, &self.table, &self.sync),
            None => PlotWindow::empty(),
        }
    }

    /// Frame to display after seeking to `seconds`.
    pub fn seek(&self, seconds: f64) -> Option<usize> {
        seek_frame(seconds, self.frames.as_ref()?)
    }

    /// Frame reached by skipping `delta_seconds` from `current_frame`.
    pub fn step(&self, current_frame: usize, delta_seconds: f64) -> Option<usize> {
        step_frame(current_frame, delta_seconds, self.frames.as_ref()?)
    }
}

/// Decimates, builds the timeline, trims and normalizes a recording.
pub fn analysis_table(
    recording: &RecordingSession,
    config: &PipelineConfig,
) -> Result<AnalysisTable, PhotometryError> {
    let (channel_a, channel_b, interval) = decimate_pair(
        &recording.channel_a,
        &recording.channel_b,
        recording.sample_rate,
        config.decimation.effective_factor(),
    )?;
    let mut table = build_table(recording, channel_a, channel_b, interval)?;

    if config.trim.enabled {
        let onsets = recording.event(&config.trim.event_store).ok_or_else(|| {
            PhotometryError::StoreNotFound {
                store: config.trim.event_store.clone(),
                directory: recording.directory.clone(),
            }
        })?;
        let sample_rate = table.sample_rate();
        table = trim_startup(table, onsets, sample_rate, config.trim.settle_seconds)?;
    }

    calculate_zdff(
        table,
        config.normalization.n_remove,
        config.normalization.edge_trim,
        &config.normalization.baseline_params(),
    )
}

/// Holder of the currently open session.
///
/// A reload replaces the session only when it succeeds; on failure the
/// previous session stays current.
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: Option<Arc<Session>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        SessionSlot::default()
    }

    /// Opens `directory` and makes it the current session.
    pub fn open<P: AsRef<Path>>(
        &mut self,
        directory: P,
        config: &PipelineConfig,
    ) -> Result<Arc<Session>, PhotometryError> {
        match Session::open(directory.as_ref(), config) {
            Ok(session) => {
                let session = Arc::new(session);
                self.current = Some(Arc::clone(&session));
                Ok(session)
            }
            Err(e) => {
                log::warn!(
                    "Failed to open {}: {}; keeping the previous session",
                    directory.as_ref().display(),
                    e
                );
                Err(e)
            }
        }
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.clone()
    }

    pub fn close(&mut self) {
        self.current = None;
    }
}
