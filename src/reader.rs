use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use ndarray::Array1;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::types::*;

// Index record layout (from the TDT tank format)
const TSQ_RECORD_BYTES: u64 = 40;
const TSQ_HEADER_WORDS: i32 = 10;

// Record types, compared after masking with EVTYPE_MASK
const EVTYPE_MASK: i32 = 0xFF0F;
const EVTYPE_STRON: i32 = 0x0101;
const EVTYPE_SCALAR: i32 = 0x0201;
const EVTYPE_STREAM: i32 = 0x8101;
const EVTYPE_MARK: i32 = 0x8801;

// Codes carried by EVTYPE_MARK records
const EVMARK_STARTBLOCK: u32 = 0x0001;
const EVMARK_STOPBLOCK: u32 = 0x0002;

// Sample formats of stream payloads
const DFORM_FLOAT: i32 = 0;
const DFORM_LONG: i32 = 1;
const DFORM_SHORT: i32 = 2;
const DFORM_BYTE: i32 = 3;
const DFORM_DOUBLE: i32 = 4;
const DFORM_QWORD: i32 = 5;

/// One 40-byte entry of the block index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TsqRecord {
    /// Record size in 32-bit words, header included
    pub size: i32,
    pub event_type: i32,
    pub code: u32,
    pub channel: u16,
    /// Absolute time in seconds since the Unix epoch
    pub timestamp: f64,
    /// Byte offset into the data file (streams) or raw strobe bits (epocs, scalars)
    pub payload: u64,
    pub format: i32,
    pub frequency: f32,
}

impl TsqRecord {
    fn kind(&self) -> i32 {
        self.event_type & EVTYPE_MASK
    }

    fn store_name(&self) -> String {
        code_to_name(self.code)
    }

    fn payload_bytes(&self) -> Option<usize> {
        let words = self.size.checked_sub(TSQ_HEADER_WORDS)?;
        usize::try_from(words).ok().map(|w| w * 4)
    }
}

/// Parsed block index: the records plus the block's wall-clock bounds.
#[derive(Debug, Clone)]
pub(crate) struct BlockIndex {
    pub directory: PathBuf,
    pub tev_path: PathBuf,
    pub records: Vec<TsqRecord>,
    /// Unix seconds of the start mark
    pub start_time: f64,
    /// Unix seconds of the stop mark, if the block was closed cleanly
    pub stop_time: Option<f64>,
}

impl BlockIndex {
    /// Onsets of every epoc and scalar store, relative to the block start.
    fn events(&self) -> HashMap<String, Vec<f64>> {
        let mut events: HashMap<String, Vec<f64>> = HashMap::new();
        for record in &self.records {
            let kind = record.kind();
            if kind == EVTYPE_STRON || kind == EVTYPE_SCALAR {
                events
                    .entry(record.store_name())
                    .or_default()
                    .push(record.timestamp - self.start_time);
            }
        }
        events
    }

    fn stream_records<'a>(&'a self, store: &str) -> Vec<&'a TsqRecord> {
        let key = store_key(store);
        let chunks: Vec<&TsqRecord> = self
            .records
            .iter()
            .filter(|r| r.kind() == EVTYPE_STREAM && r.store_name() == key)
            .collect();

        // Only the lowest channel of a multi-channel store is read
        match chunks.iter().map(|r| r.channel).min() {
            Some(channel) => chunks.into_iter().filter(|r| r.channel == channel).collect(),
            None => chunks,
        }
    }
}

/// Loads a TDT block directory and returns the two named photometry channels
/// along with the block's timing and event stores.
///
/// # Arguments
///
/// * `directory` - Path to the block directory (containing one `.tsq` and one `.tev`)
/// * `channel_a` - Store holding the reference trace (e.g. `"_405A"`)
/// * `channel_b` - Store holding the signal trace (e.g. `"_465A"`)
///
/// # Errors
///
/// Returns [`PhotometryError::Load`] if the directory holds no readable block and
/// [`PhotometryError::StoreNotFound`] if either channel is absent.
pub fn load_session<P: AsRef<Path>>(
    directory: P,
    channel_a: &str,
    channel_b: &str,
) -> Result<RecordingSession, PhotometryError> {
    let tic = Instant::now();
    log::info!("Reading data from {}", directory.as_ref().display());

    let index = read_block_index(directory.as_ref())?;

    let file = File::open(&index.tev_path)?;
    let tev_size = file.metadata()?.len();
    let mut tev = BufReader::with_capacity(65536, file); // 64KB buffer

    let (a, fs_a) = read_stream(&index, &mut tev, tev_size, channel_a)?;
    let (b, fs_b) = read_stream(&index, &mut tev, tev_size, channel_b)?;

    if (fs_a - fs_b).abs() > 1e-6 {
        return Err(PhotometryError::Load(format!(
            "sample rates don't match: {} Hz ({}) vs {} Hz ({})",
            fs_a, channel_a, fs_b, channel_b
        )));
    }
    if a.len() != b.len() {
        return Err(PhotometryError::Load(format!(
            "channel {} has {} samples but {} has {}",
            channel_a,
            a.len(),
            channel_b,
            b.len()
        )));
    }

    let start = utc_from_unix_seconds(index.start_time)?;
    let duration = a.len() as f64 / fs_a;
    let stop = match index.stop_time {
        Some(stop_time) => utc_from_unix_seconds(stop_time)?,
        None => {
            log::warn!("Block has no stop mark; deriving stop time from the stream length");
            utc_from_unix_seconds(index.start_time + duration)?
        }
    };

    let session = RecordingSession {
        directory: index.directory.clone(),
        channel_a_name: store_key(channel_a).to_string(),
        channel_b_name: store_key(channel_b).to_string(),
        channel_a: a,
        channel_b: b,
        sample_rate: fs_a,
        start,
        stop,
        events: index.events(),
    };

    log_block_summary(&session);
    log::info!(
        "Done! Elapsed time: {:.1} seconds",
        tic.elapsed().as_secs_f64()
    );

    Ok(session)
}

/// Reads the capture onset of every frame of a camera from a block directory.
///
/// Only the index file is read; camera onsets are stored as epoc events.
pub fn load_frame_timestamps<P: AsRef<Path>>(
    directory: P,
    camera: &str,
) -> Result<FrameTimestamps, PhotometryError> {
    log::info!(
        "Reading {} frame onsets from {}",
        camera,
        directory.as_ref().display()
    );
    let index = read_block_index(directory.as_ref())?;
    let mut events = index.events();
    let onsets = events
        .remove(store_key(camera))
        .ok_or_else(|| PhotometryError::StoreNotFound {
            store: camera.to_string(),
            directory: index.directory.clone(),
        })?;
    log::debug!("Camera {} has {} frames", camera, onsets.len());
    FrameTimestamps::new(onsets)
}

/// Locates and parses the index file of a block directory.
pub(crate) fn read_block_index(directory: &Path) -> Result<BlockIndex, PhotometryError> {
    let (tsq_path, tev_path) = find_block_files(directory)?;

    let file = File::open(&tsq_path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(65536, file);

    let num_records = calculate_record_count(file_size)?;
    let mut records = Vec::with_capacity(num_records);
    for _ in 0..num_records {
        records.push(read_tsq_record(&mut reader)?);
    }

    let start_time = find_mark(&records, EVMARK_STARTBLOCK).ok_or_else(|| {
        PhotometryError::Load(format!(
            "{} has no start-of-block mark",
            tsq_path.display()
        ))
    })?;
    let stop_time = find_mark(&records, EVMARK_STOPBLOCK);

    Ok(BlockIndex {
        directory: directory.to_path_buf(),
        tev_path,
        records,
        start_time,
        stop_time,
    })
}

/// Finds the single `.tsq` index and its matching `.tev` data file
fn find_block_files(directory: &Path) -> Result<(PathBuf, PathBuf), PhotometryError> {
    if !directory.is_dir() {
        return Err(PhotometryError::Load(format!(
            "{} is not a directory",
            directory.display()
        )));
    }

    let mut tsq_files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let is_tsq = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("tsq"))
            .unwrap_or(false);
        if is_tsq && path.is_file() {
            tsq_files.push(path);
        }
    }

    let tsq_path = match tsq_files.len() {
        0 => {
            return Err(PhotometryError::Load(format!(
                "no recording block (.tsq) found in {}",
                directory.display()
            )))
        }
        1 => tsq_files.remove(0),
        n => {
            return Err(PhotometryError::Load(format!(
                "{} .tsq files found in {}; expected one block per directory",
                n,
                directory.display()
            )))
        }
    };

    let tev_path = tsq_path.with_extension("tev");
    if !tev_path.is_file() {
        return Err(PhotometryError::Load(format!(
            "data file {} is missing",
            tev_path.display()
        )));
    }

    Ok((tsq_path, tev_path))
}

/// Checks the index size is a whole number of records
fn calculate_record_count(file_size: u64) -> Result<usize, PhotometryError> {
    if file_size % TSQ_RECORD_BYTES != 0 {
        return Err(PhotometryError::Load(format!(
            "index size {} is not a multiple of {} bytes; file is truncated",
            file_size, TSQ_RECORD_BYTES
        )));
    }
    Ok((file_size / TSQ_RECORD_BYTES) as usize)
}

/// Reads one index record
pub(crate) fn read_tsq_record<R: Read>(reader: &mut R) -> Result<TsqRecord, PhotometryError> {
    let size = reader.read_i32::<LittleEndian>()?;
    let event_type = reader.read_i32::<LittleEndian>()?;
    let code = reader.read_u32::<LittleEndian>()?;
    let channel = reader.read_u16::<LittleEndian>()?;
    let _ = reader.read_u16::<LittleEndian>()?; // sort code (unused)
    let timestamp = reader.read_f64::<LittleEndian>()?;
    let payload = reader.read_u64::<LittleEndian>()?;
    let format = reader.read_i32::<LittleEndian>()?;
    let frequency = reader.read_f32::<LittleEndian>()?;

    Ok(TsqRecord {
        size,
        event_type,
        code,
        channel,
        timestamp,
        payload,
        format,
        frequency,
    })
}

fn find_mark(records: &[TsqRecord], mark: u32) -> Option<f64> {
    records
        .iter()
        .find(|r| r.kind() == EVTYPE_MARK && r.code == mark)
        .map(|r| r.timestamp)
}

/// Concatenates every chunk of a stream store into one trace
fn read_stream<R: Read + Seek>(
    index: &BlockIndex,
    tev: &mut R,
    tev_size: u64,
    store: &str,
) -> Result<(Array1<f64>, f64), PhotometryError> {
    let chunks = index.stream_records(store);
    let first = chunks.first().ok_or_else(|| PhotometryError::StoreNotFound {
        store: store.to_string(),
        directory: index.directory.clone(),
    })?;

    let sample_rate = first.frequency as f64;
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(PhotometryError::Load(format!(
            "store {} reports sample rate {}",
            store, sample_rate
        )));
    }

    let mut samples = Vec::new();
    for chunk in &chunks {
        let num_bytes = chunk.payload_bytes().ok_or_else(|| {
            PhotometryError::Load(format!("store {} has a chunk of size {}", store, chunk.size))
        })?;
        if chunk.payload.saturating_add(num_bytes as u64) > tev_size {
            return Err(PhotometryError::Load(format!(
                "store {} points past the end of {}",
                store,
                index.tev_path.display()
            )));
        }
        tev.seek(SeekFrom::Start(chunk.payload))?;
        read_samples(tev, chunk.format, num_bytes, &mut samples)?;
    }

    log::debug!(
        "Read {} samples from {} ({} chunks at {:.4} Hz)",
        samples.len(),
        store,
        chunks.len(),
        sample_rate
    );

    Ok((Array1::from(samples), sample_rate))
}

/// Decodes one chunk payload into `out`
fn read_samples<R: Read>(
    reader: &mut R,
    format: i32,
    num_bytes: usize,
    out: &mut Vec<f64>,
) -> Result<(), PhotometryError> {
    match format {
        DFORM_FLOAT => {
            let mut buf = vec![0f32; num_bytes / 4];
            reader.read_f32_into::<LittleEndian>(&mut buf)?;
            out.extend(buf.into_iter().map(f64::from));
        }
        DFORM_LONG => {
            let mut buf = vec![0i32; num_bytes / 4];
            reader.read_i32_into::<LittleEndian>(&mut buf)?;
            out.extend(buf.into_iter().map(f64::from));
        }
        DFORM_SHORT => {
            let mut buf = vec![0i16; num_bytes / 2];
            reader.read_i16_into::<LittleEndian>(&mut buf)?;
            out.extend(buf.into_iter().map(f64::from));
        }
        DFORM_BYTE => {
            let mut buf = vec![0i8; num_bytes];
            reader.read_i8_into(&mut buf)?;
            out.extend(buf.into_iter().map(f64::from));
        }
        DFORM_DOUBLE => {
            let mut buf = vec![0f64; num_bytes / 8];
            reader.read_f64_into::<LittleEndian>(&mut buf)?;
            out.extend(buf);
        }
        DFORM_QWORD => {
            let mut buf = vec![0i64; num_bytes / 8];
            reader.read_i64_into::<LittleEndian>(&mut buf)?;
            out.extend(buf.into_iter().map(|v| v as f64));
        }
        other => {
            return Err(PhotometryError::Load(format!(
                "unsupported stream data format {}",
                other
            )))
        }
    }
    Ok(())
}

/// Store names are four ASCII characters packed little-endian into the code
fn code_to_name(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end_matches(|c: char| c == '\0' || c == ' ')
        .to_string()
}

/// Converts fractional Unix seconds to a UTC instant
pub(crate) fn utc_from_unix_seconds(seconds: f64) -> Result<DateTime<Utc>, PhotometryError> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos).ok_or_else(|| {
        PhotometryError::Load(format!("timestamp {} is out of range", seconds))
    })
}

fn log_block_summary(session: &RecordingSession) {
    log::info!(
        "Found {} and {} at {:.4} Hz: {} samples ({:.2} seconds)",
        session.channel_a_name,
        session.channel_b_name,
        session.sample_rate,
        session.num_samples(),
        session.duration()
    );
    log::info!("Block start {}, stop {}", session.start, session.stop);

    let mut stores: Vec<_> = session.events.iter().collect();
    stores.sort_by(|a, b| a.0.cmp(b.0));
    for (name, onsets) in stores {
        log::info!("Event store {}: {} onsets", name, onsets.len());
    }
}
