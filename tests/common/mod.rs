//! Writes synthetic TDT blocks for the integration tests.

#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

pub const BLOCK_START: f64 = 1_650_000_000.0;

const EVTYPE_STRON: i32 = 0x0101;
const EVTYPE_SCALAR: i32 = 0x0201;
const EVTYPE_STREAM: i32 = 0x8101;
const EVTYPE_MARK: i32 = 0x8801;

struct Record {
    size: i32,
    event_type: i32,
    code: u32,
    channel: u16,
    timestamp: f64,
    payload: u64,
    format: i32,
    frequency: f32,
}

fn code(name: &str) -> u32 {
    let mut bytes = [0u8; 4];
    for (slot, b) in bytes.iter_mut().zip(name.bytes()) {
        *slot = b;
    }
    u32::from_le_bytes(bytes)
}

/// Builds the index and data files of one block in memory.
pub struct BlockWriter {
    start: f64,
    records: Vec<Record>,
    tev: Vec<u8>,
}

impl BlockWriter {
    pub fn new() -> Self {
        let mut writer = BlockWriter {
            start: BLOCK_START,
            records: Vec::new(),
            tev: Vec::new(),
        };
        writer.mark(1, BLOCK_START);
        writer
    }

    fn mark(&mut self, mark: u32, timestamp: f64) {
        self.records.push(Record {
            size: 10,
            event_type: EVTYPE_MARK,
            code: mark,
            channel: 0,
            timestamp,
            payload: 0,
            format: 0,
            frequency: 0.0,
        });
    }

    /// Appends a float stream split into chunks of `chunk_len` samples.
    pub fn stream(
        &mut self,
        name: &str,
        channel: u16,
        fs: f32,
        samples: &[f32],
        chunk_len: usize,
    ) -> &mut Self {
        for (i, chunk) in samples.chunks(chunk_len).enumerate() {
            let offset = self.tev.len() as u64;
            for &v in chunk {
                self.tev.write_f32::<LittleEndian>(v).unwrap();
            }
            self.records.push(Record {
                size: 10 + chunk.len() as i32,
                event_type: EVTYPE_STREAM,
                code: code(name),
                channel,
                timestamp: self.start + (i * chunk_len) as f64 / fs as f64,
                payload: offset,
                format: 0,
                frequency: fs,
            });
        }
        self
    }

    /// Appends epoc onsets (seconds since block start).
    pub fn epoc(&mut self, name: &str, onsets: &[f64]) -> &mut Self {
        self.events(EVTYPE_STRON, name, onsets)
    }

    /// Appends scalar events (seconds since block start).
    pub fn scalar(&mut self, name: &str, onsets: &[f64]) -> &mut Self {
        self.events(EVTYPE_SCALAR, name, onsets)
    }

    fn events(&mut self, event_type: i32, name: &str, onsets: &[f64]) -> &mut Self {
        for (i, onset) in onsets.iter().enumerate() {
            self.records.push(Record {
                size: 10,
                event_type,
                code: code(name),
                channel: 0,
                timestamp: self.start + onset,
                payload: (i as f64 + 1.0).to_bits(),
                format: 4,
                frequency: 0.0,
            });
        }
        self
    }

    /// Closes the block `seconds` after its start.
    pub fn stop(&mut self, seconds: f64) -> &mut Self {
        self.mark(2, self.start + seconds);
        self
    }

    /// Writes `<stem>.tsq` and `<stem>.tev` into `dir`.
    pub fn write(&self, dir: &Path, stem: &str) {
        let mut tsq = Vec::with_capacity(self.records.len() * 40);
        for r in &self.records {
            tsq.write_i32::<LittleEndian>(r.size).unwrap();
            tsq.write_i32::<LittleEndian>(r.event_type).unwrap();
            tsq.write_u32::<LittleEndian>(r.code).unwrap();
            tsq.write_u16::<LittleEndian>(r.channel).unwrap();
            tsq.write_u16::<LittleEndian>(0).unwrap();
            tsq.write_f64::<LittleEndian>(r.timestamp).unwrap();
            tsq.write_u64::<LittleEndian>(r.payload).unwrap();
            tsq.write_i32::<LittleEndian>(r.format).unwrap();
            tsq.write_f32::<LittleEndian>(r.frequency).unwrap();
        }
        fs::write(dir.join(format!("{}.tsq", stem)), tsq).unwrap();
        fs::write(dir.join(format!("{}.tev", stem)), &self.tev).unwrap();
    }
}

/// Isosbestic reference and signal traces with shared bleaching and motion.
pub fn photometry_traces(n: usize, fs: f64) -> (Vec<f32>, Vec<f32>) {
    let reference = (0..n)
        .map(|i| {
            let t = i as f64 / fs;
            (50.0 + 10.0 * (-t / 40.0).exp() + 0.5 * (2.0 * PI * 0.3 * t).sin()) as f32
        })
        .collect();
    let signal = (0..n)
        .map(|i| {
            let t = i as f64 / fs;
            (80.0
                + 12.0 * (-t / 40.0).exp()
                + 0.8 * (2.0 * PI * 0.3 * t).sin()
                + 2.0 * (2.0 * PI * 0.05 * t).sin().max(0.0)) as f32
        })
        .collect();
    (reference, signal)
}

/// Onsets of a camera running at `fps` for `seconds`.
pub fn camera_onsets(fps: f64, seconds: f64) -> Vec<f64> {
    (0..(fps * seconds) as usize).map(|i| i as f64 / fps).collect()
}

/// A complete 80 s block: 1 kHz photometry, 30 fps camera, two LED onsets.
pub fn write_standard_block(dir: &Path) {
    let fs = 1000.0;
    let seconds = 80.0;
    let (reference, signal) = photometry_traces((fs * seconds) as usize, fs);
    BlockWriter::new()
        .stream("405A", 1, fs as f32, &reference, 4096)
        .stream("465A", 1, fs as f32, &signal, 4096)
        .epoc("Cam1", &camera_onsets(30.0, seconds))
        .scalar("Fi1i", &[1.0, 2.5])
        .stop(seconds)
        .write(dir, "MLA074-220414-141939");
}
