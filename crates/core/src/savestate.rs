//! Save state for the register simulator.
//!
//! Captures a [`Simulator`](crate::sim::Simulator) to bytes or a file using
//! bincode serialization with deflate compression, so a scripted device
//! state (queued conversions, gate history, clock) can be stored as a test
//! fixture and restored later.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "AHSS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::peripherals::tone::Gate;
use crate::sim::{ActiveConversion, Conversion, GateEvent, RegWrite};

/// Magic bytes identifying a simulator save state.
const MAGIC: &[u8; 4] = b"AHSS";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
/// Magic + version
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSnapshot {
    // Register file + clock
    pub regs: Vec<u8>,
    pub now_ms: u64,

    // ADC model
    pub default_conversion: Conversion,
    pub queue: Vec<Conversion>,
    pub active: Option<ActiveConversion>,
    pub status_polls: u32,
    pub conversions: u32,

    // Logs
    pub initial_gate: Gate,
    pub log_start_ms: u64,
    pub writes: Vec<RegWrite>,
    pub gate_trace: Vec<GateEvent>,
    pub delays: Vec<u32>,
}

/// Serialize with header and deflate compression.
pub fn to_bytes(state: &SimSnapshot) -> Result<Vec<u8>, String> {
    let payload = bincode::serialize(state)
        .map_err(|e| format!("Serialize error: {}", e))?;

    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Parse bytes produced by [`to_bytes`], verifying magic and version.
pub fn from_bytes(data: &[u8]) -> Result<SimSnapshot, String> {
    if data.len() < HEADER_LEN {
        return Err("Save state too small".into());
    }
    if &data[0..4] != MAGIC {
        return Err("Invalid save state (bad magic)".into());
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(format!("Unsupported save state version {} (expected {})",
            version, FORMAT_VERSION));
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| format!("Decompress error: {:?}", e))?;

    bincode::deserialize(&decompressed)
        .map_err(|e| format!("Deserialize error: {}", e))
}

pub fn save_to_file(state: &SimSnapshot, path: &Path) -> Result<(), String> {
    let out = to_bytes(state)?;
    std::fs::write(path, &out)
        .map_err(|e| format!("Write error: {}", e))
}

pub fn load_from_file(path: &Path) -> Result<SimSnapshot, String> {
    let data = std::fs::read(path)
        .map_err(|e| format!("Read error: {}", e))?;
    from_bytes(&data)
}
