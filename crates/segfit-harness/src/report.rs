//! Run reports for replayed traces.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Summary of one replayed fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Fixture name.
    pub fixture: String,
    /// Ops actually executed.
    pub ops_executed: usize,
    /// Property sweeps performed.
    pub checkpoints: usize,
    /// SHA-256 of the trace file, when it came from disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_sha256: Option<String>,
    /// Blocks still bound when the trace ended.
    pub live_blocks: usize,
    /// Final arena size in bytes.
    pub heap_bytes: usize,
    /// Final indexed free block count.
    pub free_blocks: usize,
    /// Whether every op and sweep succeeded.
    pub passed: bool,
}

impl ReplayReport {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// SHA-256 digest of a file, lowercase hex.
pub fn sha256_hex(path: &Path) -> std::io::Result<String> {
    use sha2::Digest;
    let data = std::fs::read(path)?;
    Ok(hex_lower(&sha2::Sha256::digest(&data)))
}
