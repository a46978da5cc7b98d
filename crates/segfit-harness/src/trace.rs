//! Trace fixture loading.
//!
//! A trace fixture is the JSON description of one allocate/release/
//! reallocate request sequence. The `id` fields are caller-chosen block
//! handles; the replayer maps them to live payload offsets.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::HarnessError;

/// One request in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceOp {
    /// Allocate `size` bytes and bind the result to `id`.
    Alloc { id: u32, size: usize },
    /// Release the block bound to `id`.
    Free { id: u32 },
    /// Reallocate the block bound to `id` to `size` bytes.
    Realloc { id: u32, size: usize },
    /// Zero-fill allocate `count * size` bytes and bind the result to `id`.
    Calloc { id: u32, count: usize, size: usize },
}

/// A named request sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFixture {
    /// Schema version.
    pub version: String,
    /// Fixture identifier.
    pub name: String,
    /// UTC timestamp of capture.
    pub captured_at: String,
    /// The request sequence.
    pub ops: Vec<TraceOp>,
}

impl TraceFixture {
    /// Parses a fixture from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, HarnessError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the fixture to pretty JSON.
    pub fn to_json(&self) -> Result<String, HarnessError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads a fixture from a file.
    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}
