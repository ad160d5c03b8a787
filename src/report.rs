//! Payloads produced by the external scan engines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --- dive JSON export ---

/// Layer-efficiency analysis as exported by `dive --json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiveResult {
    #[serde(default)]
    pub layer: Vec<DiveLayer>,
    #[serde(default)]
    pub image: DiveImage,
}

impl DiveResult {
    pub fn layer_count(&self) -> usize {
        self.layer.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiveLayer {
    pub index: u32,
    pub id: String,
    pub digest_id: String,
    pub size_bytes: u64,
    pub command: String,
}

/// Whole-image summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiveImage {
    pub size_bytes: u64,
    pub inefficient_bytes: u64,
    /// Nominally in `[0, 1]`; not enforced.
    pub efficiency_score: f64,
    pub file_reference: Vec<FileReference>,
}

/// A path duplicated across layers, with the bytes it wastes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileReference {
    pub count: u32,
    pub size_bytes: u64,
    pub file: String,
}

// --- trufflehog JSON lines ---

/// One trufflehog finding.
///
/// Only the fields this crate reads are typed; every other key is kept as-is
/// so the finding serializes back to what the scanner produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TruffleHogResult {
    #[serde(default)]
    pub detector_name: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
