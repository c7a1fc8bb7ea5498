// Core types for screen capture artifacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration for writing captured frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory where snapshots will be saved
    pub output_dir: PathBuf,

    /// Whether to write a JSON manifest next to each image
    pub include_manifest: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./snapshots"),
            include_manifest: true,
        }
    }
}

/// Result of a capture operation
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// PNG-encoded image data
    pub image_data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Optional metadata about the capture
    pub metadata: Option<serde_json::Value>,
}

/// Represents a snapshot written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Path to the image file
    pub image_path: PathBuf,

    /// Source type (e.g., "gdi", "fixture")
    pub source: String,

    /// Optional metadata about the snapshot
    pub metadata: Option<serde_json::Value>,

    /// Timestamp when the snapshot was created
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(image_path: PathBuf, source: String, metadata: Option<serde_json::Value>) -> Self {
        Self {
            image_path,
            source,
            metadata,
            timestamp: Utc::now(),
        }
    }
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Error types for snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
