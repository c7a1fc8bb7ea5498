use chrono::Utc;
use std::fs;
use std::path::Path;

use crate::snapshot::types::{CaptureResult, Snapshot, SnapshotConfig, SnapshotResult};

/// Generate a timestamp string in YYYYMMDD_HHMMSS_mmm format
pub fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Create base metadata map for snapshots
pub fn create_base_metadata(
    width: u32,
    height: u32,
    source: &str,
    timestamp: &str,
) -> serde_json::Map<String, serde_json::Value> {
    let mut meta = serde_json::Map::new();
    meta.insert("width".to_string(), width.into());
    meta.insert("height".to_string(), height.into());
    meta.insert("source".to_string(), source.into());
    meta.insert("timestamp".to_string(), timestamp.into());
    meta
}

/// Write the JSON manifest for a snapshot if configured
pub fn write_manifest(snapshot: &Snapshot, config: &SnapshotConfig) -> SnapshotResult<()> {
    if config.include_manifest {
        let manifest_path = snapshot.image_path.with_extension("json");
        fs::write(manifest_path, serde_json::to_string_pretty(snapshot)?)?;
    }
    Ok(())
}

/// Persist a captured frame at `image_path`, merging capture metadata with
/// `extra` (e.g. the target label).
pub fn save_capture(
    result: CaptureResult,
    image_path: &Path,
    source: &str,
    timestamp: &str,
    extra: Option<serde_json::Value>,
    config: &SnapshotConfig,
) -> SnapshotResult<Snapshot> {
    if let Some(parent) = image_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(image_path, &result.image_data)?;

    let mut meta = create_base_metadata(result.width, result.height, source, timestamp);
    for value in [result.metadata, extra].into_iter().flatten() {
        if let serde_json::Value::Object(map) = value {
            meta.extend(map);
        }
    }

    let snapshot = Snapshot::new(
        image_path.to_path_buf(),
        source.to_string(),
        Some(serde_json::Value::Object(meta)),
    );
    write_manifest(&snapshot, config)?;

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Framebuffer;

    #[test]
    fn test_timestamp_has_millis() {
        let ts = generate_timestamp();
        assert_eq!(ts.len(), "20260101_000000_000".len());
    }

    #[test]
    fn test_save_capture_writes_image_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = SnapshotConfig {
            output_dir: dir.path().to_path_buf(),
            include_manifest: true,
        };
        let capture = Framebuffer::new(8, 8).into_capture("fixture").unwrap();
        let path = dir.path().join("target_1.png");

        let snapshot = save_capture(
            capture,
            &path,
            "fixture",
            "20260101_000000_000",
            Some(serde_json::json!({ "target": "Vendor.App" })),
            &config,
        )
        .unwrap();

        assert!(path.exists());
        assert!(path.with_extension("json").exists());
        let meta = snapshot.metadata.unwrap();
        assert_eq!(meta["target"], "Vendor.App");
        assert_eq!(meta["width"], 8);
        assert_eq!(meta["capture_source"], "fixture");
    }
}
