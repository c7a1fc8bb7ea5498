//! Session management for screenshot artifacts.
//!
//! Each harness batch owns one session directory:
//! - Unique session directories under a configurable base location
//! - Automatic cleanup in "no artifacts" mode
//! - Session metadata tracking

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;

/// An artifact session with organized file management
#[derive(Debug)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after session ends
    pub keep: bool,
}

impl Session {
    /// Create a new session with a unique ID under the configured base directory
    pub fn new() -> Self {
        Self::new_in(config::session_base_dir())
    }

    /// Create a new session with a unique ID under `base`
    pub fn new_in(base: impl AsRef<Path>) -> Self {
        let id = generate_session_id();
        let dir = base.as_ref().join(&id);

        Self {
            id,
            dir,
            keep: true,
        }
    }

    /// Create a session with a specific name/prefix under `base`
    pub fn with_name(base: impl AsRef<Path>, name: &str) -> Self {
        let timestamp = generate_timestamp_suffix();
        let id = format!("{}_{}", sanitize_name(name), timestamp);
        let dir = base.as_ref().join(&id);

        Self {
            id,
            dir,
            keep: true,
        }
    }

    /// Set whether to keep files after session ends
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Initialize the session directory
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "keep": self.keep,
        });

        let metadata_path = self.dir.join(".session.json");
        fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = std::process::id();
    format!("session_{}_{}", timestamp, pid)
}

fn generate_timestamp_suffix() -> String {
    format!(
        "{}_{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f"),
        std::process::id()
    )
}

/// `<label>_<timestamp>.png` with the label made filename-safe
pub fn capture_file_name(label: &str, timestamp: &str) -> String {
    format!("{}_{}.png", sanitize_name(label), timestamp)
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
