//! Screenshot recorder: periodic captures of the primary display for
//! post-hoc diagnosis of stuck installs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::desktop::DesktopSession;
use crate::session::capture_file_name;
use crate::snapshot::{SnapshotConfig, generate_timestamp, save_capture};
use crate::task::BackgroundTask;

/// Default capture interval
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest accepted capture interval; shorter requests are raised to it
pub const MIN_CAPTURE_INTERVAL: Duration = Duration::from_millis(10);

/// Captures the display into an artifact directory at a fixed cadence
pub struct ScreenshotRecorder {
    desktop: Arc<dyn DesktopSession>,
    label: String,
    interval: Duration,
    config: SnapshotConfig,
}

impl ScreenshotRecorder {
    /// `label` prefixes every filename (usually the target label)
    pub fn new(desktop: Arc<dyn DesktopSession>, output_dir: impl Into<PathBuf>, label: &str) -> Self {
        Self {
            desktop,
            label: label.to_string(),
            interval: DEFAULT_CAPTURE_INTERVAL,
            config: SnapshotConfig {
                output_dir: output_dir.into(),
                include_manifest: true,
            },
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_CAPTURE_INTERVAL);
        self
    }

    pub fn include_manifest(mut self, include: bool) -> Self {
        self.config.include_manifest = include;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Path for a capture taken at `timestamp`
    fn capture_path(&self, timestamp: &str) -> PathBuf {
        self.config
            .output_dir
            .join(capture_file_name(&self.label, timestamp))
    }

    /// Capture the display and write it. Blocking.
    pub fn capture_once(&self) -> Option<PathBuf> {
        match self.desktop.capture_screen() {
            Ok(frame) => self.write(frame),
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                None
            }
        }
    }

    fn write(&self, frame: crate::snapshot::CaptureResult) -> Option<PathBuf> {
        let timestamp = generate_timestamp();
        let path = self.capture_path(&timestamp);
        let extra = serde_json::json!({ "target": self.label });
        match save_capture(
            frame,
            &path,
            self.desktop.source_type(),
            &timestamp,
            Some(extra),
            &self.config,
        ) {
            Ok(snapshot) => {
                debug!("Screenshot saved: {}", snapshot.image_path.display());
                Some(snapshot.image_path)
            }
            Err(e) => {
                warn!("Failed to write screenshot {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Start capturing immediately, then every interval. Joining the task
    /// yields the paths written.
    pub fn spawn(self) -> BackgroundTask<Vec<PathBuf>> {
        let recorder = Arc::new(self);
        BackgroundTask::spawn("screenshot-recorder", move |mut stop| async move {
            let mut written = Vec::new();
            let mut ticker = tokio::time::interval(recorder.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.stopped() => break,
                    _ = ticker.tick() => {}
                }

                let capturer = Arc::clone(&recorder);
                let frame = match tokio::task::spawn_blocking(move || capturer.desktop.capture_screen()).await {
                    Ok(Ok(frame)) => frame,
                    Ok(Err(e)) => {
                        warn!("Screenshot failed: {}", e);
                        continue;
                    }
                    Err(e) => {
                        warn!("Screenshot task aborted: {}", e);
                        continue;
                    }
                };

                // A frame grabbed while the stop was raised is dropped, not written.
                if stop.is_stopped() {
                    debug!("Discarding screenshot captured after stop");
                    break;
                }

                let writer = Arc::clone(&recorder);
                match tokio::task::spawn_blocking(move || writer.write(frame)).await {
                    Ok(Some(path)) => written.push(path),
                    Ok(None) => {}
                    Err(e) => warn!("Screenshot write aborted: {}", e),
                }
            }

            debug!("Screenshot recorder stopped after {} captures", written.len());
            written
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::{FixtureDesktop, FixtureWindow};

    fn png_count(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().map(|x| x == "png").unwrap_or(false))
                    .count()
            })
            .unwrap_or(0)
    }

    #[test]
    fn test_capture_once_writes_png_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = Arc::new(FixtureDesktop::new());
        desktop.add_window(FixtureWindow::dialog("Setup"));
        let recorder = ScreenshotRecorder::new(desktop, dir.path(), "Vendor.App x64");

        let path = recorder.capture_once().unwrap();

        assert!(path.exists());
        assert!(path.with_extension("json").exists());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("Vendor.App_x64_"), "{name}");
    }

    #[test]
    fn test_capture_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = Arc::new(FixtureDesktop::new());
        desktop.fail_captures(true);
        let recorder = ScreenshotRecorder::new(desktop, dir.path(), "t");
        assert!(recorder.capture_once().is_none());
        assert_eq!(png_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_recorder_captures_immediately_and_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = Arc::new(FixtureDesktop::new());
        let interval = Duration::from_millis(25);
        let task = ScreenshotRecorder::new(desktop.clone(), dir.path(), "t")
            .interval(interval)
            .include_manifest(false)
            .spawn();

        tokio::time::sleep(interval * 3).await;
        let written = task.stop().await.unwrap();

        assert!(!written.is_empty());
        assert_eq!(png_count(dir.path()), written.len());

        // Nothing lands after the task has been joined.
        tokio::time::sleep(interval * 3).await;
        assert_eq!(png_count(dir.path()), written.len());
        // At most one frame can be grabbed and then discarded at stop time.
        let captured = desktop.capture_count();
        assert!(captured == written.len() || captured == written.len() + 1);
    }

    #[tokio::test]
    async fn test_zero_interval_records_and_joins() {
        let dir = tempfile::tempdir().unwrap();
        let desktop = Arc::new(FixtureDesktop::new());
        let task = ScreenshotRecorder::new(desktop, dir.path(), "t")
            .interval(Duration::ZERO)
            .include_manifest(false)
            .spawn();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let written = task.stop().await.unwrap();

        assert!(!written.is_empty());
    }
}
