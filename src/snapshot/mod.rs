pub mod framebuffer;
pub mod types;
pub mod utils;

pub use framebuffer::{Framebuffer, GLYPH_SIZE};
pub use types::{CaptureResult, Snapshot, SnapshotConfig, SnapshotError, SnapshotResult};
pub use utils::{create_base_metadata, generate_timestamp, save_capture, write_manifest};
