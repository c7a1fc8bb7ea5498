//! Manifest discovery: turns directories of installer manifests into
//! [`Target`]s the host can run.

pub mod scanner;
pub mod types;

pub use scanner::{FragmentKind, ManifestScanner, ScanError, ScanReport, ScanResult};
pub use types::{
    Architecture, CpuFamily, InstallerDeclaration, InstallerType, ManifestFragment,
    SkippedTarget, Target,
};
