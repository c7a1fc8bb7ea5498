//! Discovery of testable targets under manifest roots.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{
    Architecture, CpuFamily, InstallerType, ManifestFragment, SkippedTarget, Target,
};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Manifest root not found: {0}")]
    MissingRoot(PathBuf),

    #[error("Manifest root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Cannot resolve manifest root {path}: {source}")]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ScanResult<T> = Result<T, ScanError>;

/// Role of a YAML file inside a manifest directory. The derive order is the
/// priority order used when walking fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FragmentKind {
    Installer,
    Primary,
    Locale,
}

impl FragmentKind {
    /// Classify a path by file name; `None` when it is not YAML
    pub fn of(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        let stem = name
            .strip_suffix(".yaml")
            .or_else(|| name.strip_suffix(".yml"))?;

        if stem.ends_with(".installer") {
            Some(FragmentKind::Installer)
        } else if stem.contains(".locale.") {
            Some(FragmentKind::Locale)
        } else {
            Some(FragmentKind::Primary)
        }
    }
}

/// Everything a scan found
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScanReport {
    /// Runnable targets in discovery order
    pub targets: Vec<Target>,
    /// Variants filtered out for the host CPU family
    pub skipped: Vec<SkippedTarget>,
    /// Number of manifest directories visited
    pub directories: usize,
}

/// Walks manifest roots and expands each manifest directory into targets
#[derive(Debug, Clone)]
pub struct ManifestScanner {
    host: CpuFamily,
}

impl Default for ManifestScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestScanner {
    /// Scanner filtering for the CPU family this binary runs on
    pub fn new() -> Self {
        Self::for_host(CpuFamily::host())
    }

    pub fn for_host(host: CpuFamily) -> Self {
        Self { host }
    }

    pub fn host(&self) -> CpuFamily {
        self.host
    }

    /// Scan every root. Missing roots are an error; unreadable manifests are not.
    pub fn scan<P: AsRef<Path>>(&self, roots: &[P]) -> ScanResult<ScanReport> {
        let mut fragments = Vec::new();
        for root in roots {
            let root = root.as_ref();
            if !root.exists() {
                return Err(ScanError::MissingRoot(root.to_path_buf()));
            }
            if !root.is_dir() {
                return Err(ScanError::NotADirectory(root.to_path_buf()));
            }
            // One spelling per directory, whatever path reached it.
            let root = canonical_root(root)?;
            fragments.extend(collect_fragments(&root));
        }
        fragments.sort();

        // Group by directory, keeping the order in which directories first appear.
        let mut order: Vec<PathBuf> = Vec::new();
        let mut groups: HashMap<PathBuf, Vec<(FragmentKind, PathBuf)>> = HashMap::new();
        for (kind, path) in fragments {
            let Some(dir) = path.parent().map(Path::to_path_buf) else {
                continue;
            };
            let group = groups.entry(dir.clone()).or_insert_with(|| {
                order.push(dir);
                Vec::new()
            });
            // Overlapping roots surface the same file twice.
            if !group.iter().any(|(_, p)| *p == path) {
                group.push((kind, path));
            }
        }

        let mut report = ScanReport {
            directories: order.len(),
            ..Default::default()
        };
        for dir in order {
            let group = groups.remove(&dir).unwrap_or_default();
            self.expand_directory(&dir, &group, &mut report);
        }

        info!(
            "Scan found {} targets in {} manifests ({} skipped for {} host)",
            report.targets.len(),
            report.directories,
            report.skipped.len(),
            self.host
        );
        Ok(report)
    }

    fn expand_directory(
        &self,
        dir: &Path,
        fragments: &[(FragmentKind, PathBuf)],
        report: &mut ScanReport,
    ) {
        for (architecture, installer_type) in declared_variants(fragments) {
            let target = Target {
                directory: dir.to_path_buf(),
                architecture,
                installer_type,
            };
            if architecture.runs_on(self.host) {
                debug!("Discovered target {}", target);
                report.targets.push(target);
            } else {
                let reason = format!("{} installer cannot run on {} host", architecture, self.host);
                info!("Skipping {}: {}", target, reason);
                report.skipped.push(SkippedTarget { target, reason });
            }
        }
    }
}

/// Absolute, symlink-free form of a root. Plain drive paths lose the
/// verbatim `\\?\` prefix so the driver sees ordinary paths.
fn canonical_root(root: &Path) -> ScanResult<PathBuf> {
    let resolved = std::fs::canonicalize(root).map_err(|source| ScanError::Unresolvable {
        path: root.to_path_buf(),
        source,
    })?;
    Ok(strip_verbatim(resolved))
}

#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    use std::path::{Component, Prefix};

    let verbatim_disk = matches!(
        path.components().next(),
        Some(Component::Prefix(prefix)) if matches!(prefix.kind(), Prefix::VerbatimDisk(_))
    );
    if !verbatim_disk {
        return path;
    }
    match path.to_str().and_then(|text| text.strip_prefix(r"\\?\")) {
        Some(plain) => PathBuf::from(plain),
        None => path,
    }
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}

/// YAML files under `root`, tagged with their kind
fn collect_fragments(root: &Path) -> Vec<(FragmentKind, PathBuf)> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable path under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            FragmentKind::of(&path).map(|kind| (kind, path))
        })
        .collect()
}

fn read_fragment(path: &Path) -> Option<ManifestFragment> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Cannot read manifest {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_yaml::from_str::<ManifestFragment>(content.trim_start_matches('\u{feff}')) {
        Ok(fragment) => Some(fragment),
        Err(e) => {
            warn!("Cannot parse manifest {}: {}", path.display(), e);
            None
        }
    }
}

/// Sorted, deduplicated `(architecture, installer type)` pairs for one
/// manifest. A manifest declaring no installers yields one neutral variant.
fn declared_variants(
    fragments: &[(FragmentKind, PathBuf)],
) -> BTreeSet<(Architecture, Option<InstallerType>)> {
    let parsed: Vec<ManifestFragment> = fragments
        .iter()
        .filter(|(kind, _)| *kind != FragmentKind::Locale)
        .filter_map(|(_, path)| read_fragment(path))
        .collect();

    let manifest_default = parsed.iter().find_map(|f| f.installer_type.clone());

    let mut variants = BTreeSet::new();
    let mut declared = false;
    for fragment in &parsed {
        let Some(installers) = &fragment.installers else {
            continue;
        };
        declared = true;
        for entry in installers {
            let installer_type = entry
                .installer_type
                .clone()
                .or_else(|| fragment.installer_type.clone())
                .or_else(|| manifest_default.clone());
            variants.insert((
                entry.architecture.unwrap_or(Architecture::Neutral),
                installer_type,
            ));
        }
    }

    if !declared {
        variants.insert((Architecture::Neutral, manifest_default));
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_fragment_kind() {
        assert_eq!(
            FragmentKind::of(Path::new("a/Vendor.App.installer.yaml")),
            Some(FragmentKind::Installer)
        );
        assert_eq!(
            FragmentKind::of(Path::new("a/Vendor.App.locale.en-US.YAML")),
            Some(FragmentKind::Locale)
        );
        assert_eq!(
            FragmentKind::of(Path::new("a/Vendor.App.yml")),
            Some(FragmentKind::Primary)
        );
        assert_eq!(FragmentKind::of(Path::new("a/readme.md")), None);
        assert!(FragmentKind::Installer < FragmentKind::Primary);
        assert!(FragmentKind::Primary < FragmentKind::Locale);
    }

    #[test]
    fn test_variants_deduplicated_and_defaulted() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Vendor/App/1.0");
        write(
            &dir,
            "Vendor.App.installer.yaml",
            "InstallerType: msi\nInstallers:\n  - Architecture: x64\n  - Architecture: X64\n  - Architecture: x86\n    InstallerType: exe\n  - InstallerUrl: https://example.invalid\n",
        );
        write(&dir, "Vendor.App.locale.en-US.yaml", "Installers: [{Architecture: arm64}]\n");

        let report = ManifestScanner::for_host(CpuFamily::Intel)
            .scan(&[root.path()])
            .unwrap();

        let pairs: Vec<(Architecture, Option<&str>)> = report
            .targets
            .iter()
            .map(|t| (t.architecture, t.installer_type.as_ref().map(|i| i.as_str())))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Architecture::X86, Some("exe")),
                (Architecture::X64, Some("msi")),
                (Architecture::Neutral, Some("msi")),
            ]
        );
        assert!(report.skipped.is_empty());
        assert_eq!(report.directories, 1);
    }

    #[test]
    fn test_foreign_only_directory_yields_nothing() {
        let root = tempfile::tempdir().unwrap();
        write(
            &root.path().join("ArmOnly"),
            "ArmOnly.installer.yaml",
            "Installers:\n  - Architecture: arm64\n    InstallerType: msix\n",
        );

        let report = ManifestScanner::for_host(CpuFamily::Intel)
            .scan(&[root.path()])
            .unwrap();

        assert!(report.targets.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].target.architecture, Architecture::Arm64);
    }

    #[test]
    fn test_manifest_without_installers_is_neutral() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("Plain"), "Plain.yaml", "PackageIdentifier: Plain\n");

        let report = ManifestScanner::new().scan(&[root.path()]).unwrap();

        assert_eq!(report.targets.len(), 1);
        assert_eq!(report.targets[0].architecture, Architecture::Neutral);
        assert_eq!(report.targets[0].installer_type, None);
    }

    #[test]
    fn test_unparseable_fragment_does_not_abort() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("Broken"), "Broken.installer.yaml", "Installers: [:::\n");
        write(
            &root.path().join("Good"),
            "Good.installer.yaml",
            "Installers:\n  - Architecture: neutral\n",
        );

        let report = ManifestScanner::new().scan(&[root.path()]).unwrap();

        assert_eq!(report.directories, 2);
        assert!(report.targets.iter().any(|t| t.directory.ends_with("Good")));
    }

    #[test]
    fn test_overlapping_roots_emit_directory_once() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Vendor/App");
        write(&dir, "App.installer.yaml", "Installers:\n  - Architecture: x64\n");

        let report = ManifestScanner::for_host(CpuFamily::Intel)
            .scan(&[root.path(), dir.as_path()])
            .unwrap();

        assert_eq!(report.targets.len(), 1);
    }

    #[test]
    fn test_differently_spelled_roots_emit_directory_once() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("m/Vendor/App");
        write(&dir, "App.installer.yaml", "Installers:\n  - Architecture: x64\n");

        let plain = root.path().join("m");
        let dotted = root.path().join("m/Vendor/../Vendor");
        let report = ManifestScanner::for_host(CpuFamily::Intel)
            .scan(&[plain, dotted])
            .unwrap();

        assert_eq!(report.directories, 1);
        assert_eq!(report.targets.len(), 1);
        assert!(!report.targets[0].directory.to_string_lossy().contains(".."));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_root_emits_directory_once() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("m/Vendor/App");
        write(&dir, "App.installer.yaml", "Installers:\n  - Architecture: x64\n");
        let link = root.path().join("alias");
        std::os::unix::fs::symlink(root.path().join("m"), &link).unwrap();

        let report = ManifestScanner::for_host(CpuFamily::Intel)
            .scan(&[root.path().join("m"), link])
            .unwrap();

        assert_eq!(report.targets.len(), 1);
    }

    #[test]
    fn test_missing_root() {
        let err = ManifestScanner::new()
            .scan(&[Path::new("/definitely/not/here")])
            .unwrap_err();
        assert!(matches!(err, ScanError::MissingRoot(_)));
    }
}
