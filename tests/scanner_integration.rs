//! Scanning a repository-shaped manifest tree

use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

use installer_harness::manifest::{Architecture, CpuFamily, ManifestScanner};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A multi-file manifest, a singleton manifest and an Arm-only manifest
fn manifest_tree() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    let base = root.path();

    write(
        base,
        "manifests/c/Contoso/Tool/2.1.0/Contoso.Tool.yaml",
        "PackageIdentifier: Contoso.Tool\nPackageVersion: 2.1.0\nDefaultLocale: en-US\nManifestType: version\n",
    );
    write(
        base,
        "manifests/c/Contoso/Tool/2.1.0/Contoso.Tool.installer.yaml",
        r#"PackageIdentifier: Contoso.Tool
PackageVersion: 2.1.0
InstallerType: msi
Installers:
  - Architecture: x64
    InstallerUrl: https://example.invalid/tool-x64.msi
    InstallerSha256: 0000000000000000000000000000000000000000000000000000000000000000
  - Architecture: x86
    InstallerUrl: https://example.invalid/tool-x86.msi
    InstallerSha256: 1111111111111111111111111111111111111111111111111111111111111111
  - Architecture: arm64
    InstallerUrl: https://example.invalid/tool-arm64.msi
    InstallerSha256: 2222222222222222222222222222222222222222222222222222222222222222
ManifestType: installer
"#,
    );
    write(
        base,
        "manifests/c/Contoso/Tool/2.1.0/Contoso.Tool.locale.en-US.yaml",
        "PackageIdentifier: Contoso.Tool\nPackageLocale: en-US\nPublisher: Contoso\n",
    );
    write(
        base,
        "manifests/f/Fabrikam/Viewer/1.0/Fabrikam.Viewer.yml",
        r#"PackageIdentifier: Fabrikam.Viewer
Installers:
  - InstallerType: inno
    InstallerUrl: https://example.invalid/viewer.exe
    InstallerSha256: 3333333333333333333333333333333333333333333333333333333333333333
ManifestType: singleton
"#,
    );
    write(
        base,
        "manifests/n/Northwind/ArmOnly/3.0/Northwind.ArmOnly.installer.yaml",
        "Installers:\n  - Architecture: arm64\n    InstallerType: msix\n",
    );
    write(base, "manifests/README.md", "not a manifest\n");
    root
}

fn labels(targets: &[installer_harness::Target]) -> Vec<String> {
    targets
        .iter()
        .map(|t| {
            let dir = t.directory.components().rev().nth(1).unwrap();
            format!(
                "{}:{}:{}",
                dir.as_os_str().to_string_lossy(),
                t.architecture,
                t.installer_type.as_ref().map(|k| k.as_str()).unwrap_or("-")
            )
        })
        .collect()
}

#[test]
fn test_scan_on_intel_host() {
    let tree = manifest_tree();
    let report = ManifestScanner::for_host(CpuFamily::Intel)
        .scan(&[tree.path().join("manifests")])
        .unwrap();

    assert_eq!(report.directories, 3);
    assert_eq!(
        labels(&report.targets),
        vec![
            "Tool:x86:msi".to_string(),
            "Tool:x64:msi".to_string(),
            "Viewer:neutral:inno".to_string(),
        ]
    );
    // The Arm variant of Tool and the Arm-only manifest are skipped, not failed.
    assert_eq!(report.skipped.len(), 2);
    assert!(
        report
            .skipped
            .iter()
            .all(|s| s.target.architecture == Architecture::Arm64)
    );
}

#[test]
fn test_scan_on_arm_host() {
    let tree = manifest_tree();
    let report = ManifestScanner::for_host(CpuFamily::Arm)
        .scan(&[tree.path().join("manifests")])
        .unwrap();

    assert_eq!(
        labels(&report.targets),
        vec![
            "Tool:arm64:msi".to_string(),
            "ArmOnly:arm64:msix".to_string(),
            "Viewer:neutral:inno".to_string(),
        ]
    );
    assert_eq!(report.skipped.len(), 2);
}

#[test]
fn test_scan_report_serializes() {
    let tree = manifest_tree();
    let report = ManifestScanner::for_host(CpuFamily::Intel)
        .scan(&[tree.path().join("manifests")])
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["targets"][0]["architecture"], "x86");
    assert_eq!(json["targets"][0]["installer_type"], "msi");
    assert!(json["skipped"][0]["reason"].as_str().unwrap().contains("arm64"));
}
