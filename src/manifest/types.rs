use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Installer architecture as declared in a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86,
    X64,
    Arm,
    Arm64,
    /// Runs anywhere; also the default when a declaration names no architecture
    Neutral,
}

/// CPU family used to decide whether a variant can run on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuFamily {
    Intel,
    Arm,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86 => "x86",
            Architecture::X64 => "x64",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
            Architecture::Neutral => "neutral",
        }
    }

    /// `None` for [`Architecture::Neutral`]
    pub fn family(&self) -> Option<CpuFamily> {
        match self {
            Architecture::X86 | Architecture::X64 => Some(CpuFamily::Intel),
            Architecture::Arm | Architecture::Arm64 => Some(CpuFamily::Arm),
            Architecture::Neutral => None,
        }
    }

    pub fn runs_on(&self, host: CpuFamily) -> bool {
        self.family().map(|f| f == host).unwrap_or(true)
    }
}

impl CpuFamily {
    /// Family of the CPU this binary was built for
    pub fn host() -> Self {
        Self::from_target_arch(std::env::consts::ARCH)
    }

    pub fn from_target_arch(arch: &str) -> Self {
        match arch {
            "arm" | "aarch64" | "arm64ec" => CpuFamily::Arm,
            _ => CpuFamily::Intel,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CpuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuFamily::Intel => f.write_str("intel"),
            CpuFamily::Arm => f.write_str("arm"),
        }
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86" => Ok(Architecture::X86),
            "x64" => Ok(Architecture::X64),
            "arm" => Ok(Architecture::Arm),
            "arm64" => Ok(Architecture::Arm64),
            "neutral" => Ok(Architecture::Neutral),
            other => Err(format!("unknown architecture '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Architecture {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Installer technology (`msi`, `exe`, `inno`, ...), normalized to lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstallerType(String);

impl InstallerType {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstallerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for InstallerType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(InstallerType::new(&String::deserialize(deserializer)?))
    }
}

/// The subset of a manifest fragment the harness reads
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestFragment {
    pub package_identifier: Option<String>,
    /// Manifest-level default for entries that omit it
    pub installer_type: Option<InstallerType>,
    pub installers: Option<Vec<InstallerDeclaration>>,
}

/// One entry of `Installers`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstallerDeclaration {
    pub architecture: Option<Architecture>,
    pub installer_type: Option<InstallerType>,
    pub installer_url: Option<String>,
    pub installer_sha256: Option<String>,
}

/// The unit of testing: one manifest directory and one variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Target {
    pub directory: PathBuf,
    pub architecture: Architecture,
    /// `None` when neither the entry nor the manifest names a type
    pub installer_type: Option<InstallerType>,
}

impl Target {
    /// Short label used in logs and artifact names, e.g. `Vendor.App-x64-msi`
    pub fn label(&self) -> String {
        let name = self
            .directory
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.directory.display().to_string());
        match &self.installer_type {
            Some(kind) => format!("{}-{}-{}", name, self.architecture, kind),
            None => format!("{}-{}", name, self.architecture),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}", self.directory.display(), self.architecture)?;
        if let Some(kind) = &self.installer_type {
            write!(f, ", {}", kind)?;
        }
        f.write_str("]")
    }
}

/// A declared variant the host cannot run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTarget {
    pub target: Target,
    pub reason: String,
}
