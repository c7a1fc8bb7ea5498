//! Result parser: reads the document the driver leaves behind and decides
//! whether the install and the uninstall succeeded.

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::runner::TargetFailure;

/// `{ "InstallResult": {...}, "UninstallResult": [{...}, ...] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultDocument {
    pub install_result: PhaseResult,
    /// A lone object is accepted as a one-element list; `null` as empty
    #[serde(deserialize_with = "one_or_many")]
    pub uninstall_result: Vec<PhaseResult>,
}

/// Exit code of one install or uninstall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PhaseResult {
    pub exit_code: i64,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<PhaseResult>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<PhaseResult>),
        One(PhaseResult),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::Many(results)) => results,
        Some(OneOrMany::One(result)) => vec![result],
        None => Vec::new(),
    })
}

/// Why a result document could not be read
#[derive(Debug, Error)]
pub enum ResultError {
    #[error("result document not found: {0}")]
    Missing(PathBuf),

    #[error("cannot read result document {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed result document: {0}")]
    Malformed(String),

    #[error("result document is missing fields: {0}")]
    MissingFields(String),
}

impl From<ResultError> for TargetFailure {
    fn from(err: ResultError) -> Self {
        match err {
            ResultError::Missing(_) => TargetFailure::MissingResultFile,
            ResultError::Unreadable { source, .. } => {
                TargetFailure::MalformedResult(source.to_string())
            }
            ResultError::Malformed(reason) => TargetFailure::MalformedResult(reason),
            ResultError::MissingFields(reason) => TargetFailure::MissingFields(reason),
        }
    }
}

/// Parse a result document from raw bytes. A UTF-8 BOM is ignored, and a
/// UTF-16 BOM (as written by Windows PowerShell redirection) selects UTF-16.
pub fn parse_result_document(bytes: &[u8]) -> Result<ResultDocument, ResultError> {
    let text = decode_document(bytes)?;
    // Two passes separate "not JSON" from "JSON of the wrong shape".
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| ResultError::Malformed(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ResultError::MissingFields(e.to_string()))
}

fn decode_document(bytes: &[u8]) -> Result<Cow<'_, str>, ResultError> {
    if let Some(body) = bytes.strip_prefix(b"\xFF\xFE") {
        decode_utf16(body, u16::from_le_bytes).map(Cow::Owned)
    } else if let Some(body) = bytes.strip_prefix(b"\xFE\xFF") {
        decode_utf16(body, u16::from_be_bytes).map(Cow::Owned)
    } else {
        let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        std::str::from_utf8(body)
            .map(Cow::Borrowed)
            .map_err(|e| ResultError::Malformed(e.to_string()))
    }
}

fn decode_utf16(body: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, ResultError> {
    if body.len() % 2 != 0 {
        return Err(ResultError::Malformed("truncated UTF-16 document".into()));
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| ResultError::Malformed(e.to_string()))
}

/// Read and parse the document at `path`
pub fn read_result_document(path: &Path) -> Result<ResultDocument, ResultError> {
    let bytes = std::fs::read(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ResultError::Missing(path.to_path_buf()),
        _ => ResultError::Unreadable {
            path: path.to_path_buf(),
            source,
        },
    })?;
    parse_result_document(&bytes)
}

/// Delete a document left over from an earlier run. Returns whether one existed.
pub fn remove_stale(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale result document {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Success flags derived from a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub install: bool,
    pub uninstall: bool,
    pub failure: Option<TargetFailure>,
}

/// Install succeeds on exit code 0. Uninstall succeeds when install did and
/// every recorded uninstall exited 0; an empty list is a failure.
pub fn evaluate(doc: &ResultDocument) -> Verdict {
    let install_code = doc.install_result.exit_code;
    if install_code != 0 {
        return Verdict {
            install: false,
            uninstall: false,
            failure: Some(TargetFailure::InstallFailed(install_code)),
        };
    }

    let total = doc.uninstall_result.len();
    let failed = doc
        .uninstall_result
        .iter()
        .filter(|r| r.exit_code != 0)
        .count();

    let failure = match (total, failed) {
        (0, _) => Some(TargetFailure::NoUninstallRecorded),
        (_, 0) => None,
        (total, failed) if failed == total => Some(TargetFailure::UninstallFailed { total }),
        (total, failed) => Some(TargetFailure::PartialUninstallFailure { failed, total }),
    };

    Verdict {
        install: true,
        uninstall: failure.is_none(),
        failure,
    }
}
