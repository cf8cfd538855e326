//! Self-update: version check, download, integrity guard and the handoff
//! to a detached helper that swaps the executable.

pub mod helper;
pub mod installer;
pub mod orchestrator;

use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

pub use installer::{HelperInstaller, UpdateInstaller};
pub use orchestrator::{UpdateOrchestrator, UpdateOutcome, UpdateSettings};

/// Anything smaller is treated as a truncated or corrupt download.
pub const MIN_ARTIFACT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("download failed: {0}")]
    Transport(#[from] TransportError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download cancelled")]
    Cancelled,
    #[error("download timed out")]
    TimedOut,
    #[error("downloaded file is only {size} bytes, expected at least {min}")]
    ArtifactTooSmall { size: u64, min: u64 },
    #[error("failed to start update helper: {0}")]
    Install(String),
}

/// Staged artifact ready to be handed to the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpdate {
    pub version: String,
    pub artifact: PathBuf,
    pub size: u64,
}

pub fn normalize_version(raw: &str) -> &str {
    raw.trim().trim_start_matches(['v', 'V'])
}

/// True when `latest` names a different build than `current`, in either
/// direction.
pub fn is_different_version(latest: &str, current: &str) -> bool {
    let latest = normalize_version(latest);
    let current = normalize_version(current);
    if latest.is_empty() {
        return false;
    }
    match (parse_version(latest), parse_version(current)) {
        (Some(l), Some(c)) => l != c,
        _ => latest != current,
    }
}

/// Compares dotted numeric versions; unparsable strings fall back to
/// "different means newer" so a server can always push a fix.
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    let latest = normalize_version(latest);
    let current = normalize_version(current);
    if latest.is_empty() || latest == current {
        return false;
    }
    match (parse_version(latest), parse_version(current)) {
        (Some(l), Some(c)) => l > c,
        _ => latest != current,
    }
}

fn parse_version(s: &str) -> Option<(u64, u64, u64)> {
    let core = s.split(['-', '+']).next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comparison() {
        assert!(is_newer_version("2.1.0", "2.0.9"));
        assert!(is_newer_version("v2.10", "2.9.3"));
        assert!(!is_newer_version("2.0.0", "2.0.0"));
        assert!(!is_newer_version("1.9.9", "2.0.0"));
        assert!(!is_newer_version("", "2.0.0"));
        assert!(is_newer_version("2.1.0-hotfix", "2.0.0"));
        assert!(is_newer_version("nightly", "2.0.0"));
    }

    #[test]
    fn rollback_counts_as_different() {
        assert!(is_different_version("1.9.0", "2.0.0"));
        assert!(is_different_version("v2.0.1", "2.0.0"));
        assert!(!is_different_version("2.0", "2.0.0"));
        assert!(!is_different_version("", "2.0.0"));
    }
}
