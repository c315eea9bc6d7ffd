//! Locating the tmux binary.
//!
//! Probes a fixed, ordered list of well-known install locations, then falls
//! back to a `$PATH` lookup. Not finding tmux is a legitimate state: every
//! multiplexed feature degrades to the direct backend.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

/// Well-known tmux install locations, probed in order.
pub const DEFAULT_SEARCH_PATHS: &[&str] = &[
    "/opt/homebrew/bin/tmux",
    "/usr/local/bin/tmux",
    "/usr/bin/tmux",
    "/bin/tmux",
    "/run/current-system/sw/bin/tmux",
    "/snap/bin/tmux",
];

/// Result of probing for the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Detection {
    pub available: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

impl Detection {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutableLocator {
    candidates: Vec<PathBuf>,
    binary_name: String,
    path_lookup: bool,
}

impl ExecutableLocator {
    pub fn new(candidates: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            binary_name: "tmux".into(),
            path_lookup: true,
        }
    }

    /// Disable the `$PATH` fallback.
    #[must_use]
    pub fn without_path_lookup(mut self) -> Self {
        self.path_lookup = false;
        self
    }

    #[must_use]
    pub fn with_binary_name(mut self, name: impl Into<String>) -> Self {
        self.binary_name = name.into();
        self
    }

    /// First executable candidate, else the `$PATH` match.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(found) = self.candidates.iter().find(|p| is_executable(p)) {
            return Some(found.clone());
        }
        if self.path_lookup {
            return which::which(&self.binary_name).ok();
        }
        None
    }

    /// Locate tmux and probe its version.
    pub fn detect(&self) -> Detection {
        match self.locate() {
            Some(path) => {
                let version = probe_version(&path);
                tracing::info!(path = %path.display(), version = ?version, "tmux detected");
                Detection {
                    available: true,
                    path: Some(path),
                    version,
                }
            }
            None => {
                tracing::info!("tmux not found, multiplexed sessions disabled");
                Detection::unavailable()
            }
        }
    }
}

impl Default for ExecutableLocator {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_PATHS.iter().copied())
    }
}

/// Detection for an explicitly configured binary; no search.
pub fn detect_at(path: &Path) -> Detection {
    if !is_executable(path) {
        tracing::warn!(path = %path.display(), "configured tmux path is not executable");
        return Detection::unavailable();
    }
    Detection {
        available: true,
        path: Some(path.to_path_buf()),
        version: probe_version(path),
    }
}

/// `tmux -V`, e.g. `tmux 3.4`.
fn probe_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("-V").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() { None } else { Some(version) }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
