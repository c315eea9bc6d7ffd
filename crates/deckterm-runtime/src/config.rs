//! Runtime configuration, read from `config.toml`.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use deckterm_core::BackendKind;
use deckterm_tmux::{DEFAULT_SEARCH_PATHS, ExecutableLocator, PayloadEncoding};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Backend for new sessions when the caller does not pick one.
    pub default_backend: BackendKind,
    /// Use this tmux binary instead of searching for one.
    pub tmux_path: Option<PathBuf>,
    pub search_paths: Vec<PathBuf>,
    pub default_shell: Option<String>,
    /// tmux server socket name (`-L`).
    pub socket_name: Option<String>,
    pub command_timeout_ms: u64,
    pub attach_timeout_ms: u64,
    pub direct_exit_grace_ms: u64,
    pub output_encoding: PayloadEncoding,
    pub log_filter: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_backend: BackendKind::Multiplexed,
            tmux_path: None,
            search_paths: DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
            default_shell: None,
            socket_name: None,
            command_timeout_ms: 5000,
            attach_timeout_ms: 3000,
            direct_exit_grace_ms: 2000,
            output_encoding: PayloadEncoding::Percent,
            log_filter: None,
        }
    }
}

impl RuntimeConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::read(path),
            None => match default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Shell for new sessions: configured, else `$SHELL`, else `/bin/sh`.
    pub fn shell(&self) -> String {
        self.default_shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn direct_exit_grace(&self) -> Duration {
        Duration::from_millis(self.direct_exit_grace_ms)
    }

    pub fn locator(&self) -> ExecutableLocator {
        ExecutableLocator::new(self.search_paths.iter().cloned())
    }
}

/// `$XDG_CONFIG_HOME/deckterm/config.toml`, else `$HOME/.config/...`.
pub fn default_path() -> Option<PathBuf> {
    default_path_from(
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn default_path_from(xdg: Option<PathBuf>, home: Option<PathBuf>) -> Option<PathBuf> {
    let base = xdg
        .filter(|p| p.is_absolute())
        .or_else(|| home.map(|h| h.join(".config")))?;
    Some(base.join("deckterm").join("config.toml"))
}
