//! One-shot tmux invocations.
//!
//! `TmuxCommandRunner` is the seam the registry and metadata store are written
//! against, so tests can inject a scripted or in-memory tmux.

use std::path::PathBuf;
use std::process::Command;

use crate::error::TmuxError;

/// Trait for executing one-shot tmux commands.
pub trait TmuxCommandRunner: Send + Sync {
    /// Run `tmux <args>` and return stdout. Non-zero exit is
    /// `TmuxError::CommandFailed`.
    fn run(&self, args: &[&str]) -> Result<String, TmuxError>;
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for &T {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for std::sync::Arc<T> {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

/// Real tmux executor using `std::process::Command`.
#[derive(Debug, Clone)]
pub struct TmuxExecutor {
    tmux_bin: PathBuf,
    socket_path: Option<String>,
    socket_name: Option<String>,
}

impl TmuxExecutor {
    pub fn new(tmux_bin: impl Into<PathBuf>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
            socket_path: None,
            socket_name: None,
        }
    }

    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = Some(name.into());
        self
    }

    pub fn tmux_bin(&self) -> &std::path::Path {
        &self.tmux_bin
    }

    /// Global arguments (socket selection) that precede every command. The
    /// control connection reuses them so it talks to the same server.
    pub fn global_args(&self) -> Vec<String> {
        // Socket path takes precedence over socket name
        if let Some(ref path) = self.socket_path {
            vec!["-S".into(), path.clone()]
        } else if let Some(ref name) = self.socket_name {
            vec!["-L".into(), name.clone()]
        } else {
            Vec::new()
        }
    }

    fn command_line(&self, args: &[&str]) -> String {
        let mut parts = vec![self.tmux_bin.display().to_string()];
        parts.extend(self.global_args());
        parts.extend(args.iter().map(|a| a.to_string()));
        parts.join(" ")
    }
}

impl Default for TmuxExecutor {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxCommandRunner for TmuxExecutor {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let mut cmd = Command::new(&self.tmux_bin);
        cmd.args(self.global_args());
        cmd.args(args);
        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TmuxError::Unavailable
            } else {
                TmuxError::Io(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let captured = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            let err = TmuxError::CommandFailed {
                command: self.command_line(args),
                code: output.status.code().unwrap_or(-1),
                output: captured,
            };
            tracing::debug!(%err, "tmux command failed");
            return Err(err);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
