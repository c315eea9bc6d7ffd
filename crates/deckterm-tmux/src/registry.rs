//! Enumeration and one-shot management of application-owned tmux sessions.
//!
//! The tmux server is the source of truth: nothing here caches session state.
//! Names without the reserved prefix are invisible to every operation that
//! enumerates.

use std::path::Path;

use chrono::DateTime;

use deckterm_core::{RecoverableSessionInfo, short_id};

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;
use crate::locator::{Detection, ExecutableLocator, detect_at};

/// Pipe-delimited format string for `list-sessions -F`.
pub const LIST_SESSIONS_FORMAT: &str =
    "#{session_name}|#{session_created}|#{session_attached}|#{pane_current_path}";

/// Detect tmux: an explicitly configured binary wins, else search.
pub fn detect(explicit: Option<&Path>, locator: &ExecutableLocator) -> Detection {
    match explicit {
        Some(path) => detect_at(path),
        None => locator.detect(),
    }
}

/// `=<name>`: exact-match target, so `deckterm-1` never matches
/// `deckterm-12`.
fn exact(name: &str) -> String {
    format!("={name}")
}

#[derive(Debug, Clone)]
pub struct SessionRegistry<R> {
    runner: R,
}

impl<R: TmuxCommandRunner> SessionRegistry<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Every application-owned session. No running server means no sessions.
    pub fn list(&self) -> Result<Vec<RecoverableSessionInfo>, TmuxError> {
        match self.runner.run(&["list-sessions", "-F", LIST_SESSIONS_FORMAT]) {
            Ok(output) => Ok(parse_list_sessions_output(&output)),
            Err(e) if e.is_no_server() => {
                tracing::debug!("no tmux server running, no sessions");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Application-owned sessions no client is attached to.
    pub fn list_recoverable(&self) -> Result<Vec<RecoverableSessionInfo>, TmuxError> {
        Ok(self.list()?.into_iter().filter(|s| !s.attached).collect())
    }

    pub fn exists(&self, name: &str) -> Result<bool, TmuxError> {
        match self.runner.run(&["has-session", "-t", &exact(name)]) {
            Ok(_) => Ok(true),
            Err(e) if e.is_missing_session() || e.is_no_server() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a detached session running `shell` as a login shell.
    pub fn create(
        &self,
        name: &str,
        working_dir: &Path,
        shell: &str,
        env: &[(String, String)],
    ) -> Result<(), TmuxError> {
        let cwd = working_dir.to_string_lossy();
        let assignments: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut args: Vec<&str> = vec!["new-session", "-d", "-s", name, "-c", cwd.as_ref()];
        for assignment in &assignments {
            args.push("-e");
            args.push(assignment);
        }
        args.push(shell);
        args.push("-l");

        self.runner.run(&args)?;
        tracing::info!(session = name, cwd = %cwd, shell, "created tmux session");
        Ok(())
    }

    pub fn kill(&self, name: &str) -> Result<(), TmuxError> {
        match self.runner.run(&["kill-session", "-t", &exact(name)]) {
            Ok(_) => {
                tracing::info!(session = name, "killed tmux session");
                Ok(())
            }
            Err(e) if e.is_missing_session() || e.is_no_server() => {
                Err(TmuxError::SessionNotFound(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Parse `list-sessions -F LIST_SESSIONS_FORMAT` output, keeping only
/// application-owned sessions. Malformed lines are logged and skipped.
pub fn parse_list_sessions_output(output: &str) -> Vec<RecoverableSessionInfo> {
    let mut sessions = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        // The path is last and may itself contain '|'.
        let parts: Vec<&str> = line.splitn(4, '|').collect();
        if parts.len() < 4 {
            tracing::debug!(line, "skipping malformed list-sessions line");
            continue;
        }
        let name = parts[0];
        let Some(short) = short_id(name) else {
            continue;
        };
        let Some(created_at) = parts[1]
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        else {
            tracing::debug!(line, "skipping list-sessions line with bad creation time");
            continue;
        };
        sessions.push(RecoverableSessionInfo {
            name: name.to_string(),
            short_id: short.to_string(),
            created_at,
            attached: parts[2].trim().parse::<u32>().map(|n| n > 0).unwrap_or(false),
            current_path: parts[3].to_string(),
        });
    }
    sessions
}
