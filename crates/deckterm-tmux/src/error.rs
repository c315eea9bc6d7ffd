//! Error types for the multiplexer backend.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmuxError {
    /// No tmux binary could be located. Callers fall back to the direct backend.
    #[error("tmux is not available")]
    Unavailable,

    #[error("tmux session not found: {0}")]
    SessionNotFound(String),

    #[error("`{command}` failed (exit code {code}): {output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    /// A control-mode command spanning several lines would be read by tmux
    /// as several commands.
    #[error("control command must be a single line: {0:?}")]
    InvalidCommand(String),

    #[error("could not decode tmux output: {0}")]
    Decode(String),

    #[error("no response to `{command}` after {waited_ms}ms")]
    Timeout { command: String, waited_ms: u64 },

    #[error("process is not running")]
    NotRunning,

    #[error("tmux io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TmuxError {
    /// Whether a failed command reported that its target session is missing.
    pub fn is_missing_session(&self) -> bool {
        match self {
            Self::SessionNotFound(_) => true,
            Self::CommandFailed { output, .. } => {
                output.contains("can't find session") || output.contains("session not found")
            }
            _ => false,
        }
    }

    /// Whether a failed command reported that no tmux server is running.
    pub fn is_no_server(&self) -> bool {
        match self {
            Self::CommandFailed { output, .. } => {
                output.contains("no server running") || output.contains("error connecting to")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(output: &str) -> TmuxError {
        TmuxError::CommandFailed {
            command: "tmux kill-session -t =x".into(),
            code: 1,
            output: output.into(),
        }
    }

    #[test]
    fn command_failed_message_is_actionable() {
        let msg = failed("can't find session: x").to_string();
        assert!(msg.contains("tmux kill-session -t =x"), "msg was: {msg}");
        assert!(msg.contains("exit code 1"), "msg was: {msg}");
        assert!(msg.contains("can't find session"), "msg was: {msg}");
    }

    #[test]
    fn classifies_missing_session() {
        assert!(failed("can't find session: deckterm-00000000").is_missing_session());
        assert!(TmuxError::SessionNotFound("x".into()).is_missing_session());
        assert!(!failed("unknown command").is_missing_session());
    }

    #[test]
    fn classifies_no_server() {
        assert!(failed("no server running on /tmp/tmux-501/default").is_no_server());
        assert!(failed("error connecting to /tmp/tmux-501/default (No such file or directory)").is_no_server());
        assert!(!TmuxError::Unavailable.is_no_server());
    }
}
