use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::tags::Tag;

// ─── Multiplexer object ids ───────────────────────────────────────

/// Numeric pane id (`%N` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PaneId(pub u32);

/// Numeric window id (`@N` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u32);

/// Strip an optional one-character sigil (`%`, `@`, `$`) and parse the number.
fn parse_ref(s: &str) -> Option<u32> {
    let digits = match s.chars().next() {
        Some(c) if !c.is_ascii_digit() => &s[c.len_utf8()..],
        _ => s,
    };
    digits.parse().ok()
}

impl PaneId {
    /// Parse `%3` or `3`.
    pub fn parse_ref(s: &str) -> Option<Self> {
        parse_ref(s).map(Self)
    }
}

impl WindowId {
    /// Parse `@3` or `3`.
    pub fn parse_ref(s: &str) -> Option<Self> {
        parse_ref(s).map(Self)
    }
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

// ─── Backend & attachment ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Plain child shell; dies with the application.
    Direct,
    /// Long-lived multiplexer session reached over control mode.
    Multiplexed,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Multiplexed => "multiplexed",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "multiplexed" | "tmux" => Ok(Self::Multiplexed),
            _ => Err(format!("unknown backend kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    /// A controller (this process or another client) is attached.
    Attached,
    /// Known to this process but no controller attached.
    Detached,
    /// Exists externally, unknown to this process, nobody attached.
    Orphaned,
}

// ─── Session ──────────────────────────────────────────────────────

/// The supervised unit. The id never changes once minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub backend: BackendKind,
    pub working_dir: PathBuf,
    pub shell: String,
    pub created_at: DateTime<Utc>,
    pub attachment: AttachmentState,
    /// Last-known external session name (multiplexed only).
    pub multiplexer_name: Option<String>,
}

impl Session {
    /// A fresh session with a new id. Multiplexed sessions get their external
    /// name derived from the id.
    pub fn new(
        name: impl Into<String>,
        backend: BackendKind,
        working_dir: impl Into<PathBuf>,
        shell: impl Into<String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), name, backend, working_dir, shell)
    }

    pub fn with_id(
        id: Uuid,
        name: impl Into<String>,
        backend: BackendKind,
        working_dir: impl Into<PathBuf>,
        shell: impl Into<String>,
    ) -> Self {
        let multiplexer_name = match backend {
            BackendKind::Multiplexed => Some(crate::naming::session_name(&id)),
            BackendKind::Direct => None,
        };
        Self {
            id,
            name: name.into(),
            backend,
            working_dir: working_dir.into(),
            shell: shell.into(),
            created_at: Utc::now(),
            attachment: AttachmentState::Detached,
            multiplexer_name,
        }
    }
}

// ─── Multiplexer topology ─────────────────────────────────────────

/// One pane inside a multiplexed session. Always derived from the live
/// protocol stream or a refresh command; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplexedPane {
    pub id: PaneId,
    pub window_id: WindowId,
    pub width: u16,
    pub height: u16,
    pub x: u16,
    pub y: u16,
    pub title: String,
    pub current_path: String,
    /// Copy mode or another special pane mode is active.
    pub in_mode: bool,
    pub active: bool,
}

impl MultiplexedPane {
    pub fn new(id: PaneId, window_id: WindowId) -> Self {
        Self {
            id,
            window_id,
            width: 0,
            height: 0,
            x: 0,
            y: 0,
            title: String::new(),
            current_path: String::new(),
            in_mode: false,
            active: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplexedWindow {
    pub id: WindowId,
    pub name: String,
    /// Raw layout descriptor as last reported.
    pub layout: String,
    pub active: bool,
}

impl MultiplexedWindow {
    pub fn new(id: WindowId) -> Self {
        Self {
            id,
            name: String::new(),
            layout: String::new(),
            active: false,
        }
    }
}

// ─── Recovery ─────────────────────────────────────────────────────

/// Application metadata embedded in a multiplexed session for crash recovery.
///
/// A multiplexed session without a stored card id is foreign to this
/// application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub card_id: Uuid,
    pub title: String,
    pub description: String,
    pub tags: Vec<Tag>,
    pub llm_prompt: String,
    pub llm_next_action: String,
    /// An empty badge is stored as the empty string and reads back as `None`.
    pub badge: Option<String>,
    pub column_id: Option<Uuid>,
    pub is_favourite: bool,
}

impl SessionMetadata {
    /// Metadata with every optional field at its default.
    pub fn new(card_id: Uuid) -> Self {
        Self {
            card_id,
            title: String::new(),
            description: String::new(),
            tags: Vec::new(),
            llm_prompt: String::new(),
            llm_next_action: String::new(),
            badge: None,
            column_id: None,
            is_favourite: false,
        }
    }
}

/// One application-owned external session as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverableSessionInfo {
    pub name: String,
    /// The eight hex characters after the reserved prefix.
    pub short_id: String,
    pub created_at: DateTime<Utc>,
    pub attached: bool,
    pub current_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pane_id_strips_sigil() {
        assert_eq!(PaneId::parse_ref("%12"), Some(PaneId(12)));
        assert_eq!(PaneId::parse_ref("7"), Some(PaneId(7)));
        assert_eq!(PaneId::parse_ref("%"), None);
        assert_eq!(PaneId::parse_ref("%x1"), None);
        assert_eq!(PaneId(3).to_string(), "%3");
    }

    #[test]
    fn window_id_strips_sigil() {
        assert_eq!(WindowId::parse_ref("@5"), Some(WindowId(5)));
        assert_eq!(WindowId(5).to_string(), "@5");
    }

    #[test]
    fn backend_kind_from_str() {
        assert_eq!("direct".parse::<BackendKind>(), Ok(BackendKind::Direct));
        assert_eq!("Multiplexed".parse::<BackendKind>(), Ok(BackendKind::Multiplexed));
        assert_eq!("tmux".parse::<BackendKind>(), Ok(BackendKind::Multiplexed));
        assert!("screen".parse::<BackendKind>().is_err());
    }

    #[test]
    fn backend_kind_serde_lowercase() {
        let json = serde_json::to_string(&BackendKind::Multiplexed).expect("serialize");
        assert_eq!(json, "\"multiplexed\"");
    }

    #[test]
    fn multiplexed_session_gets_derived_name() {
        let id = Uuid::parse_str("0A1B2C3D-0000-4000-8000-000000000000").expect("uuid");
        let s = Session::with_id(id, "build", BackendKind::Multiplexed, "/tmp", "/bin/zsh");
        assert_eq!(s.multiplexer_name.as_deref(), Some("deckterm-0a1b2c3d"));

        let d = Session::with_id(id, "build", BackendKind::Direct, "/tmp", "/bin/zsh");
        assert!(d.multiplexer_name.is_none());
    }

    #[test]
    fn metadata_defaults() {
        let m = SessionMetadata::new(Uuid::nil());
        assert!(m.title.is_empty());
        assert!(m.tags.is_empty());
        assert!(m.badge.is_none());
        assert!(m.column_id.is_none());
        assert!(!m.is_favourite);
    }
}
