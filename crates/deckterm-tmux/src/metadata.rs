//! Recovery metadata stored in the tmux session environment.
//!
//! Each [`SessionMetadata`] field is one `DECKTERM_<KEY>` variable on the
//! session. Writes are best-effort per key: a failed key is logged and
//! reported, never raised. `DECKTERM_CARD_ID` is the only required key; a
//! session without a valid one is foreign.

use uuid::Uuid;

use deckterm_core::{SessionMetadata, Tag, parse_tags, serialize_tags};

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;

pub const ENV_PREFIX: &str = "DECKTERM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    CardId,
    Title,
    Description,
    Tags,
    LlmPrompt,
    LlmNextAction,
    Badge,
    ColumnId,
    IsFavourite,
}

impl MetadataKey {
    /// Write order. The card id goes first so that a session interrupted
    /// mid-sync is still recognized as ours.
    pub const ALL: [Self; 9] = [
        Self::CardId,
        Self::Title,
        Self::Description,
        Self::Tags,
        Self::LlmPrompt,
        Self::LlmNextAction,
        Self::Badge,
        Self::ColumnId,
        Self::IsFavourite,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::CardId => "CARD_ID",
            Self::Title => "TITLE",
            Self::Description => "DESC",
            Self::Tags => "TAGS",
            Self::LlmPrompt => "LLM_PROMPT",
            Self::LlmNextAction => "LLM_NEXT_ACTION",
            Self::Badge => "BADGE",
            Self::ColumnId => "COLUMN_ID",
            Self::IsFavourite => "IS_FAVOURITE",
        }
    }

    /// Environment variable name, e.g. `DECKTERM_TITLE`.
    pub fn env_name(self) -> String {
        format!("{ENV_PREFIX}_{}", self.suffix())
    }
}

// ─── Storage ──────────────────────────────────────────────────────

/// Per-session key-value storage.
pub trait MetadataStore: Send + Sync {
    fn set(&self, session: &str, key: &str, value: &str) -> Result<(), TmuxError>;

    /// `Ok(None)` when the key was never set.
    fn get(&self, session: &str, key: &str) -> Result<Option<String>, TmuxError>;
}

/// `set-environment` / `show-environment` on the session.
#[derive(Debug, Clone)]
pub struct TmuxEnvironmentStore<R> {
    runner: R,
}

impl<R: TmuxCommandRunner> TmuxEnvironmentStore<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: TmuxCommandRunner> MetadataStore for TmuxEnvironmentStore<R> {
    fn set(&self, session: &str, key: &str, value: &str) -> Result<(), TmuxError> {
        let target = format!("={session}");
        self.runner
            .run(&["set-environment", "-t", &target, key, value])
            .map(drop)
    }

    fn get(&self, session: &str, key: &str) -> Result<Option<String>, TmuxError> {
        let target = format!("={session}");
        match self.runner.run(&["show-environment", "-t", &target, key]) {
            Ok(output) => Ok(parse_show_environment(&output, key)),
            Err(TmuxError::CommandFailed { ref output, .. }) if output.contains("unknown variable") => {
                Ok(None)
            }
            Err(e) if e.is_missing_session() => Err(TmuxError::SessionNotFound(session.to_string())),
            Err(e) => Err(e),
        }
    }
}

/// `KEY=value` is set; `-KEY` is marked for removal, i.e. unset.
///
/// The value runs to the end of the output, so embedded newlines survive.
fn parse_show_environment(output: &str, key: &str) -> Option<String> {
    let entry = output.strip_suffix('\n').unwrap_or(output);
    if entry.starts_with('-') {
        return None;
    }
    let value = entry.strip_prefix(key)?.strip_prefix('=')?;
    Some(value.to_string())
}

// ─── Sync ─────────────────────────────────────────────────────────

/// Outcome of a best-effort write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub written: usize,
    /// Keys that failed, with the error text. Each was logged already.
    pub failed: Vec<(MetadataKey, String)>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A partial edit; only `Some` fields are written.
///
/// `badge` and `column_id` are doubly optional: `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<Tag>>,
    pub llm_prompt: Option<String>,
    pub llm_next_action: Option<String>,
    pub badge: Option<Option<String>>,
    pub column_id: Option<Option<Uuid>>,
    pub is_favourite: Option<bool>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Apply to an in-memory record.
    pub fn apply_to(&self, metadata: &mut SessionMetadata) {
        if let Some(title) = &self.title {
            metadata.title = title.clone();
        }
        if let Some(description) = &self.description {
            metadata.description = description.clone();
        }
        if let Some(tags) = &self.tags {
            metadata.tags = tags.clone();
        }
        if let Some(prompt) = &self.llm_prompt {
            metadata.llm_prompt = prompt.clone();
        }
        if let Some(next) = &self.llm_next_action {
            metadata.llm_next_action = next.clone();
        }
        if let Some(badge) = &self.badge {
            metadata.badge = badge.clone().filter(|b| !b.is_empty());
        }
        if let Some(column) = self.column_id {
            metadata.column_id = column;
        }
        if let Some(favourite) = self.is_favourite {
            metadata.is_favourite = favourite;
        }
    }

    fn entries(&self) -> Vec<(MetadataKey, String)> {
        let mut out = Vec::new();
        if let Some(title) = &self.title {
            out.push((MetadataKey::Title, title.clone()));
        }
        if let Some(description) = &self.description {
            out.push((MetadataKey::Description, description.clone()));
        }
        if let Some(tags) = &self.tags {
            out.push((MetadataKey::Tags, serialize_tags(tags)));
        }
        if let Some(prompt) = &self.llm_prompt {
            out.push((MetadataKey::LlmPrompt, prompt.clone()));
        }
        if let Some(next) = &self.llm_next_action {
            out.push((MetadataKey::LlmNextAction, next.clone()));
        }
        if let Some(badge) = &self.badge {
            out.push((MetadataKey::Badge, badge.clone().unwrap_or_default()));
        }
        if let Some(column) = self.column_id {
            out.push((MetadataKey::ColumnId, encode_column(column)));
        }
        if let Some(favourite) = self.is_favourite {
            out.push((MetadataKey::IsFavourite, encode_bool(favourite)));
        }
        out
    }
}

fn encode_bool(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn encode_column(column: Option<Uuid>) -> String {
    column.map(|c| c.to_string()).unwrap_or_default()
}

fn encode(key: MetadataKey, metadata: &SessionMetadata) -> String {
    match key {
        MetadataKey::CardId => metadata.card_id.to_string(),
        MetadataKey::Title => metadata.title.clone(),
        MetadataKey::Description => metadata.description.clone(),
        MetadataKey::Tags => serialize_tags(&metadata.tags),
        MetadataKey::LlmPrompt => metadata.llm_prompt.clone(),
        MetadataKey::LlmNextAction => metadata.llm_next_action.clone(),
        MetadataKey::Badge => metadata.badge.clone().unwrap_or_default(),
        MetadataKey::ColumnId => encode_column(metadata.column_id),
        MetadataKey::IsFavourite => encode_bool(metadata.is_favourite),
    }
}

/// Every environment assignment for `metadata`, for `new-session -e`.
pub fn environment(metadata: &SessionMetadata) -> Vec<(String, String)> {
    MetadataKey::ALL
        .iter()
        .map(|&key| (key.env_name(), encode(key, metadata)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct MetadataSync<S> {
    store: S,
}

impl<S: MetadataStore> MetadataSync<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Write every key. Never fails; see the report.
    pub fn sync(&self, session: &str, metadata: &SessionMetadata) -> SyncReport {
        let entries: Vec<(MetadataKey, String)> = MetadataKey::ALL
            .iter()
            .map(|&key| (key, encode(key, metadata)))
            .collect();
        self.write(session, entries)
    }

    /// Write only the supplied keys.
    pub fn update(&self, session: &str, update: &MetadataUpdate) -> SyncReport {
        self.write(session, update.entries())
    }

    fn write(&self, session: &str, entries: Vec<(MetadataKey, String)>) -> SyncReport {
        let mut report = SyncReport::default();
        for (key, value) in entries {
            match self.store.set(session, &key.env_name(), &value) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!(session, key = key.suffix(), error = %e, "metadata write failed");
                    report.failed.push((key, e.to_string()));
                }
            }
        }
        report
    }

    /// Read the record back. `Ok(None)` means the session carries no (valid)
    /// card id and is foreign. Only a failure to read the card id itself is
    /// an error; other keys fall back to their defaults.
    pub fn fetch(&self, session: &str) -> Result<Option<SessionMetadata>, TmuxError> {
        let Some(raw) = self.store.get(session, &MetadataKey::CardId.env_name())? else {
            return Ok(None);
        };
        let card_id = match Uuid::parse_str(raw.trim()) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(session, value = %raw, error = %e, "invalid card id, treating session as foreign");
                return Ok(None);
            }
        };

        let mut metadata = SessionMetadata::new(card_id);
        metadata.title = self.read(session, MetadataKey::Title).unwrap_or_default();
        metadata.description = self.read(session, MetadataKey::Description).unwrap_or_default();
        metadata.tags = self
            .read(session, MetadataKey::Tags)
            .map(|t| parse_tags(&t))
            .unwrap_or_default();
        metadata.llm_prompt = self.read(session, MetadataKey::LlmPrompt).unwrap_or_default();
        metadata.llm_next_action = self.read(session, MetadataKey::LlmNextAction).unwrap_or_default();
        metadata.badge = self.read(session, MetadataKey::Badge).filter(|b| !b.is_empty());
        metadata.column_id = self
            .read(session, MetadataKey::ColumnId)
            .filter(|c| !c.is_empty())
            .and_then(|c| match Uuid::parse_str(c.trim()) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(session, value = %c, error = %e, "invalid column id, ignoring");
                    None
                }
            });
        metadata.is_favourite = self.read(session, MetadataKey::IsFavourite).as_deref() == Some("1");
        Ok(Some(metadata))
    }

    /// Optional key: errors degrade to "unset".
    fn read(&self, session: &str, key: MetadataKey) -> Option<String> {
        match self.store.get(session, &key.env_name()) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(session, key = key.suffix(), error = %e, "metadata read failed, using default");
                None
            }
        }
    }
}
