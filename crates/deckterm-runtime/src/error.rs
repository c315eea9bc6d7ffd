use thiserror::Error;
use uuid::Uuid;

use deckterm_core::CoreError;
use deckterm_tmux::TmuxError;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Tmux(#[from] TmuxError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("session {0} is not multiplexed")]
    NotMultiplexed(Uuid),

    #[error("session {0} is not a direct shell")]
    NotDirect(Uuid),

    #[error("session {0} is not attached")]
    NotAttached(Uuid),

    #[error("session {0} is already open")]
    AlreadyOpen(Uuid),

    #[error("could not store a card id in tmux session {session}")]
    MetadataWriteFailed { session: String },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
