//! Error types for the session data model.

use thiserror::Error;

use crate::lifecycle::LifecycleState;
use crate::types::BackendKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid lifecycle transition {from} -> {to} for {backend} session")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
        backend: BackendKind,
    },

    #[error("not a deckterm session name: {0}")]
    InvalidSessionName(String),
}
