//! deckterm-core: session data model for the deckterm session backend.
//! Sessions, multiplexer topology records, recovery metadata, session naming,
//! and the session lifecycle state machine. No IO, no async.

pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod tags;
pub mod types;

pub use error::CoreError;
pub use lifecycle::LifecycleState;
pub use naming::{SESSION_PREFIX, is_app_session, session_name, short_id};
pub use tags::{Tag, parse_tags, serialize_tags};
pub use types::{
    AttachmentState, BackendKind, MultiplexedPane, MultiplexedWindow, PaneId,
    RecoverableSessionInfo, Session, SessionMetadata, WindowId,
};
