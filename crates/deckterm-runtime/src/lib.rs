//! deckterm-runtime: the session backend facade.
//! Routes each session to the direct or the multiplexed backend, owns its
//! lifecycle and fans all session output into one event channel.

pub mod config;
pub mod error;
pub mod events;
pub mod facade;

pub use config::{ConfigError, RuntimeConfig};
pub use error::RuntimeError;
pub use events::SessionEvent;
pub use facade::{
    BackendFacade, OpenRequest, ReconcileReport, Recovered, SessionSnapshot,
};
