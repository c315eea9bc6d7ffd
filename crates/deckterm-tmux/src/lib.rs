//! deckterm-tmux: the tmux boundary of the deckterm session backend.
//! Binary discovery, one-shot commands, the control mode protocol (line
//! decoding, stateful parsing, command correlation), child process
//! supervision, session enumeration and recovery metadata.

pub mod client;
pub mod control_mode;
pub mod correlator;
pub mod error;
pub mod executor;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod layout;
pub mod locator;
pub mod metadata;
pub mod parser;
pub mod process;
pub mod registry;
pub mod topology;

pub use client::{ControlClient, EventSink, SplitDirection};
pub use control_mode::{Notification, PayloadEncoding, percent_decode, percent_encode};
pub use correlator::{CommandCorrelator, CommandResponse, POLL_INTERVAL};
pub use error::TmuxError;
pub use executor::{TmuxCommandRunner, TmuxExecutor};
pub use layout::{LayoutNode, PaneGeometry, parse_layout};
pub use locator::{DEFAULT_SEARCH_PATHS, Detection, ExecutableLocator};
pub use metadata::{
    MetadataKey, MetadataStore, MetadataSync, MetadataUpdate, SyncReport, TmuxEnvironmentStore,
    environment,
};
pub use parser::{ControlEvent, ControlProtocolParser, SessionRef};
pub use process::{ByteSink, LaunchSpec, ProcessSupervisor};
pub use registry::{LIST_SESSIONS_FORMAT, SessionRegistry, detect};
