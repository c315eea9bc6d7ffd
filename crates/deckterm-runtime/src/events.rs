//! Event fan-in: every session reports into one channel, tagged with its id.

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use deckterm_core::PaneId;
use deckterm_tmux::{ByteSink, ControlEvent, EventSink};

/// One event from one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: Uuid,
    pub event: ControlEvent,
}

/// Tags control-mode events with the session they came from.
pub(crate) struct SessionEventSink {
    session: Uuid,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEventSink {
    pub(crate) fn new(session: Uuid, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }
}

impl EventSink for SessionEventSink {
    fn emit(&self, event: ControlEvent) {
        let _ = self.tx.send(SessionEvent {
            session: self.session,
            event,
        });
    }
}

/// Output of a direct shell, reported as pane `%0`. Only the stdout sink
/// reports end of stream.
pub(crate) struct DirectOutput {
    session: Uuid,
    tx: mpsc::UnboundedSender<SessionEvent>,
    eof_event: bool,
}

impl DirectOutput {
    pub(crate) fn stdout(session: Uuid, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            session,
            tx,
            eof_event: true,
        }
    }

    pub(crate) fn stderr(session: Uuid, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            session,
            tx,
            eof_event: false,
        }
    }

    fn send(&self, event: ControlEvent) {
        let _ = self.tx.send(SessionEvent {
            session: self.session,
            event,
        });
    }
}

impl ByteSink for DirectOutput {
    fn on_bytes(&mut self, bytes: &[u8]) {
        self.send(ControlEvent::PaneOutput {
            pane_id: PaneId(0),
            bytes: Bytes::copy_from_slice(bytes),
        });
    }

    fn on_eof(&mut self) {
        if self.eof_event {
            self.send(ControlEvent::Disconnected { reason: None });
        }
    }
}
