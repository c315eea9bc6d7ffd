//! Stateful control mode parser.
//!
//! [`ControlProtocolParser`] turns the raw byte stream of a `tmux -C` client
//! into typed [`ControlEvent`]s, tolerating lines split across reads. It owns:
//!
//! - the partial-line buffer,
//! - open `%begin` response blocks and the table of completed ones,
//! - the window/pane arena derived from notifications.
//!
//! `feed` never blocks and never fails: unknown verbs, malformed escapes,
//! unmatched `%end` and invalid UTF-8 are logged and skipped.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;

use deckterm_core::{MultiplexedPane, MultiplexedWindow, PaneId, WindowId};

use crate::control_mode::{Notification, PayloadEncoding, parse_line};
use crate::correlator::{CommandCorrelator, CommandResponse};
use crate::layout::parse_layout;

/// `%begin` flag set on responses to commands this client sent.
const CLIENT_COMMAND_FLAG: u32 = 1;

/// Event emitted by the parser, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Connected { session_id: String, name: String },
    Disconnected { reason: Option<String> },
    PaneOutput { pane_id: PaneId, bytes: Bytes },
    LayoutChanged { window_id: WindowId, layout: String },
    WindowAdded { window_id: WindowId },
    WindowClosed { window_id: WindowId },
    WindowRenamed { window_id: WindowId, name: String },
    PaneModeChanged { pane_id: PaneId, in_mode: bool },
}

/// Session the control client is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug)]
struct OpenResponse {
    output: String,
    /// Local command id bound at `%begin`, if a command was waiting.
    local_id: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ControlProtocolParser {
    encoding: PayloadEncoding,
    buffer: Vec<u8>,
    open: HashMap<u64, OpenResponse>,
    /// Wire id of the block body lines currently append to.
    active: Option<u64>,
    completed: HashMap<u64, CommandResponse>,
    windows: BTreeMap<WindowId, MultiplexedWindow>,
    panes: BTreeMap<PaneId, MultiplexedPane>,
    session: Option<SessionRef>,
    connected: bool,
    correlator: Option<Arc<CommandCorrelator>>,
}

impl ControlProtocolParser {
    pub fn new(encoding: PayloadEncoding) -> Self {
        Self {
            encoding,
            ..Self::default()
        }
    }

    /// Route completed blocks of bound commands to `correlator`.
    #[must_use]
    pub fn with_correlator(mut self, correlator: Arc<CommandCorrelator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    /// Append bytes and dispatch every complete line. A trailing partial line
    /// is kept for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(bytes);

        let buffer = std::mem::take(&mut self.buffer);
        let mut start = 0;
        while let Some(offset) = buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = buffer[start..end].strip_suffix(b"\r").unwrap_or(&buffer[start..end]);
            self.dispatch(line, &mut events);
            start = end + 1;
        }
        self.buffer = buffer;
        self.buffer.drain(..start);

        events
    }

    pub fn feed_str(&mut self, text: &str) -> Vec<ControlEvent> {
        self.feed(text.as_bytes())
    }

    /// The child's stdout closed. Emits `Disconnected` unless `%exit` was
    /// already seen.
    pub fn finish(&mut self) -> Vec<ControlEvent> {
        if !self.buffer.is_empty() {
            tracing::debug!(bytes = self.buffer.len(), "dropping partial line at end of stream");
            self.buffer.clear();
        }
        if self.connected {
            self.connected = false;
            vec![ControlEvent::Disconnected { reason: None }]
        } else {
            Vec::new()
        }
    }

    /// Drop buffers, response tables and the arena; mark disconnected.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.open.clear();
        self.active = None;
        self.completed.clear();
        self.windows.clear();
        self.panes.clear();
        self.session = None;
        self.connected = false;
    }

    // ------------------------------------------------------------------
    // Read-only queries
    // ------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn session(&self) -> Option<&SessionRef> {
        self.session.as_ref()
    }

    pub fn windows(&self) -> Vec<MultiplexedWindow> {
        self.windows.values().cloned().collect()
    }

    pub fn window(&self, id: WindowId) -> Option<&MultiplexedWindow> {
        self.windows.get(&id)
    }

    pub fn panes(&self) -> Vec<MultiplexedPane> {
        self.panes.values().cloned().collect()
    }

    pub fn pane(&self, id: PaneId) -> Option<&MultiplexedPane> {
        self.panes.get(&id)
    }

    pub fn panes_in(&self, window: WindowId) -> Vec<MultiplexedPane> {
        self.panes
            .values()
            .filter(|p| p.window_id == window)
            .cloned()
            .collect()
    }

    /// Claim a completed response nobody was waiting for, by wire id.
    pub fn take_completed(&mut self, wire_id: u64) -> Option<CommandResponse> {
        self.completed.remove(&wire_id)
    }

    /// Install the topology reported by a refresh command.
    pub fn replace_topology(&mut self, windows: Vec<MultiplexedWindow>, panes: Vec<MultiplexedPane>) {
        self.windows = windows.into_iter().map(|w| (w.id, w)).collect();
        self.panes = panes.into_iter().map(|p| (p.id, p)).collect();
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn dispatch(&mut self, raw: &[u8], events: &mut Vec<ControlEvent>) {
        let line: Cow<'_, str> = match std::str::from_utf8(raw) {
            Ok(s) => Cow::Borrowed(s),
            Err(e) => {
                tracing::warn!(error = %e, "control line is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(raw)
            }
        };

        // Inside a response block only its terminator is a control line;
        // body lines may themselves start with '%' (e.g. "%3" from list-panes).
        // tmux never nests blocks, so a well-formed %begin means the open
        // block lost its terminator.
        if let Some(active) = self.active {
            let interrupts = line.starts_with("%begin ")
                && matches!(parse_line(&line, self.encoding), Some(Notification::Begin { .. }));
            if interrupts || line.starts_with("%end ") || line.starts_with("%error ") {
                self.handle(parse_line(&line, self.encoding), events);
            } else if let Some(open) = self.open.get_mut(&active) {
                open.output.push_str(&line);
                open.output.push('\n');
            }
            return;
        }

        match parse_line(&line, self.encoding) {
            Some(notification) => self.handle(Some(notification), events),
            None => {
                if !line.is_empty() {
                    tracing::debug!(line = %line, "body line outside a response block");
                }
            }
        }
    }

    fn handle(&mut self, notification: Option<Notification>, events: &mut Vec<ControlEvent>) {
        let Some(notification) = notification else {
            return;
        };
        match notification {
            Notification::Begin { id, flags, .. } => {
                if let Some(previous) = self.active.take() {
                    tracing::warn!(previous, id, "%begin while another block is open, closing it as failed");
                    if let Some(stale) = self.open.remove(&previous) {
                        self.close_block(previous, stale, false);
                    }
                }
                // Only blocks answering this client's own commands carry flag 1;
                // the attach command's block does not.
                let local_id = if flags & CLIENT_COMMAND_FLAG != 0 {
                    self.correlator.as_ref().and_then(|c| c.bind(id))
                } else {
                    None
                };
                self.open.insert(
                    id,
                    OpenResponse {
                        output: String::new(),
                        local_id,
                    },
                );
                self.active = Some(id);
            }
            Notification::End { id, success, .. } => {
                let Some(open) = self.open.remove(&id) else {
                    tracing::debug!(id, "%end without matching %begin");
                    return;
                };
                if self.active == Some(id) {
                    self.active = None;
                }
                if !success {
                    tracing::debug!(id, output = %open.output.trim_end(), "command returned %error");
                }
                self.close_block(id, open, success);
            }
            Notification::Output { pane_id, data } => {
                events.push(ControlEvent::PaneOutput {
                    pane_id,
                    bytes: data,
                });
            }
            Notification::LayoutChange { window_id, layout } => {
                self.apply_layout(window_id, &layout);
                events.push(ControlEvent::LayoutChanged { window_id, layout });
            }
            Notification::WindowAdd { window_id } => {
                self.windows
                    .entry(window_id)
                    .or_insert_with(|| MultiplexedWindow::new(window_id));
                events.push(ControlEvent::WindowAdded { window_id });
            }
            Notification::WindowClose { window_id } => {
                self.windows.remove(&window_id);
                self.panes.retain(|_, p| p.window_id != window_id);
                events.push(ControlEvent::WindowClosed { window_id });
            }
            Notification::WindowRenamed { window_id, name } => {
                self.windows
                    .entry(window_id)
                    .or_insert_with(|| MultiplexedWindow::new(window_id))
                    .name = name.clone();
                events.push(ControlEvent::WindowRenamed { window_id, name });
            }
            Notification::SessionChanged { session_id, name } => {
                self.connected = true;
                self.session = Some(SessionRef {
                    id: session_id.clone(),
                    name: name.clone(),
                });
                events.push(ControlEvent::Connected { session_id, name });
            }
            Notification::PaneModeChanged { pane_id } => {
                if let Some(pane) = self.panes.get_mut(&pane_id) {
                    pane.in_mode = !pane.in_mode;
                    events.push(ControlEvent::PaneModeChanged {
                        pane_id,
                        in_mode: pane.in_mode,
                    });
                }
            }
            Notification::Exit { reason } => {
                self.connected = false;
                events.push(ControlEvent::Disconnected { reason });
            }
            Notification::Unknown(line) => {
                tracing::debug!(line = %line, "ignoring unrecognized control line");
            }
        }
    }

    /// Store the raw layout and upsert one pane per leaf. Panes of the window
    /// missing from a well-formed layout are dropped.
    /// Hand a finished block to its waiter, or park it for `take_completed`.
    fn close_block(&mut self, id: u64, open: OpenResponse, success: bool) {
        let resolved = match (&self.correlator, open.local_id) {
            (Some(correlator), Some(_)) => correlator.resolve(id, open.output.clone(), success),
            _ => false,
        };
        if !resolved {
            self.completed.insert(
                id,
                CommandResponse {
                    id,
                    output: open.output,
                    success,
                },
            );
        }
    }

    fn apply_layout(&mut self, window_id: WindowId, layout: &str) {
        self.windows
            .entry(window_id)
            .or_insert_with(|| MultiplexedWindow::new(window_id))
            .layout = layout.to_string();

        let node = match parse_layout(layout) {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!(%window_id, layout, error = %e, "unparseable layout");
                return;
            }
        };

        let leaves = node.panes();
        self.panes
            .retain(|id, p| p.window_id != window_id || leaves.iter().any(|g| g.pane_id == *id));
        for geometry in leaves {
            let pane = self
                .panes
                .entry(geometry.pane_id)
                .or_insert_with(|| MultiplexedPane::new(geometry.pane_id, window_id));
            pane.window_id = window_id;
            pane.width = geometry.width;
            pane.height = geometry.height;
            pane.x = geometry.x;
            pane.y = geometry.y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ControlProtocolParser {
        ControlProtocolParser::new(PayloadEncoding::Percent)
    }

    #[test]
    fn split_line_yields_one_output_event() {
        let mut p = parser();
        assert!(p.feed_str("%outp").is_empty());
        let events = p.feed_str("ut %1 61\n");
        assert_eq!(
            events,
            vec![ControlEvent::PaneOutput {
                pane_id: PaneId(1),
                bytes: Bytes::from_static(b"61"),
            }]
        );
        assert!(p.feed_str("").is_empty());
    }

    #[test]
    fn multiple_lines_in_one_feed() {
        let mut p = parser();
        let events = p.feed_str("%window-add @1\n%window-add @2\n%window-ad");
        assert_eq!(events.len(), 2);
        let events = p.feed_str("d @3\n");
        assert_eq!(events, vec![ControlEvent::WindowAdded { window_id: WindowId(3) }]);
        assert_eq!(p.windows().len(), 3);
    }

    #[test]
    fn crlf_line_endings() {
        let mut p = parser();
        let events = p.feed_str("%window-add @4\r\n");
        assert_eq!(events, vec![ControlEvent::WindowAdded { window_id: WindowId(4) }]);
    }

    #[test]
    fn begin_body_end_completes_once() {
        let mut p = parser();
        let events = p.feed_str("%begin 1700000000 7 1\none\ntwo\nthree\n%end 1700000000 7 1\n");
        assert!(events.is_empty());
        let response = p.take_completed(7).expect("completed");
        assert_eq!(response.output, "one\ntwo\nthree\n");
        assert!(response.success);
        assert!(p.take_completed(7).is_none());
        assert!(p.take_completed(6).is_none());
        assert!(p.take_completed(8).is_none());
    }

    #[test]
    fn error_block_is_unsuccessful() {
        let mut p = parser();
        p.feed_str("%begin 1 3 0\nunknown command: foo\n%error 1 3 0\n");
        let response = p.take_completed(3).expect("completed");
        assert!(!response.success);
        assert_eq!(response.output, "unknown command: foo\n");
    }

    #[test]
    fn unmatched_end_is_noop() {
        let mut p = parser();
        let events = p.feed_str("%end 1700000000 9 1\n");
        assert!(events.is_empty());
        assert!(p.take_completed(9).is_none());
    }

    #[test]
    fn mismatched_end_inside_block_keeps_block_open() {
        let mut p = parser();
        p.feed_str("%begin 1 5 1\nline\n%end 1 6 1\nmore\n%end 1 5 1\n");
        assert!(p.take_completed(6).is_none());
        assert_eq!(p.take_completed(5).expect("5").output, "line\nmore\n");
    }

    #[test]
    fn begin_inside_block_closes_the_stale_block() {
        let mut p = parser();
        p.feed_str("%begin 1 1 1\npartial\n%begin 1 2 1\nsecond\n%end 1 2 1\n");
        let stale = p.take_completed(1).expect("stale block");
        assert!(!stale.success);
        assert_eq!(stale.output, "partial\n");
        assert_eq!(p.take_completed(2).expect("2").output, "second\n");
        assert!(p.open.is_empty());
        assert_eq!(p.active, None);

        // Notifications flow again once the new block ends.
        let events = p.feed_str("%output %1 hi\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn stale_bound_block_resolves_its_waiter_as_failed() {
        let correlator = Arc::new(CommandCorrelator::new());
        let mut p = parser().with_correlator(Arc::clone(&correlator));
        let (_, first) = correlator.prepare("list-windows").expect("prepare");
        let (_, second) = correlator.prepare("list-panes").expect("prepare");
        p.feed_str("%begin 1 10 1\n@1\n%begin 1 11 1\n%1\n%end 1 11 1\n");

        let stale = correlator.take(first).expect("first resolved");
        assert!(!stale.success);
        assert_eq!(stale.output, "@1\n");
        let fresh = correlator.take(second).expect("second resolved");
        assert!(fresh.success);
        assert_eq!(fresh.output, "%1\n");
        assert_eq!(correlator.in_flight(), 0);
        assert!(p.open.is_empty());
    }

    #[test]
    fn malformed_begin_inside_block_is_body() {
        let mut p = parser();
        p.feed_str("%begin 1 4 1\n%begin soon\n%end 1 4 1\n");
        assert_eq!(p.take_completed(4).expect("4").output, "%begin soon\n");
    }

    #[test]
    fn percent_lines_inside_block_are_body() {
        let mut p = parser();
        let events = p.feed_str("%begin 1 2 1\n%3\t@1\n%output %1 x\n%end 1 2 1\n");
        assert!(events.is_empty(), "no notifications inside a block: {events:?}");
        assert_eq!(p.take_completed(2).expect("2").output, "%3\t@1\n%output %1 x\n");
    }

    #[test]
    fn empty_body_lines_are_kept() {
        let mut p = parser();
        p.feed_str("%begin 1 4 1\n\nx\n%end 1 4 1\n");
        assert_eq!(p.take_completed(4).expect("4").output, "\nx\n");
    }

    #[test]
    fn bound_command_resolves_through_correlator() {
        let correlator = Arc::new(CommandCorrelator::new());
        let mut p = parser().with_correlator(Arc::clone(&correlator));
        // The attach command's own block arrives before anything is sent.
        p.feed_str("%begin 1 100 0\n%end 1 100 0\n");
        let (_, id) = correlator
            .prepare("display-message -p '#{window_layout}'")
            .expect("prepare");
        p.feed_str("%begin 1 101 1\nb25d,80x24,0,0,1\n%end 1 101 1\n");

        let response = correlator.take(id).expect("resolved");
        assert_eq!(response.output, "b25d,80x24,0,0,1\n");
        assert!(p.take_completed(101).is_none());
        // Unsolicited block stays claimable by wire id.
        assert!(p.take_completed(100).is_some());
    }

    #[test]
    fn output_with_non_utf8_payload() {
        let mut p = parser();
        let events = p.feed_str("%output %2 %FF%FEok\n");
        assert_eq!(
            events,
            vec![ControlEvent::PaneOutput {
                pane_id: PaneId(2),
                bytes: Bytes::from_static(b"\xff\xfeok"),
            }]
        );
    }

    #[test]
    fn malformed_escape_keeps_stream_flowing() {
        let mut p = parser();
        let events = p.feed_str("%output %1 ab%zz\n%window-add @1\n");
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ControlEvent::PaneOutput { pane_id: PaneId(1), bytes: Bytes::from_static(b"ab") }
        );
    }

    #[test]
    fn invalid_utf8_line_is_decoded_lossily() {
        let mut p = parser();
        let events = p.feed(b"%window-renamed @1 na\xffme\n");
        assert_eq!(
            events,
            vec![ControlEvent::WindowRenamed {
                window_id: WindowId(1),
                name: "na\u{fffd}me".into(),
            }]
        );
    }

    #[test]
    fn layout_change_upserts_panes_with_geometry() {
        let mut p = parser();
        let layout = "d3da,211x50,0,0{105x50,0,0,0,105x50,106,0,3}";
        let events = p.feed_str(&format!("%layout-change @1 {layout}\n"));
        assert_eq!(
            events,
            vec![ControlEvent::LayoutChanged { window_id: WindowId(1), layout: layout.into() }]
        );
        assert_eq!(p.window(WindowId(1)).expect("window").layout, layout);
        let panes = p.panes_in(WindowId(1));
        assert_eq!(panes.len(), 2);
        let right = p.pane(PaneId(3)).expect("pane 3");
        assert_eq!((right.width, right.height, right.x, right.y), (105, 50, 106, 0));
    }

    #[test]
    fn layout_change_prunes_closed_panes() {
        let mut p = parser();
        p.feed_str("%layout-change @1 d3da,211x50,0,0{105x50,0,0,0,105x50,106,0,3}\n");
        p.feed_str("%layout-change @2 b25d,80x24,0,0,7\n");
        p.feed_str("%layout-change @1 b25d,211x50,0,0,0\n");
        assert!(p.pane(PaneId(3)).is_none());
        assert!(p.pane(PaneId(0)).is_some());
        assert!(p.pane(PaneId(7)).is_some(), "other windows untouched");
    }

    #[test]
    fn unparseable_layout_still_emits_event() {
        let mut p = parser();
        let events = p.feed_str("%layout-change @1 garbage\n");
        assert_eq!(events.len(), 1);
        assert_eq!(p.window(WindowId(1)).expect("window").layout, "garbage");
        assert!(p.panes().is_empty());
    }

    #[test]
    fn window_close_cascades_to_panes() {
        let mut p = parser();
        p.feed_str("%window-add @5\n");
        p.feed_str("%layout-change @5 d3da,211x50,0,0{105x50,0,0,10,105x50,106,0,11}\n");
        p.feed_str("%layout-change @6 b25d,80x24,0,0,12\n");
        assert_eq!(p.panes().len(), 3);

        let events = p.feed_str("%window-close @5\n");
        assert_eq!(events, vec![ControlEvent::WindowClosed { window_id: WindowId(5) }]);
        assert!(p.window(WindowId(5)).is_none());
        assert!(p.panes_in(WindowId(5)).is_empty());
        assert_eq!(p.panes().len(), 1);
    }

    #[test]
    fn session_changed_connects() {
        let mut p = parser();
        assert!(!p.is_connected());
        let events = p.feed_str("%session-changed $3 deckterm-0badf00d\n");
        assert_eq!(
            events,
            vec![ControlEvent::Connected { session_id: "3".into(), name: "deckterm-0badf00d".into() }]
        );
        assert!(p.is_connected());
        assert_eq!(p.session().map(|s| s.name.as_str()), Some("deckterm-0badf00d"));
    }

    #[test]
    fn pane_mode_toggles_tracked_pane_only() {
        let mut p = parser();
        p.feed_str("%layout-change @1 b25d,80x24,0,0,4\n");
        let events = p.feed_str("%pane-mode-changed %4\n");
        assert_eq!(events, vec![ControlEvent::PaneModeChanged { pane_id: PaneId(4), in_mode: true }]);
        assert!(p.pane(PaneId(4)).expect("pane").in_mode);
        p.feed_str("%pane-mode-changed %4\n");
        assert!(!p.pane(PaneId(4)).expect("pane").in_mode);

        assert!(p.feed_str("%pane-mode-changed %99\n").is_empty());
    }

    #[test]
    fn exit_disconnects() {
        let mut p = parser();
        p.feed_str("%session-changed $1 s\n");
        let events = p.feed_str("%exit detached\n");
        assert_eq!(events, vec![ControlEvent::Disconnected { reason: Some("detached".into()) }]);
        assert!(!p.is_connected());
        assert!(p.finish().is_empty(), "already disconnected");
    }

    #[test]
    fn eof_while_connected_disconnects() {
        let mut p = parser();
        p.feed_str("%session-changed $1 s\n%outp");
        assert_eq!(p.finish(), vec![ControlEvent::Disconnected { reason: None }]);
    }

    #[test]
    fn unknown_verb_is_ignored() {
        let mut p = parser();
        let events = p.feed_str("%client-session-changed /dev/ttys001 $1 x\n%window-add @1\n");
        assert_eq!(events, vec![ControlEvent::WindowAdded { window_id: WindowId(1) }]);
    }

    #[test]
    fn reset_drops_everything() {
        let mut p = parser();
        p.feed_str("%session-changed $1 s\n%layout-change @1 b25d,80x24,0,0,1\n");
        p.feed_str("%begin 1 2 1\nx\n%end 1 2 1\n%begin 1 3 1\npartial");
        p.reset();
        assert!(!p.is_connected());
        assert!(p.windows().is_empty());
        assert!(p.panes().is_empty());
        assert!(p.take_completed(2).is_none());
        // No block is open any more and the partial line is gone.
        let events = p.feed_str("\n%window-add @9\n");
        assert_eq!(events, vec![ControlEvent::WindowAdded { window_id: WindowId(9) }]);
    }

    #[test]
    fn replace_topology_installs_snapshot() {
        let mut p = parser();
        p.feed_str("%layout-change @1 b25d,80x24,0,0,1\n");
        let mut pane = MultiplexedPane::new(PaneId(8), WindowId(2));
        pane.title = "vim".into();
        p.replace_topology(vec![MultiplexedWindow::new(WindowId(2))], vec![pane]);
        assert!(p.pane(PaneId(1)).is_none());
        assert_eq!(p.pane(PaneId(8)).expect("pane").title, "vim");
    }
}
