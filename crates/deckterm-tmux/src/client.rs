//! Control mode connection to one multiplexed session.
//!
//! Wires a [`ProcessSupervisor`] running `tmux -C attach-session` to a
//! [`ControlProtocolParser`] and a [`CommandCorrelator`]. Parser events are
//! forwarded to an [`EventSink`] from the reader task.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use deckterm_core::{MultiplexedPane, MultiplexedWindow, PaneId, WindowId};

use crate::control_mode::PayloadEncoding;
use crate::correlator::{CommandCorrelator, CommandResponse, POLL_INTERVAL};
use crate::error::TmuxError;
use crate::parser::{ControlEvent, ControlProtocolParser, SessionRef};
use crate::process::{ByteSink, LaunchSpec, ProcessSupervisor};
use crate::topology::{
    LIST_PANES_FORMAT, LIST_WINDOWS_FORMAT, parse_list_panes_output, parse_list_windows_output,
};

/// Receiver of parser events. Called from the reader task.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: ControlEvent);
}

impl EventSink for mpsc::UnboundedSender<ControlEvent> {
    fn emit(&self, event: ControlEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.send(event);
    }
}

type SharedParser = Arc<Mutex<ControlProtocolParser>>;

fn lock(parser: &SharedParser) -> MutexGuard<'_, ControlProtocolParser> {
    parser.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Feeds stdout into the parser and forwards the resulting events.
struct ControlSink {
    parser: SharedParser,
    events: Arc<dyn EventSink>,
}

impl ByteSink for ControlSink {
    fn on_bytes(&mut self, bytes: &[u8]) {
        let events = lock(&self.parser).feed(bytes);
        for event in events {
            self.events.emit(event);
        }
    }

    fn on_eof(&mut self) {
        let events = lock(&self.parser).finish();
        for event in events {
            self.events.emit(event);
        }
    }
}

/// Split direction for `split-window` / `join-pane`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDirection {
    /// Side by side (`-h`).
    Horizontal,
    /// Stacked (`-v`).
    Vertical,
}

impl SplitDirection {
    fn flag(self) -> &'static str {
        match self {
            Self::Horizontal => "-h",
            Self::Vertical => "-v",
        }
    }
}

pub struct ControlClient {
    session_name: String,
    supervisor: ProcessSupervisor,
    parser: SharedParser,
    correlator: Arc<CommandCorrelator>,
    /// Keeps prepare+write atomic so wire order matches id order.
    write_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("session_name", &self.session_name)
            .field("pid", &self.supervisor.pid())
            .finish_non_exhaustive()
    }
}

impl ControlClient {
    /// Spawn `tmux [global args] -C attach-session -t =<name>`.
    ///
    /// Returns once the child is running; use [`wait_connected`] to wait for
    /// the server to accept the client.
    ///
    /// [`wait_connected`]: Self::wait_connected
    pub fn attach(
        tmux_bin: &Path,
        global_args: &[String],
        session_name: &str,
        encoding: PayloadEncoding,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, TmuxError> {
        let correlator = Arc::new(CommandCorrelator::new());
        let parser: SharedParser = Arc::new(Mutex::new(
            ControlProtocolParser::new(encoding).with_correlator(Arc::clone(&correlator)),
        ));

        let spec = LaunchSpec::new(tmux_bin)
            .args(global_args.iter().cloned())
            .args(["-C", "attach-session", "-t"])
            .arg(format!("={session_name}"));
        let sink = ControlSink {
            parser: Arc::clone(&parser),
            events,
        };
        let supervisor = ProcessSupervisor::start(&spec, Box::new(sink), None).map_err(|e| match e {
            TmuxError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => TmuxError::Unavailable,
            other => other,
        })?;
        tracing::info!(session = session_name, pid = ?supervisor.pid(), "control client attached");

        Ok(Self {
            session_name: session_name.to_string(),
            supervisor,
            parser,
            correlator,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Wait until `%session-changed` marks the client connected. A child that
    /// exits first means the session could not be attached.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TmuxError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return Ok(());
            }
            if self.supervisor.has_exited() {
                return Err(TmuxError::SessionNotFound(self.session_name.clone()));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TmuxError::Timeout {
                    command: format!("attach-session -t ={}", self.session_name),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Send one command line. `Ok(None)` means no response arrived within
    /// `timeout`.
    pub async fn command(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<Option<CommandResponse>, TmuxError> {
        let id = {
            let _guard = self.write_lock.lock().await;
            let (wire, id) = self.correlator.prepare(text)?;
            if let Err(e) = self.supervisor.write(wire.as_bytes()).await {
                self.correlator.cancel(id);
                return Err(e);
            }
            id
        };
        tracing::trace!(id, command = text, "sent control command");
        Ok(self.correlator.await_response(id, timeout).await)
    }

    /// Like [`command`](Self::command), but a missing response is
    /// `Timeout` and an `%error` block is `CommandFailed`.
    pub async fn request(&self, text: &str, timeout: Duration) -> Result<String, TmuxError> {
        match self.command(text, timeout).await? {
            Some(response) if response.success => Ok(response.output),
            Some(response) => Err(TmuxError::CommandFailed {
                command: text.to_string(),
                code: 1,
                output: response.output.trim_end().to_string(),
            }),
            None => Err(TmuxError::Timeout {
                command: text.to_string(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Window and pane commands
    // ------------------------------------------------------------------

    /// Split `target` (or the active pane) and return the new pane.
    pub async fn split_window(
        &self,
        target: Option<PaneId>,
        direction: SplitDirection,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<PaneId, TmuxError> {
        let mut cmd = format!("split-window {} -P -F '#{{pane_id}}'", direction.flag());
        if let Some(target) = target {
            cmd.push_str(&format!(" -t {target}"));
        }
        if let Some(cwd) = cwd {
            cmd.push_str(&format!(" -c {}", quote(&cwd.to_string_lossy())));
        }
        let output = self.request(&cmd, timeout).await?;
        parse_created(&output, PaneId::parse_ref, &cmd)
    }

    pub async fn select_pane(&self, pane: PaneId, timeout: Duration) -> Result<(), TmuxError> {
        self.request(&format!("select-pane -t {pane}"), timeout).await.map(drop)
    }

    pub async fn kill_pane(&self, pane: PaneId, timeout: Duration) -> Result<(), TmuxError> {
        self.request(&format!("kill-pane -t {pane}"), timeout).await.map(drop)
    }

    pub async fn resize_pane(
        &self,
        pane: PaneId,
        width: Option<u16>,
        height: Option<u16>,
        timeout: Duration,
    ) -> Result<(), TmuxError> {
        let mut cmd = format!("resize-pane -t {pane}");
        if let Some(width) = width {
            cmd.push_str(&format!(" -x {width}"));
        }
        if let Some(height) = height {
            cmd.push_str(&format!(" -y {height}"));
        }
        self.request(&cmd, timeout).await.map(drop)
    }

    pub async fn swap_pane(&self, src: PaneId, dst: PaneId, timeout: Duration) -> Result<(), TmuxError> {
        self.request(&format!("swap-pane -s {src} -t {dst}"), timeout).await.map(drop)
    }

    /// Move `pane` into a new window without switching to it.
    pub async fn break_pane(&self, pane: PaneId, timeout: Duration) -> Result<WindowId, TmuxError> {
        let cmd = format!("break-pane -d -s {pane} -P -F '#{{window_id}}'");
        let output = self.request(&cmd, timeout).await?;
        parse_created(&output, WindowId::parse_ref, &cmd)
    }

    pub async fn join_pane(
        &self,
        src: PaneId,
        dst: PaneId,
        direction: SplitDirection,
        timeout: Duration,
    ) -> Result<(), TmuxError> {
        let cmd = format!("join-pane {} -s {src} -t {dst}", direction.flag());
        self.request(&cmd, timeout).await.map(drop)
    }

    pub async fn new_window(
        &self,
        name: Option<&str>,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<WindowId, TmuxError> {
        let mut cmd = String::from("new-window -P -F '#{window_id}'");
        if let Some(name) = name {
            cmd.push_str(&format!(" -n {}", quote(name)));
        }
        if let Some(cwd) = cwd {
            cmd.push_str(&format!(" -c {}", quote(&cwd.to_string_lossy())));
        }
        let output = self.request(&cmd, timeout).await?;
        parse_created(&output, WindowId::parse_ref, &cmd)
    }

    pub async fn select_window(&self, window: WindowId, timeout: Duration) -> Result<(), TmuxError> {
        self.request(&format!("select-window -t {window}"), timeout).await.map(drop)
    }

    pub async fn rename_window(
        &self,
        window: WindowId,
        name: &str,
        timeout: Duration,
    ) -> Result<(), TmuxError> {
        let cmd = format!("rename-window -t {window} {}", quote(name));
        self.request(&cmd, timeout).await.map(drop)
    }

    pub async fn kill_window(&self, window: WindowId, timeout: Duration) -> Result<(), TmuxError> {
        self.request(&format!("kill-window -t {window}"), timeout).await.map(drop)
    }

    pub async fn next_window(&self, timeout: Duration) -> Result<(), TmuxError> {
        self.request("next-window", timeout).await.map(drop)
    }

    pub async fn previous_window(&self, timeout: Duration) -> Result<(), TmuxError> {
        self.request("previous-window", timeout).await.map(drop)
    }

    /// Layout string of `window`, or of the current window.
    pub async fn window_layout(
        &self,
        window: Option<WindowId>,
        timeout: Duration,
    ) -> Result<String, TmuxError> {
        let cmd = match window {
            Some(window) => format!("display-message -p -t {window} '#{{window_layout}}'"),
            None => "display-message -p '#{window_layout}'".to_string(),
        };
        let output = self.request(&cmd, timeout).await?;
        Ok(output.trim_end().to_string())
    }

    /// Re-read windows and panes and install them as the current topology.
    pub async fn refresh_topology(&self, timeout: Duration) -> Result<(), TmuxError> {
        let windows = self
            .request(&format!("list-windows -F '{LIST_WINDOWS_FORMAT}'"), timeout)
            .await?;
        let panes = self
            .request(&format!("list-panes -s -F '{LIST_PANES_FORMAT}'"), timeout)
            .await?;
        let windows = parse_list_windows_output(&windows)?;
        let panes = parse_list_panes_output(&panes)?;
        lock(&self.parser).replace_topology(windows, panes);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Detach this client; the session keeps running. Waits up to `timeout`
    /// for tmux to close the connection, then tears it down regardless.
    pub async fn detach(&self, timeout: Duration) -> Result<(), TmuxError> {
        let sent = match self.command("detach-client", timeout).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(session = %self.session_name, error = %e, "detach-client not delivered");
                false
            }
        };
        if sent {
            if self.supervisor.wait_exit(timeout).await.is_none() {
                tracing::debug!(session = %self.session_name, "control client did not exit after detach");
            }
            // Let the reader drain `%exit` before it is aborted.
            let deadline = tokio::time::Instant::now() + timeout;
            while self.is_connected() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
        self.disconnect();
        Ok(())
    }

    /// Stop reading, terminate the child and drop all protocol state.
    pub fn disconnect(&self) {
        self.supervisor.terminate();
        lock(&self.parser).reset();
        self.correlator.reset();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.parser).is_connected()
    }

    /// Whether the control process is still running and not torn down.
    pub fn is_alive(&self) -> bool {
        !self.supervisor.is_terminated() && !self.supervisor.has_exited()
    }

    pub fn session(&self) -> Option<SessionRef> {
        lock(&self.parser).session().cloned()
    }

    pub fn windows(&self) -> Vec<MultiplexedWindow> {
        lock(&self.parser).windows()
    }

    pub fn panes(&self) -> Vec<MultiplexedPane> {
        lock(&self.parser).panes()
    }

    pub fn panes_in(&self, window: WindowId) -> Vec<MultiplexedPane> {
        lock(&self.parser).panes_in(window)
    }
}

/// Double-quote an argument for the tmux command parser.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn parse_created<T>(
    output: &str,
    parse: impl Fn(&str) -> Option<T>,
    command: &str,
) -> Result<T, TmuxError> {
    let first = output.lines().next().unwrap_or("").trim();
    parse(first).ok_or_else(|| TmuxError::Decode(format!("`{command}` returned {first:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a \"b\" $HOME \\"), r#""a \"b\" \$HOME \\""#);
    }

    #[test]
    fn parse_created_takes_first_line() {
        assert_eq!(parse_created("%7\n", PaneId::parse_ref, "x").expect("id"), PaneId(7));
        assert!(matches!(
            parse_created("", WindowId::parse_ref, "new-window"),
            Err(TmuxError::Decode(_))
        ));
    }

    #[cfg(unix)]
    mod fake_tmux {
        use super::*;
        use crate::fake::install_control_script;

        const TIMEOUT: Duration = Duration::from_secs(5);

        fn attach(
            dir: &Path,
            name: &str,
        ) -> (ControlClient, mpsc::UnboundedReceiver<ControlEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let client = ControlClient::attach(&install_control_script(dir), &[], name, PayloadEncoding::Percent, Arc::new(tx))
                .expect("attach");
            (client, rx)
        }

        #[tokio::test]
        async fn connects_and_answers_commands() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (client, mut rx) = attach(dir.path(), "deckterm-0badf00d");
            client.wait_connected(TIMEOUT).await.expect("connected");

            let event = rx.recv().await.expect("event");
            assert_eq!(
                event,
                ControlEvent::Connected { session_id: "1".into(), name: "deckterm-0badf00d".into() }
            );
            assert_eq!(client.session().map(|s| s.name), Some("deckterm-0badf00d".to_string()));

            assert_eq!(client.window_layout(None, TIMEOUT).await.expect("layout"), "b25d,80x24,0,0,1");
            client.select_pane(PaneId(1), TIMEOUT).await.expect("select");
            client.disconnect();
        }

        #[tokio::test]
        async fn error_block_is_command_failed() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (client, _rx) = attach(dir.path(), "deckterm-0badf00d");
            client.wait_connected(TIMEOUT).await.expect("connected");

            let err = client.request("bogus", TIMEOUT).await.unwrap_err();
            match err {
                TmuxError::CommandFailed { command, output, .. } => {
                    assert_eq!(command, "bogus");
                    assert_eq!(output, "unknown command: bogus");
                }
                other => panic!("unexpected {other:?}"),
            }
            client.disconnect();
        }

        #[tokio::test]
        async fn multi_line_request_is_refused_and_pairing_holds() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (client, _rx) = attach(dir.path(), "deckterm-0badf00d");
            client.wait_connected(TIMEOUT).await.expect("connected");

            let err = client
                .request("display-message -p '#{window_layout}'\nbogus", TIMEOUT)
                .await
                .unwrap_err();
            assert!(matches!(err, TmuxError::InvalidCommand(_)), "{err:?}");
            assert_eq!(client.correlator.in_flight(), 0);
            assert_eq!(client.window_layout(None, TIMEOUT).await.expect("layout"), "b25d,80x24,0,0,1");
            client.disconnect();
        }

        #[tokio::test]
        async fn unanswered_command_times_out_and_stream_continues() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (client, _rx) = attach(dir.path(), "deckterm-0badf00d");
            client.wait_connected(TIMEOUT).await.expect("connected");

            let none = client.command("silent", Duration::from_millis(50)).await.expect("sent");
            assert!(none.is_none());
            // FIFO binding: the unanswered command never saw a %begin, so the
            // next response binds to it. Reset before continuing.
            client.correlator.reset();
            assert!(client.request("next-window", TIMEOUT).await.is_ok());
            client.disconnect();
        }

        #[tokio::test]
        async fn split_refresh_and_layout_events() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (client, mut rx) = attach(dir.path(), "deckterm-0badf00d");
            client.wait_connected(TIMEOUT).await.expect("connected");

            let pane = client
                .split_window(Some(PaneId(1)), SplitDirection::Horizontal, None, TIMEOUT)
                .await
                .expect("split");
            assert_eq!(pane, PaneId(5));

            let mut saw_layout = false;
            while let Ok(Some(event)) = tokio::time::timeout(TIMEOUT, rx.recv()).await {
                if matches!(event, ControlEvent::LayoutChanged { .. }) {
                    saw_layout = true;
                    break;
                }
            }
            assert!(saw_layout);

            client.refresh_topology(TIMEOUT).await.expect("refresh");
            let windows = client.windows();
            assert_eq!(windows.len(), 1);
            assert_eq!(windows[0].name, "zsh");
            let panes = client.panes_in(WindowId(1));
            assert_eq!(panes.len(), 2);
            assert_eq!(panes[1].title, "vim");
            client.disconnect();
        }

        #[tokio::test]
        async fn detach_closes_connection() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (client, mut rx) = attach(dir.path(), "deckterm-0badf00d");
            client.wait_connected(TIMEOUT).await.expect("connected");

            client.detach(TIMEOUT).await.expect("detach");
            assert!(!client.is_alive());
            assert!(!client.is_connected());

            let mut reasons = Vec::new();
            while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                if let ControlEvent::Disconnected { reason } = event {
                    reasons.push(reason);
                }
            }
            assert_eq!(reasons, vec![Some("detached".to_string())]);
        }

        #[tokio::test]
        async fn missing_session_fails_to_connect() {
            let dir = tempfile::tempdir().expect("tempdir");
            let (client, _rx) = attach(dir.path(), "missing");
            let err = client.wait_connected(TIMEOUT).await.unwrap_err();
            assert!(matches!(err, TmuxError::SessionNotFound(ref name) if name == "missing"));
        }
    }
}
