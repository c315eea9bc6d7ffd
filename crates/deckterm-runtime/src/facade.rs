//! The session backend as the rest of the application sees it.
//!
//! [`BackendFacade`] owns every open session, picks its backend, drives its
//! lifecycle through the core state machine and routes all output into one
//! [`SessionEvent`] channel. Multiplexed sessions run in tmux and survive
//! the application; direct sessions are plain child shells.
//!
//! tmux is optional. Without it every multiplexed request is served by a
//! direct shell instead.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use deckterm_core::{
    AttachmentState, BackendKind, LifecycleState, MultiplexedPane, MultiplexedWindow,
    RecoverableSessionInfo, Session, SessionMetadata, session_name,
};
use deckterm_tmux::{
    ByteSink, ControlClient, Detection, EventSink, LaunchSpec, MetadataKey, MetadataSync, MetadataUpdate,
    ProcessSupervisor, SessionRegistry, SyncReport, TmuxCommandRunner, TmuxEnvironmentStore,
    TmuxError, TmuxExecutor, detect,
};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::events::{DirectOutput, SessionEvent, SessionEventSink};

// ─── Public types ─────────────────────────────────────────────────

/// What to open. Unset fields come from the configuration.
#[derive(Debug, Clone, Default)]
pub struct OpenRequest {
    pub title: String,
    pub working_dir: Option<PathBuf>,
    pub shell: Option<String>,
    pub backend: Option<BackendKind>,
    /// Card association. Its card id becomes the session id.
    pub metadata: Option<SessionMetadata>,
}

/// Result of [`BackendFacade::recover`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recovered {
    /// The session carried a card id and is attached again.
    Session(Session),
    /// No card id: the caller may [`adopt`](BackendFacade::adopt) it.
    Foreign(RecoverableSessionInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub state: LifecycleState,
    pub metadata: Option<SessionMetadata>,
    pub windows: Vec<MultiplexedWindow>,
    pub panes: Vec<MultiplexedPane>,
}

/// What [`BackendFacade::reconcile`] found and fixed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Multiplexed sessions whose tmux session is gone. Removed.
    pub vanished: Vec<Uuid>,
    /// Direct shells that exited. Removed.
    pub exited: Vec<Uuid>,
    /// Control connections that died. Now detached.
    pub dropped: Vec<Uuid>,
    /// Unattached application sessions this process does not know.
    pub orphaned: Vec<RecoverableSessionInfo>,
}

// ─── Internal state ───────────────────────────────────────────────

struct Multiplexer<R> {
    runner: Arc<R>,
    tmux_bin: PathBuf,
    global_args: Vec<String>,
}

#[derive(Clone)]
enum Link {
    None,
    Direct(Arc<ProcessSupervisor>),
    Control(Arc<ControlClient>),
}

struct Entry {
    session: Session,
    state: LifecycleState,
    metadata: Option<SessionMetadata>,
    link: Link,
}

impl Entry {
    fn snapshot(&self) -> SessionSnapshot {
        let (windows, panes) = match &self.link {
            Link::Control(client) => (client.windows(), client.panes()),
            _ => (Vec::new(), Vec::new()),
        };
        SessionSnapshot {
            session: self.session.clone(),
            state: self.state,
            metadata: self.metadata.clone(),
            windows,
            panes,
        }
    }

    fn external_name(&self) -> String {
        self.session
            .multiplexer_name
            .clone()
            .unwrap_or_else(|| session_name(&self.session.id))
    }
}

pub struct BackendFacade<R = TmuxExecutor> {
    config: RuntimeConfig,
    detection: Detection,
    mux: Option<Multiplexer<R>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    sessions: Mutex<HashMap<Uuid, Entry>>,
}

impl BackendFacade<TmuxExecutor> {
    /// Detect tmux and build the facade. Detection runs on a blocking task.
    pub async fn initialize(
        config: RuntimeConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), RuntimeError> {
        let locator = config.locator();
        let explicit = config.tmux_path.clone();
        let detection =
            tokio::task::spawn_blocking(move || detect(explicit.as_deref(), &locator)).await?;

        let mux = match (&detection.path, detection.available) {
            (Some(path), true) => {
                let mut executor = TmuxExecutor::new(path);
                if let Some(name) = &config.socket_name {
                    executor = executor.with_socket_name(name.clone());
                }
                tracing::info!(path = %path.display(), version = ?detection.version, "tmux available");
                Some(Multiplexer {
                    tmux_bin: path.clone(),
                    global_args: executor.global_args(),
                    runner: Arc::new(executor),
                })
            }
            _ => {
                tracing::info!("tmux not found, multiplexed sessions will run as direct shells");
                None
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Self::build(config, detection, mux, tx), rx))
    }

    /// A facade that never uses tmux.
    pub fn direct_only(config: RuntimeConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(config, Detection::unavailable(), None, tx), rx)
    }
}

impl<R: TmuxCommandRunner + 'static> BackendFacade<R> {
    /// Use `runner` for one-shot commands and `tmux_bin` for control clients.
    pub fn with_runner(
        config: RuntimeConfig,
        runner: Arc<R>,
        tmux_bin: impl Into<PathBuf>,
        global_args: Vec<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let tmux_bin = tmux_bin.into();
        let detection = Detection {
            available: true,
            path: Some(tmux_bin.clone()),
            version: None,
        };
        let mux = Multiplexer {
            runner,
            tmux_bin,
            global_args,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(config, detection, Some(mux), tx), rx)
    }

    fn build(
        config: RuntimeConfig,
        detection: Detection,
        mux: Option<Multiplexer<R>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            detection,
            mux,
            events,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn detection(&self) -> &Detection {
        &self.detection
    }

    pub fn multiplexer_available(&self) -> bool {
        self.mux.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn mux(&self) -> Result<&Multiplexer<R>, RuntimeError> {
        self.mux.as_ref().ok_or(RuntimeError::Tmux(TmuxError::Unavailable))
    }

    /// Run a one-shot tmux command off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&R) -> Result<T, TmuxError> + Send + 'static,
    {
        let runner = Arc::clone(&self.mux()?.runner);
        Ok(tokio::task::spawn_blocking(move || f(&*runner)).await??)
    }

    // ─── Lifecycle ────────────────────────────────────────────────

    /// Open a new session and bring it to `Running`.
    ///
    /// A multiplexed request without tmux opens a direct shell instead. A
    /// multiplexed session that already exists in tmux is attached, not
    /// recreated.
    pub async fn open(&self, request: OpenRequest) -> Result<Session, RuntimeError> {
        let id = request
            .metadata
            .as_ref()
            .map(|m| m.card_id)
            .unwrap_or_else(Uuid::new_v4);

        let mut backend = request.backend.unwrap_or(self.config.default_backend);
        if backend == BackendKind::Multiplexed && self.mux.is_none() {
            tracing::info!(session = %id, "tmux unavailable, opening a direct shell");
            backend = BackendKind::Direct;
        }

        let working_dir = request
            .working_dir
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));
        let shell = request.shell.unwrap_or_else(|| self.config.shell());
        let session = Session::with_id(id, request.title.clone(), backend, working_dir, shell);

        let metadata = match (backend, request.metadata) {
            (_, Some(metadata)) => Some(metadata),
            (BackendKind::Multiplexed, None) => {
                let mut metadata = SessionMetadata::new(id);
                metadata.title = request.title;
                Some(metadata)
            }
            (BackendKind::Direct, None) => None,
        };

        {
            let mut sessions = self.lock();
            if sessions.contains_key(&id) {
                return Err(RuntimeError::AlreadyOpen(id));
            }
            let state = LifecycleState::Created.transition(LifecycleState::Starting, backend)?;
            sessions.insert(
                id,
                Entry {
                    session: session.clone(),
                    state,
                    metadata: metadata.clone(),
                    link: Link::None,
                },
            );
        }

        let started = match backend {
            BackendKind::Direct => self.start_direct(&session).map(Link::Direct),
            BackendKind::Multiplexed => {
                let metadata = metadata.unwrap_or_else(|| SessionMetadata::new(id));
                self.start_multiplexed(&session, &metadata).await.map(Link::Control)
            }
        };
        match started {
            Ok(link) => self.finish_start(id, link),
            Err(e) => {
                self.fail_start(id, &e);
                Err(e)
            }
        }
    }

    fn start_direct(&self, session: &Session) -> Result<Arc<ProcessSupervisor>, RuntimeError> {
        let spec = LaunchSpec::new(&session.shell)
            .arg("-l")
            .cwd(&session.working_dir)
            .env(MetadataKey::CardId.env_name(), session.id.to_string());
        let supervisor = ProcessSupervisor::start(
            &spec,
            Box::new(DirectOutput::stdout(session.id, self.events.clone())),
            Some(Box::new(DirectOutput::stderr(session.id, self.events.clone())) as Box<dyn ByteSink>),
        )?;
        tracing::info!(session = %session.id, shell = %session.shell, pid = ?supervisor.pid(), "direct shell started");
        Ok(Arc::new(supervisor))
    }

    async fn start_multiplexed(
        &self,
        session: &Session,
        metadata: &SessionMetadata,
    ) -> Result<Arc<ControlClient>, RuntimeError> {
        let name = session
            .multiplexer_name
            .clone()
            .unwrap_or_else(|| session_name(&session.id));

        let exists = {
            let name = name.clone();
            self.blocking(move |r| SessionRegistry::new(r).exists(&name)).await?
        };
        if !exists {
            // The card id goes in at creation so a crash before the full
            // sync still leaves the session attributable.
            let env = vec![(MetadataKey::CardId.env_name(), metadata.card_id.to_string())];
            let (name, cwd, shell) = (name.clone(), session.working_dir.clone(), session.shell.clone());
            self.blocking(move |r| SessionRegistry::new(r).create(&name, &cwd, &shell, &env))
                .await?;
        }

        let client = self.connect(session.id, &name).await?;
        match self.sync_metadata(&name, metadata).await {
            Ok(report) if !report.is_complete() => {
                tracing::warn!(session = %name, failed = report.failed.len(), "initial metadata sync incomplete");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(session = %name, error = %e, "initial metadata sync failed"),
        }
        Ok(client)
    }

    /// Attach a control client and wait for the server to accept it.
    async fn connect(&self, id: Uuid, name: &str) -> Result<Arc<ControlClient>, RuntimeError> {
        let mux = self.mux()?;
        let sink: Arc<dyn EventSink> = Arc::new(SessionEventSink::new(id, self.events.clone()));
        let client = ControlClient::attach(
            &mux.tmux_bin,
            &mux.global_args,
            name,
            self.config.output_encoding,
            sink,
        )?;
        if let Err(e) = client.wait_connected(self.config.attach_timeout()).await {
            client.disconnect();
            return Err(e.into());
        }
        if let Err(e) = client.refresh_topology(self.config.command_timeout()).await {
            tracing::debug!(session = name, error = %e, "initial topology refresh failed");
        }
        Ok(Arc::new(client))
    }

    async fn sync_metadata(
        &self,
        name: &str,
        metadata: &SessionMetadata,
    ) -> Result<SyncReport, RuntimeError> {
        let (name, metadata) = (name.to_string(), metadata.clone());
        self.blocking(move |r| Ok(MetadataSync::new(TmuxEnvironmentStore::new(r)).sync(&name, &metadata)))
            .await
    }

    fn finish_start(&self, id: Uuid, link: Link) -> Result<Session, RuntimeError> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(&id).ok_or(RuntimeError::UnknownSession(id))?;
        entry.state = entry
            .state
            .transition(LifecycleState::Running, entry.session.backend)?;
        entry.session.attachment = AttachmentState::Attached;
        entry.link = link;
        tracing::info!(session = %id, backend = %entry.session.backend, "session running");
        Ok(entry.session.clone())
    }

    fn fail_start(&self, id: Uuid, error: &RuntimeError) {
        if let Some(entry) = self.lock().remove(&id) {
            tracing::warn!(session = %id, backend = %entry.session.backend, error = %error, "session failed to start");
        }
    }

    /// Remove a session, passing through `Terminated`.
    fn retire(&self, id: Uuid) {
        let Some(entry) = self.lock().remove(&id) else {
            return;
        };
        match entry
            .state
            .transition(LifecycleState::Terminated, entry.session.backend)
        {
            Ok(_) => tracing::info!(session = %id, "session terminated"),
            Err(e) => tracing::warn!(session = %id, error = %e, "session removed from unexpected state"),
        }
    }

    fn mark_detached(&self, id: Uuid) -> Result<(), RuntimeError> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(&id).ok_or(RuntimeError::UnknownSession(id))?;
        if entry.state != LifecycleState::Detached {
            entry.state = entry
                .state
                .transition(LifecycleState::Detached, entry.session.backend)?;
        }
        entry.link = Link::None;
        entry.session.attachment = AttachmentState::Detached;
        Ok(())
    }

    fn lookup(&self, id: Uuid) -> Result<(BackendKind, LifecycleState, Link, String), RuntimeError> {
        let sessions = self.lock();
        let entry = sessions.get(&id).ok_or(RuntimeError::UnknownSession(id))?;
        Ok((
            entry.session.backend,
            entry.state,
            entry.link.clone(),
            entry.external_name(),
        ))
    }

    /// Close a session.
    ///
    /// Direct shells are asked to exit (then terminated after the grace
    /// period) whatever `kill` says. Multiplexed sessions are detached and
    /// kept, or killed in tmux and removed when `kill` is set.
    pub async fn close(&self, id: Uuid, kill: bool) -> Result<(), RuntimeError> {
        let (backend, _, link, name) = self.lookup(id)?;
        match backend {
            BackendKind::Direct => {
                if let Link::Direct(supervisor) = &link {
                    self.stop_direct(id, supervisor).await;
                }
                self.retire(id);
            }
            BackendKind::Multiplexed if kill => {
                if let Link::Control(client) = &link {
                    client.disconnect();
                }
                let target = name.clone();
                match self.blocking(move |r| SessionRegistry::new(r).kill(&target)).await {
                    Ok(()) => {}
                    Err(RuntimeError::Tmux(TmuxError::SessionNotFound(_))) => {
                        tracing::debug!(session = %name, "tmux session already gone");
                    }
                    Err(e) => {
                        self.mark_detached(id)?;
                        return Err(e);
                    }
                }
                self.retire(id);
            }
            BackendKind::Multiplexed => {
                if let Link::Control(client) = &link {
                    client.detach(self.config.command_timeout()).await?;
                }
                self.mark_detached(id)?;
                tracing::info!(session = %id, tmux = %name, "session detached");
            }
        }
        Ok(())
    }

    async fn stop_direct(&self, id: Uuid, supervisor: &ProcessSupervisor) {
        if let Err(e) = supervisor.write(b"exit\n").await {
            tracing::debug!(session = %id, error = %e, "could not ask shell to exit");
        }
        if supervisor.wait_exit(self.config.direct_exit_grace()).await.is_none() {
            tracing::debug!(session = %id, "shell still running after grace period, terminating");
        }
        supervisor.terminate();
    }

    /// Re-attach a detached multiplexed session.
    pub async fn attach(&self, id: Uuid) -> Result<Session, RuntimeError> {
        let name = {
            let mut sessions = self.lock();
            let entry = sessions.get_mut(&id).ok_or(RuntimeError::UnknownSession(id))?;
            if entry.session.backend != BackendKind::Multiplexed {
                return Err(RuntimeError::NotMultiplexed(id));
            }
            entry.state = entry
                .state
                .transition(LifecycleState::Starting, entry.session.backend)?;
            entry.external_name()
        };
        match self.connect(id, &name).await {
            Ok(client) => self.finish_start(id, Link::Control(client)),
            Err(e) => {
                self.fail_start(id, &e);
                Err(e)
            }
        }
    }

    /// Close (killing multiplexed sessions) and open again with the same id
    /// and metadata.
    pub async fn restart(&self, id: Uuid) -> Result<Session, RuntimeError> {
        let (session, metadata) = {
            let sessions = self.lock();
            let entry = sessions.get(&id).ok_or(RuntimeError::UnknownSession(id))?;
            (entry.session.clone(), entry.metadata.clone())
        };
        self.close(id, true).await?;
        let metadata = metadata.unwrap_or_else(|| SessionMetadata::new(id));
        self.open(OpenRequest {
            title: session.name,
            working_dir: Some(session.working_dir),
            shell: Some(session.shell),
            backend: Some(session.backend),
            metadata: Some(metadata),
        })
        .await
    }

    /// Shut everything down for application exit: multiplexed sessions are
    /// detached, never killed; direct shells are stopped.
    pub async fn shutdown(&self) {
        let ids: Vec<(Uuid, BackendKind)> = self
            .lock()
            .values()
            .map(|e| (e.session.id, e.session.backend))
            .collect();
        for (id, backend) in ids {
            if let Err(e) = self.close(id, backend == BackendKind::Direct).await {
                tracing::warn!(session = %id, error = %e, "close during shutdown failed");
            }
        }
    }

    // ─── Recovery ─────────────────────────────────────────────────

    /// Unattached application sessions in tmux. Empty without tmux.
    pub async fn list_recoverable(&self) -> Result<Vec<RecoverableSessionInfo>, RuntimeError> {
        if self.mux.is_none() {
            return Ok(Vec::new());
        }
        self.blocking(|r| SessionRegistry::new(r).list_recoverable()).await
    }

    /// Every application session in tmux, attached or not.
    pub async fn list_all(&self) -> Result<Vec<RecoverableSessionInfo>, RuntimeError> {
        if self.mux.is_none() {
            return Ok(Vec::new());
        }
        self.blocking(|r| SessionRegistry::new(r).list()).await
    }

    /// Reconnect to an application session left in tmux.
    ///
    /// With a stored card id the session is rebuilt and attached; without
    /// one it is returned as [`Recovered::Foreign`].
    pub async fn recover(&self, name: &str) -> Result<Recovered, RuntimeError> {
        let info = self
            .blocking(|r| SessionRegistry::new(r).list())
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| TmuxError::SessionNotFound(name.to_string()))?;

        let fetched = {
            let name = name.to_string();
            self.blocking(move |r| MetadataSync::new(TmuxEnvironmentStore::new(r)).fetch(&name))
                .await?
        };
        let Some(metadata) = fetched else {
            tracing::info!(session = name, "no card id stored, session is foreign");
            return Ok(Recovered::Foreign(info));
        };

        let id = metadata.card_id;
        let mut session = Session::with_id(
            id,
            metadata.title.clone(),
            BackendKind::Multiplexed,
            PathBuf::from(&info.current_path),
            self.config.shell(),
        );
        session.created_at = info.created_at;
        session.multiplexer_name = Some(info.name.clone());

        {
            let mut sessions = self.lock();
            if sessions.contains_key(&id) {
                return Err(RuntimeError::AlreadyOpen(id));
            }
            let state =
                LifecycleState::Created.transition(LifecycleState::Starting, BackendKind::Multiplexed)?;
            sessions.insert(
                id,
                Entry {
                    session,
                    state,
                    metadata: Some(metadata),
                    link: Link::None,
                },
            );
        }

        match self.connect(id, name).await {
            Ok(client) => {
                let session = self.finish_start(id, Link::Control(client))?;
                tracing::info!(session = %id, tmux = name, "session recovered");
                Ok(Recovered::Session(session))
            }
            Err(e) => {
                self.fail_start(id, &e);
                Err(e)
            }
        }
    }

    /// Kill an application session in tmux by name, whether or not this
    /// process has it open.
    pub async fn kill_by_name(&self, name: &str) -> Result<(), RuntimeError> {
        let known = self
            .lock()
            .values()
            .find(|e| e.session.backend == BackendKind::Multiplexed && e.external_name() == name)
            .map(|e| e.session.id);
        if let Some(id) = known {
            return self.close(id, true).await;
        }
        let target = name.to_string();
        self.blocking(move |r| SessionRegistry::new(r).kill(&target)).await
    }

    /// Give a foreign application session a card and recover it.
    pub async fn adopt(&self, name: &str, metadata: SessionMetadata) -> Result<Session, RuntimeError> {
        let exists = {
            let name = name.to_string();
            self.blocking(move |r| SessionRegistry::new(r).exists(&name)).await?
        };
        if !exists {
            return Err(TmuxError::SessionNotFound(name.to_string()).into());
        }

        let report = self.sync_metadata(name, &metadata).await?;
        if report.failed.iter().any(|(key, _)| *key == MetadataKey::CardId) {
            return Err(RuntimeError::MetadataWriteFailed {
                session: name.to_string(),
            });
        }
        match self.recover(name).await? {
            Recovered::Session(session) => Ok(session),
            Recovered::Foreign(_) => Err(RuntimeError::MetadataWriteFailed {
                session: name.to_string(),
            }),
        }
    }

    /// Bring the in-memory table in line with tmux and the child processes.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RuntimeError> {
        let listing = match self.mux {
            Some(_) => Some(self.blocking(|r| SessionRegistry::new(r).list()).await?),
            None => None,
        };

        let mut report = ReconcileReport::default();
        let mut teardown = Vec::new();
        {
            let mut sessions = self.lock();
            for entry in sessions.values_mut() {
                let id = entry.session.id;
                // Mid-open or mid-attach: leave it to the caller in flight.
                if entry.state == LifecycleState::Starting {
                    continue;
                }
                if let Link::Direct(supervisor) = &entry.link {
                    if supervisor.has_exited() {
                        report.exited.push(id);
                    }
                    continue;
                }
                if entry.session.backend != BackendKind::Multiplexed {
                    continue;
                }
                let Some(listing) = &listing else { continue };
                let name = entry.external_name();
                let Some(info) = listing.iter().find(|s| s.name == name) else {
                    if let Link::Control(client) = &entry.link {
                        teardown.push(Arc::clone(client));
                    }
                    report.vanished.push(id);
                    continue;
                };

                let dead = match &entry.link {
                    Link::Control(client) if !client.is_alive() => Some(Arc::clone(client)),
                    _ => None,
                };
                if let Some(client) = dead {
                    teardown.push(client);
                    entry.state = entry
                        .state
                        .transition(LifecycleState::Detached, BackendKind::Multiplexed)?;
                    entry.link = Link::None;
                    report.dropped.push(id);
                }
                entry.session.attachment = match (&entry.link, info.attached) {
                    (Link::Control(_), _) | (_, true) => AttachmentState::Attached,
                    _ => AttachmentState::Detached,
                };
            }

            if let Some(listing) = &listing {
                let known: Vec<String> = sessions.values().map(Entry::external_name).collect();
                report.orphaned = listing
                    .iter()
                    .filter(|s| !s.attached && !known.contains(&s.name))
                    .cloned()
                    .collect();
            }
        }

        for client in teardown {
            client.disconnect();
        }
        for id in report.vanished.iter().chain(&report.exited) {
            self.retire(*id);
        }
        if report != ReconcileReport::default() {
            tracing::info!(
                vanished = report.vanished.len(),
                exited = report.exited.len(),
                dropped = report.dropped.len(),
                orphaned = report.orphaned.len(),
                "reconciled sessions"
            );
        }
        Ok(report)
    }

    // ─── Per-session access ───────────────────────────────────────

    /// Send keystrokes to a direct shell.
    pub async fn write(&self, id: Uuid, bytes: &[u8]) -> Result<(), RuntimeError> {
        let supervisor = match self.lookup(id)? {
            (BackendKind::Multiplexed, ..) => return Err(RuntimeError::NotDirect(id)),
            (_, _, Link::Direct(supervisor), _) => supervisor,
            _ => return Err(RuntimeError::NotAttached(id)),
        };
        supervisor.write(bytes).await?;
        Ok(())
    }

    /// The control client of an attached multiplexed session, for window and
    /// pane commands.
    pub fn control(&self, id: Uuid) -> Result<Arc<ControlClient>, RuntimeError> {
        match self.lookup(id)? {
            (BackendKind::Direct, ..) => Err(RuntimeError::NotMultiplexed(id)),
            (_, _, Link::Control(client), _) => Ok(client),
            _ => Err(RuntimeError::NotAttached(id)),
        }
    }

    /// Apply a metadata edit in memory and, for multiplexed sessions, in tmux.
    pub async fn update_metadata(
        &self,
        id: Uuid,
        update: MetadataUpdate,
    ) -> Result<SyncReport, RuntimeError> {
        let (backend, name) = {
            let mut sessions = self.lock();
            let entry = sessions.get_mut(&id).ok_or(RuntimeError::UnknownSession(id))?;
            let metadata = entry.metadata.get_or_insert_with(|| SessionMetadata::new(id));
            update.apply_to(metadata);
            if let Some(title) = &update.title {
                entry.session.name = title.clone();
            }
            (entry.session.backend, entry.external_name())
        };
        if backend == BackendKind::Direct || update.is_empty() {
            return Ok(SyncReport::default());
        }
        self.blocking(move |r| Ok(MetadataSync::new(TmuxEnvironmentStore::new(r)).update(&name, &update)))
            .await
    }

    pub fn session(&self, id: Uuid) -> Option<SessionSnapshot> {
        self.lock().get(&id).map(Entry::snapshot)
    }

    /// Every known session, oldest first.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self.lock().values().map(Entry::snapshot).collect();
        all.sort_by_key(|s| s.session.created_at);
        all
    }
}
