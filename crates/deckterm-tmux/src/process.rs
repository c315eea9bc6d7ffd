//! Child process supervision.
//!
//! A [`ProcessSupervisor`] owns one child: either `tmux -C attach-session` or,
//! for the direct backend, the user's shell. Output is pumped continuously
//! into a [`ByteSink`] by a reader task until the child closes the pipe or the
//! supervisor is terminated.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::TmuxError;

const READ_BUF_SIZE: usize = 8 * 1024;

/// Receiver of a child's output stream.
///
/// Called from the reader task; implementations must return quickly and
/// must not block on I/O.
pub trait ByteSink: Send + 'static {
    fn on_bytes(&mut self, bytes: &[u8]);

    /// The stream closed. Not called when the reader was aborted by
    /// `terminate()`.
    fn on_eof(&mut self) {}
}

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug)]
pub struct ProcessSupervisor {
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    exit: watch::Receiver<Option<ExitStatus>>,
    terminated: AtomicBool,
}

impl ProcessSupervisor {
    /// Spawn the child and start pumping stdout into `stdout_sink`. Stderr
    /// goes to `stderr_sink` if given, else it is discarded.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(
        spec: &LaunchSpec,
        stdout_sink: Box<dyn ByteSink>,
        stderr_sink: Option<Box<dyn ByteSink>>,
    ) -> Result<Self, TmuxError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if stderr_sink.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        tracing::debug!(program = %spec.program.display(), args = ?spec.args, ?pid, "spawned child");

        let stdin = child.stdin.take();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, stdout_sink));
        }
        if let (Some(stderr), Some(sink)) = (child.stderr.take(), stderr_sink) {
            readers.push(spawn_reader(stderr, sink));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    tracing::debug!(?pid, %status, "child exited");
                    exit_tx.send_replace(Some(status));
                }
                Err(e) => tracing::warn!(?pid, error = %e, "failed to wait for child"),
            }
        });

        Ok(Self {
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
            readers: Mutex::new(readers),
            exit: exit_rx,
            terminated: AtomicBool::new(false),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write raw bytes to the child's stdin and flush.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), TmuxError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TmuxError::NotRunning)?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the child to exit.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<ExitStatus> {
        let mut exit = self.exit.clone();
        match tokio::time::timeout(timeout, exit.wait_for(Option::is_some)).await {
            Ok(Ok(status)) => *status,
            _ => *self.exit.borrow(),
        }
    }

    /// Stop reading, close stdin, then SIGTERM the child if it is still
    /// running. Idempotent.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let readers = std::mem::take(&mut *self.readers.lock().unwrap_or_else(|p| p.into_inner()));
        for reader in readers {
            reader.abort();
        }
        // A writer holding the lock keeps stdin alive until the supervisor
        // drops; the signal below ends the child either way.
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }
        if let Some(pid) = self.pid {
            if !self.has_exited() {
                send_sigterm(pid);
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_reader<R>(mut reader: R, mut sink: Box<dyn ByteSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => sink.on_bytes(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "child pipe read failed");
                    break;
                }
            }
        }
        sink.on_eof();
    })
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(pid, error = %std::io::Error::last_os_error(), "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32) {
    tracing::debug!(pid, "SIGTERM unsupported on this platform");
}
