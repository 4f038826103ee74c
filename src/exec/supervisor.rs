// src/exec/supervisor.rs

//! Spawning, streaming and killing a single child process.
//!
//! Every spawned process gets:
//! - one reader task per output pipe, forwarding raw chunks as
//!   [`ProcessEvent::Output`],
//! - one writer task owning its stdin,
//! - one supervisor task owning the `Child`, which waits for exit (or a kill
//!   request), waits for both readers to hit end-of-stream and only then
//!   emits [`ProcessEvent::Exited`]. Background descendants still holding
//!   the pipes after the grace period are killed with the process group.
//!
//! All events travel over a single channel, so no output chunk can ever be
//! observed after the exit notification.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::errors::{LiverunError, Result};
use crate::types::{Channel, ExitOutcome};

const READ_CHUNK_SIZE: usize = 4096;
const EVENT_BUFFER: usize = 64;
const INPUT_BUFFER: usize = 64;

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Something that happened to a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output { channel: Channel, data: Vec<u8> },
    /// Always the last event; sent exactly once.
    Exited(ExitOutcome),
}

/// Spawns child processes with a shared termination policy.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    kill_grace: Duration,
}

impl ProcessSupervisor {
    /// `kill_grace` is how long a process gets between SIGTERM and SIGKILL.
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Spawn `spec` in `working_dir` with all three stdio streams piped.
    ///
    /// Fails with `SpawnError` if the executable is missing or not runnable;
    /// no handle is returned in that case.
    pub fn spawn(&self, spec: &CommandSpec, working_dir: &Path) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so termination reaches grandchildren too.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| LiverunError::SpawnError {
            program: spec.program.clone(),
            source,
        })?;

        let pid = child.id();
        info!(?pid, cmd = %spec, "spawned process");

        let (event_tx, event_rx) = mpsc::channel::<ProcessEvent>(EVENT_BUFFER);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Channel::Stdout, event_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Channel::Stderr, event_tx.clone()));
        }

        let input_tx = child.stdin.take().map(|stdin| spawn_writer(stdin, pid));

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(supervise(
            child,
            pid,
            kill_rx,
            readers,
            event_tx,
            self.kill_grace,
        ));

        Ok(ProcessHandle {
            pid,
            input_tx,
            events: event_rx,
            kill_tx: Some(kill_tx),
            exited: false,
        })
    }
}

/// Handle to one supervised child process.
///
/// Owned by exactly one stage. Dropping the handle terminates the process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    input_tx: Option<mpsc::Sender<Vec<u8>>>,
    events: mpsc::Receiver<ProcessEvent>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: bool,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the exit event has already been observed.
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// Queue `data` for the process's stdin.
    ///
    /// Never blocks. Fails with `WriteError` when the process has exited,
    /// its input was closed, or the input queue is full.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.exited {
            return Err(LiverunError::WriteError("process has exited".to_string()));
        }

        let tx = self
            .input_tx
            .as_ref()
            .ok_or_else(|| LiverunError::WriteError("process input is closed".to_string()))?;

        tx.try_send(data.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                LiverunError::WriteError("process input queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                LiverunError::WriteError("process input is closed".to_string())
            }
        })
    }

    /// Close stdin; the process sees end-of-file once queued input is written.
    pub fn close_input(&mut self) {
        self.input_tx = None;
    }

    /// Next output chunk or the final exit event.
    ///
    /// Returns `None` once the exit event has been delivered.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        if self.exited {
            return None;
        }

        match self.events.recv().await {
            Some(ProcessEvent::Exited(outcome)) => {
                self.exited = true;
                self.input_tx = None;
                Some(ProcessEvent::Exited(outcome))
            }
            Some(event) => Some(event),
            None => {
                // Supervisor task vanished without reporting.
                self.exited = true;
                self.input_tx = None;
                Some(ProcessEvent::Exited(ExitOutcome::Unknown))
            }
        }
    }

    /// Request termination (SIGTERM, then SIGKILL after the grace period).
    ///
    /// Idempotent: returns `false` if a kill was already requested or the
    /// process has already exited.
    pub fn kill(&mut self) -> bool {
        if self.exited {
            return false;
        }

        match self.kill_tx.take() {
            Some(tx) => {
                debug!(pid = ?self.pid, "kill requested");
                // The supervisor may have finished in the meantime; that's fine.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Discard remaining output and resolve to the exit outcome.
    pub async fn wait(mut self) -> ExitOutcome {
        while let Some(event) = self.next_event().await {
            if let ProcessEvent::Exited(outcome) = event {
                return outcome;
            }
        }
        ExitOutcome::Unknown
    }
}

fn spawn_reader<R>(
    mut stream: R,
    channel: Channel,
    event_tx: mpsc::Sender<ProcessEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let event = ProcessEvent::Output {
                        channel,
                        data: buf[..n].to_vec(),
                    };
                    if event_tx.send(event).await.is_err() {
                        // Handle dropped; nobody is listening any more.
                        break;
                    }
                }
                Err(e) => {
                    debug!(%channel, error = %e, "output pipe read failed");
                    break;
                }
            }
        }
        debug!(%channel, "output stream reached end-of-stream");
    })
}

fn spawn_writer(mut stdin: ChildStdin, pid: Option<u32>) -> mpsc::Sender<Vec<u8>> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(INPUT_BUFFER);

    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = write_chunk(&mut stdin, &data).await {
                warn!(?pid, error = %e, "writing to process input failed; closing input");
                break;
            }
        }
        // Dropping stdin delivers EOF to the child.
    });

    tx
}

async fn write_chunk(stdin: &mut ChildStdin, data: &[u8]) -> std::io::Result<()> {
    stdin.write_all(data).await?;
    stdin.flush().await
}

/// Own the child until it exits, then report exactly once.
async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    event_tx: mpsc::Sender<ProcessEvent>,
    kill_grace: Duration,
) {
    let mut killed = false;

    // Either the process exits on its own, or we are asked to stop it. A
    // dropped handle counts as a kill request.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            killed = true;
            terminate(&mut child, pid, kill_grace).await
        }
    };

    let outcome = match status {
        Ok(status) => ExitOutcome::from_status(status),
        Err(e) => {
            warn!(?pid, error = %e, "waiting for process failed");
            ExitOutcome::Unknown
        }
    };

    drain_readers(readers, pid, &mut kill_rx, killed, kill_grace).await;

    info!(?pid, %outcome, killed, "process exited");
    let _ = event_tx.send(ProcessEvent::Exited(outcome)).await;
}

/// Wait for both pipes to reach end-of-stream before the exit is announced.
///
/// Background descendants can keep the pipes open after the child is gone.
/// If the pipes are still open `grace` after the exit, or a kill arrives
/// meanwhile, the whole process group is killed. Once a kill was requested
/// the remaining wait is bounded by `grace` and unread output is dropped.
async fn drain_readers(
    mut readers: Vec<JoinHandle<()>>,
    pid: Option<u32>,
    kill_rx: &mut oneshot::Receiver<()>,
    mut kill_requested: bool,
    grace: Duration,
) {
    {
        let all_done = join_readers(&mut readers);
        tokio::pin!(all_done);

        let deadline = sleep(grace);
        tokio::pin!(deadline);

        tokio::select! {
            _ = &mut all_done => return,
            _ = &mut deadline => {}
            _ = &mut *kill_rx, if !kill_requested => kill_requested = true,
        }

        if let Some(pid) = pid {
            warn!(pid, "output pipes still open after exit; killing process group");
            signal_group(pid, Signal::Kill);
        }

        // Output may still be queued for a slow reader of the events.
        if !kill_requested {
            tokio::select! {
                _ = &mut all_done => return,
                _ = &mut *kill_rx => {}
            }
        }

        if timeout(grace, &mut all_done).await.is_ok() {
            return;
        }
    }

    warn!(?pid, "output reader still busy after kill; dropping remaining output");
    for reader in &readers {
        reader.abort();
    }
}

async fn join_readers(readers: &mut [JoinHandle<()>]) {
    for reader in readers.iter_mut() {
        let _ = reader.await;
    }
}

/// SIGTERM the process group, wait `grace`, then SIGKILL.
async fn terminate(
    child: &mut Child,
    pid: Option<u32>,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    let Some(pid) = pid else {
        // Already reaped.
        return child.wait().await;
    };

    if !signal_group(pid, Signal::Term) {
        let _ = child.start_kill();
    }

    match timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            let err = LiverunError::TerminationTimeout {
                pid,
                timeout: grace,
            };
            warn!(pid, error = %err, "escalating to SIGKILL");
            if !signal_group(pid, Signal::Kill) {
                let _ = child.start_kill();
            }
            child.wait().await
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// Signal every process in the group led by `pid`.
///
/// Returns `false` if the group could not be signalled.
#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) -> bool {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };

    // Negative pid addresses the whole process group (pgid == pid because of
    // `process_group(0)` at spawn).
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), sig) };
    if rc == -1 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, ?signal, error = %errno, "signalling process group failed");
        }
        return false;
    }
    true
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) -> bool {
    false
}
