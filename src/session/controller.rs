// src/session/controller.rs

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::errors::{LiverunError, Result};
use crate::exec::{CompileResult, CompileStage, ProcessSupervisor, RunEvent, RunHandle, RunStage};
use crate::session::core::{SessionCommand, SessionCore};
use crate::session::{ClientEvent, ServerEvent, SessionEvent, SessionId, SessionSettings};
use crate::types::ExitOutcome;
use crate::workspace::Workspace;

const CLIENT_BUFFER: usize = 64;
const OUTPUT_BUFFER: usize = 256;

/// A compile running in its own task.
struct CompileJob {
    run_id: u64,
    cancel: Option<oneshot::Sender<()>>,
    join: JoinHandle<CompileResult>,
}

/// Drives one session in response to client requests and process events,
/// delegating every decision to [`SessionCore`].
///
/// This is a pure IO shell: it reads events, feeds them to the core and
/// executes the returned commands against the workspace, the stages and the
/// client channel.
pub struct SessionController {
    id: SessionId,
    core: SessionCore,
    settings: Arc<SessionSettings>,
    supervisor: ProcessSupervisor,
    client_rx: mpsc::Receiver<ClientEvent>,
    out_tx: mpsc::Sender<ServerEvent>,
    shutdown: watch::Receiver<bool>,
    shutdown_open: bool,
    client_gone: bool,
    workspace: Option<Workspace>,
    compile: Option<CompileJob>,
    run: Option<RunHandle>,
    /// Events produced by the shell itself, handled before new input.
    pending: VecDeque<SessionEvent>,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("id", &self.id)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Start a session in its own task.
    ///
    /// Setting `shutdown` to `true` terminates the session exactly like a
    /// client disconnect. Dropping its sender has no effect.
    pub fn spawn(settings: Arc<SessionSettings>, shutdown: watch::Receiver<bool>) -> SessionHandle {
        let id = SessionId::new();
        let (client_tx, client_rx) = mpsc::channel::<ClientEvent>(CLIENT_BUFFER);
        let (out_tx, out_rx) = mpsc::channel::<ServerEvent>(OUTPUT_BUFFER);

        let core = SessionCore::new(
            settings.busy_policy,
            settings.default_language.clone(),
            settings.toolchains.keys().cloned(),
        );

        let controller = Self {
            id,
            core,
            supervisor: ProcessSupervisor::new(settings.kill_grace),
            settings,
            client_rx,
            out_tx,
            shutdown,
            shutdown_open: true,
            client_gone: false,
            workspace: None,
            compile: None,
            run: None,
            pending: VecDeque::new(),
        };

        let join = tokio::spawn(controller.run());

        SessionHandle {
            id,
            client_tx,
            out_rx,
            join,
        }
    }

    /// Main event loop.
    ///
    /// - Waits for the next client request, compile result or program event.
    /// - Feeds it into the core.
    /// - Executes the commands returned by the core.
    async fn run(mut self) {
        info!(session = %self.id, "session started");

        loop {
            let event = self.next_event().await;
            debug!(session = %self.id, ?event, "session received event");

            let step = match self.core.step(event) {
                Ok(step) => step,
                Err(err) => {
                    info!(session = %self.id, error = %err, "request rejected");
                    self.emit(ServerEvent::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    })
                    .await;
                    continue;
                }
            };

            for command in step.commands {
                self.execute(command).await;
            }

            if !step.keep_running {
                break;
            }
        }

        if let Some(workspace) = self.workspace.take() {
            if let Err(e) = workspace.destroy() {
                warn!(session = %self.id, error = %e, "failed to remove workspace");
            }
        }

        info!(session = %self.id, "session ended");
    }

    async fn next_event(&mut self) -> SessionEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            if self.client_gone {
                return SessionEvent::Disconnect;
            }

            tokio::select! {
                changed = self.shutdown.changed(), if self.shutdown_open => {
                    match changed {
                        Ok(()) if *self.shutdown.borrow() => {
                            info!(session = %self.id, "server shutting down; terminating session");
                            return SessionEvent::Disconnect;
                        }
                        Ok(()) => {}
                        Err(_) => self.shutdown_open = false,
                    }
                }
                event = self.client_rx.recv() => {
                    return match event {
                        Some(event) => event.into(),
                        None => {
                            info!(session = %self.id, "client disconnected");
                            SessionEvent::Disconnect
                        }
                    };
                }
                result = wait_compile(&mut self.compile) => {
                    self.compile = None;
                    return SessionEvent::CompileFinished(result);
                }
                event = next_run_event(&mut self.run) => {
                    return match event {
                        Some(RunEvent::Output { channel, data }) => {
                            SessionEvent::RunOutput { channel, data }
                        }
                        Some(RunEvent::Finished(exit)) => {
                            self.run = None;
                            SessionEvent::RunFinished(exit)
                        }
                        None => {
                            self.run = None;
                            SessionEvent::RunFinished(ExitOutcome::Unknown)
                        }
                    };
                }
            }
        }
    }

    /// Execute a single command from the core.
    async fn execute(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Emit(event) => self.emit(event).await,
            SessionCommand::StartCompile {
                run_id,
                language,
                code,
            } => self.start_compile(run_id, &language, code),
            SessionCommand::StartRun { run_id, language } => self.start_run(run_id, &language),
            SessionCommand::WriteInput(data) => self.write_input(&data).await,
            SessionCommand::StopActive => self.stop_active().await,
            SessionCommand::CleanupBinary => {
                if let Some(workspace) = &self.workspace {
                    if let Err(e) = workspace.cleanup_binary() {
                        warn!(session = %self.id, error = %e, "failed to remove binary");
                    }
                }
            }
            SessionCommand::Cleanup => {
                if let Some(workspace) = &mut self.workspace {
                    if let Err(e) = workspace.cleanup() {
                        warn!(session = %self.id, error = %e, "workspace cleanup failed");
                    }
                }
            }
        }
    }

    async fn emit(&mut self, event: ServerEvent) {
        if self.client_gone {
            return;
        }
        if self.out_tx.send(event).await.is_err() {
            debug!(session = %self.id, "client output channel closed");
            self.client_gone = true;
        }
    }

    fn fail(&mut self, message: String) {
        self.pending
            .push_back(SessionEvent::PipelineFailed { message });
    }

    fn start_compile(&mut self, run_id: u64, language: &str, code: String) {
        let Some(toolchain) = self.settings.toolchain(language).cloned() else {
            self.fail(format!("Unsupported language: {language}"));
            return;
        };

        let (source, binary, dir) = match self.prepare_source(&toolchain.source_ext, code.as_bytes())
        {
            Ok(paths) => paths,
            Err(e) => {
                error!(session = %self.id, run_id, error = %e, "failed to write source");
                self.fail(format!("Failed to save source: {e}"));
                return;
            }
        };

        let stage = CompileStage::new(
            self.supervisor.clone(),
            toolchain,
            self.settings.compile_timeout,
        );
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move { stage.compile(&source, &binary, &dir, cancel_rx).await });

        debug!(session = %self.id, run_id, %language, "compile dispatched");
        self.compile = Some(CompileJob {
            run_id,
            cancel: Some(cancel_tx),
            join,
        });
    }

    /// Make sure the workspace exists and write the source into it.
    fn prepare_source(&mut self, ext: &str, code: &[u8]) -> Result<(PathBuf, PathBuf, PathBuf)> {
        if self.workspace.is_none() {
            let workspace = Workspace::prepare(&self.settings.workspace_root, &self.id)?;
            self.workspace = Some(workspace);
        }

        let workspace = self
            .workspace
            .as_mut()
            .ok_or_else(|| LiverunError::Other(anyhow!("workspace missing after prepare")))?;

        let source = workspace.write_source(ext, code)?;
        // Never run a stale artifact from an earlier submission.
        workspace.cleanup_binary()?;

        Ok((
            source,
            workspace.binary_path().to_path_buf(),
            workspace.dir().to_path_buf(),
        ))
    }

    fn start_run(&mut self, run_id: u64, language: &str) {
        let started = match (self.settings.toolchain(language), &self.workspace) {
            (Some(toolchain), Some(workspace)) => match workspace.source_path() {
                Some(source) => RunStage::new(self.supervisor.clone(), toolchain.clone()).start(
                    source,
                    workspace.binary_path(),
                    workspace.dir(),
                    run_id,
                ),
                None => Err(LiverunError::Other(anyhow!("no source file in workspace"))),
            },
            (None, _) => Err(LiverunError::UnsupportedLanguage(language.to_string())),
            (_, None) => Err(LiverunError::Other(anyhow!("workspace is not prepared"))),
        };

        match started {
            Ok(run) => {
                info!(session = %self.id, run_id, pid = ?run.pid(), "run started");
                self.run = Some(run);
            }
            Err(e) => {
                error!(session = %self.id, run_id, error = %e, "failed to start program");
                self.fail(format!("Failed to start program: {e}"));
            }
        }
    }

    async fn write_input(&mut self, data: &[u8]) {
        let result = match self.run.as_mut() {
            Some(run) => run.write_input(data),
            None => Err(LiverunError::WriteError("no program is running".to_string())),
        };

        if let Err(e) = result {
            warn!(session = %self.id, error = %e, "input dropped");
            self.emit(ServerEvent::System(format!("Input not delivered: {e}")))
                .await;
        }
    }

    /// Stop the active compile or run, waiting at most the termination
    /// timeout. Cleanup proceeds afterwards regardless.
    async fn stop_active(&mut self) {
        let bound = self.settings.termination_timeout;

        if let Some(mut job) = self.compile.take() {
            if let Some(cancel) = job.cancel.take() {
                let _ = cancel.send(());
            }
            match timeout(bound, &mut job.join).await {
                Ok(_) => debug!(session = %self.id, run_id = job.run_id, "compile stopped"),
                Err(_) => {
                    error!(
                        session = %self.id,
                        run_id = job.run_id,
                        timeout = ?bound,
                        "compiler did not stop in time; abandoning it"
                    );
                    // Dropping the task's process handle re-issues the kill.
                    job.join.abort();
                }
            }
        }

        if let Some(run) = self.run.take() {
            let run_id = run.run_id();
            match run.shutdown(bound).await {
                Ok(exit) => info!(session = %self.id, run_id, %exit, "run stopped"),
                Err(e) => error!(
                    session = %self.id,
                    run_id,
                    error = %e,
                    "program did not stop in time; proceeding with cleanup"
                ),
            }
        }
    }
}

async fn wait_compile(slot: &mut Option<CompileJob>) -> CompileResult {
    match slot {
        Some(job) => match (&mut job.join).await {
            Ok(result) => result,
            Err(e) => CompileResult::unavailable(format!("Compiler task failed: {e}")),
        },
        None => std::future::pending().await,
    }
}

async fn next_run_event(slot: &mut Option<RunHandle>) -> Option<RunEvent> {
    match slot {
        Some(run) => run.next_event().await,
        None => std::future::pending().await,
    }
}

/// Client-side handle of a running session.
///
/// Dropping the handle (or calling [`SessionHandle::disconnect`]) is the
/// disconnect: the session kills its program and cleans up.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    client_tx: mpsc::Sender<ClientEvent>,
    out_rx: mpsc::Receiver<ServerEvent>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        self.client_tx
            .send(event)
            .await
            .map_err(|_| LiverunError::Other(anyhow!("session {} has ended", self.id)))
    }

    pub async fn submit(&self, code: impl Into<String>, language: Option<&str>) -> Result<()> {
        self.send(ClientEvent::Submit {
            code: code.into(),
            language: language.map(str::to_string),
        })
        .await
    }

    pub async fn input(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(ClientEvent::Input(data.into())).await
    }

    /// Next event for the client; `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.out_rx.recv().await
    }

    /// Disconnect and wait for the session to finish its teardown.
    ///
    /// Returns whatever the session emitted that had not been received yet.
    pub async fn disconnect(self) -> Result<Vec<ServerEvent>> {
        let SessionHandle {
            client_tx,
            mut out_rx,
            join,
            ..
        } = self;
        drop(client_tx);

        let mut rest = Vec::new();
        while let Some(event) = out_rx.recv().await {
            rest.push(event);
        }

        join.await
            .map_err(|e| LiverunError::Other(anyhow!("session task failed: {e}")))?;
        Ok(rest)
    }

    /// Split into the raw channels, for transports.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Sender<ClientEvent>,
        mpsc::Receiver<ServerEvent>,
        JoinHandle<()>,
    ) {
        (self.client_tx, self.out_rx, self.join)
    }
}
