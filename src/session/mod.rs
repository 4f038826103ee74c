// src/session/mod.rs

//! Session-scoped execution pipeline.
//!
//! One session exists per client connection and drives
//! submit → compile → run → stream → cleanup for that client only.
//!
//! The pure state machine lives in [`core`]; the async/IO shell that owns
//! processes, workspace and channels is implemented in [`controller`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::{ConfigFile, Toolchain};
use crate::exec::CompileResult;
use crate::types::{BusyPolicy, Channel, ExitOutcome};

pub mod controller;
pub mod core;

pub use self::controller::{SessionController, SessionHandle};
pub use self::core::{SessionCommand, SessionCore, SessionStep};

/// Unique identifier of a session; also names its workspace directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0.simple())
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Compiling,
    Running,
    Terminating,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Compiling => "compiling",
            SessionState::Running => "running",
            SessionState::Terminating => "terminating",
        };
        f.write_str(s)
    }
}

/// Requests arriving from the client. Disconnect is implicit: the client
/// side of the channel is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Submit {
        code: String,
        /// Toolchain name; `None` selects the default language.
        language: Option<String>,
    },
    Input(Vec<u8>),
}

/// One ordered chunk of program output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub run_id: u64,
    /// Position within the run, starting at 0.
    pub seq: u64,
    pub channel: Channel,
    pub data: Vec<u8>,
}

/// Everything the session sends back to its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Output(OutputEvent),
    System(String),
    /// Last event of a run.
    Finished { run_id: u64, exit: ExitOutcome },
    /// A request was refused; the session state is unchanged.
    Error { kind: String, message: String },
}

/// Events consumed by [`SessionCore`]: client requests plus notifications
/// from the pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Submit {
        code: String,
        language: Option<String>,
    },
    Input(Vec<u8>),
    CompileFinished(CompileResult),
    /// A pipeline step failed before or outside the processes themselves
    /// (workspace IO, program spawn).
    PipelineFailed { message: String },
    RunOutput { channel: Channel, data: Vec<u8> },
    RunFinished(ExitOutcome),
    Disconnect,
}

impl From<ClientEvent> for SessionEvent {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::Submit { code, language } => SessionEvent::Submit { code, language },
            ClientEvent::Input(data) => SessionEvent::Input(data),
        }
    }
}

/// Immutable settings shared by every session of a server.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub workspace_root: PathBuf,
    pub busy_policy: BusyPolicy,
    pub default_language: String,
    pub toolchains: BTreeMap<String, Toolchain>,
    pub compile_timeout: Duration,
    pub kill_grace: Duration,
    pub termination_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(cfg: &ConfigFile) -> Arc<Self> {
        let timeouts = cfg.timeouts();
        Arc::new(Self {
            workspace_root: cfg.workspace.effective_root(),
            busy_policy: cfg.session.busy_policy,
            default_language: cfg.session.default_language.clone(),
            toolchains: cfg.toolchains(),
            compile_timeout: timeouts.compile,
            kill_grace: timeouts.kill_grace,
            termination_timeout: timeouts.termination,
        })
    }

    pub fn toolchain(&self, language: &str) -> Option<&Toolchain> {
        self.toolchains.get(language)
    }
}
