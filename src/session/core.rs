// src/session/core.rs

//! Pure session state machine.
//!
//! [`SessionCore`] consumes [`SessionEvent`]s and produces:
//! - an updated [`SessionState`]
//! - a list of [`SessionCommand`]s describing what the IO shell should do
//!
//! The async shell (`session::controller::SessionController`) owns the
//! processes, the workspace and the client channel and executes the
//! commands. The core has no channels, no Tokio types and performs no IO.
//!
//! Reachable cycles:
//! - `Idle → Compiling → Running → Idle`
//! - `Idle → Compiling → Idle` (compile failure)
//! - any state `→ Terminating` on disconnect, which ends the session.

use std::collections::BTreeSet;

use tracing::debug;

use crate::errors::{LiverunError, Result};
use crate::exec::{CompileOutcome, CompileResult};
use crate::session::{OutputEvent, ServerEvent, SessionEvent, SessionState};
use crate::types::{BusyPolicy, Channel, ExitOutcome};

/// Command produced by the core, to be executed by the IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Send this event to the client.
    Emit(ServerEvent),
    /// Write the source and start the compiler.
    StartCompile {
        run_id: u64,
        language: String,
        code: String,
    },
    /// Start the freshly compiled program.
    StartRun { run_id: u64, language: String },
    /// Forward input to the running program.
    WriteInput(Vec<u8>),
    /// Kill whatever compile/run is active and wait (bounded) for it.
    StopActive,
    /// Delete the compiled artifact only.
    CleanupBinary,
    /// Delete source and artifact.
    Cleanup,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStep {
    pub commands: Vec<SessionCommand>,
    /// Whether the session loop should keep running.
    pub keep_running: bool,
}

impl SessionStep {
    fn next(commands: Vec<SessionCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    fn stop(commands: Vec<SessionCommand>) -> Self {
        Self {
            commands,
            keep_running: false,
        }
    }
}

#[derive(Debug)]
pub struct SessionCore {
    state: SessionState,
    policy: BusyPolicy,
    default_language: String,
    languages: BTreeSet<String>,
    run_id: u64,
    seq: u64,
    language: Option<String>,
}

impl SessionCore {
    pub fn new(
        policy: BusyPolicy,
        default_language: impl Into<String>,
        languages: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            policy,
            default_language: default_language.into(),
            languages: languages.into_iter().collect(),
            run_id: 0,
            seq: 0,
            language: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the current (or most recent) run; 0 before the first submit.
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Handle one event.
    ///
    /// Only submissions can fail (`SessionBusy`, `UnsupportedLanguage`); a
    /// failed submission leaves the state untouched.
    pub fn step(&mut self, event: SessionEvent) -> Result<SessionStep> {
        let step = match event {
            SessionEvent::Submit { code, language } => return self.on_submit(code, language),
            SessionEvent::Input(data) => self.on_input(data),
            SessionEvent::CompileFinished(result) => self.on_compile_finished(result),
            SessionEvent::PipelineFailed { message } => self.on_pipeline_failed(message),
            SessionEvent::RunOutput { channel, data } => self.on_run_output(channel, data),
            SessionEvent::RunFinished(exit) => self.on_run_finished(exit),
            SessionEvent::Disconnect => self.on_disconnect(),
        };
        Ok(step)
    }

    fn on_submit(&mut self, code: String, language: Option<String>) -> Result<SessionStep> {
        match (self.state, self.policy) {
            (SessionState::Terminating, _) => {
                return Err(LiverunError::SessionBusy(self.state));
            }
            (SessionState::Compiling | SessionState::Running, BusyPolicy::Reject) => {
                return Err(LiverunError::SessionBusy(self.state));
            }
            _ => {}
        }

        let language = language.unwrap_or_else(|| self.default_language.clone());
        if !self.languages.contains(&language) {
            return Err(LiverunError::UnsupportedLanguage(language));
        }

        let mut commands = Vec::new();

        if self.state != SessionState::Idle {
            debug!(run_id = self.run_id, state = %self.state, "restarting: stopping active pipeline");
            commands.push(SessionCommand::StopActive);
            commands.push(SessionCommand::CleanupBinary);
            commands.push(SessionCommand::Emit(ServerEvent::System(
                "Previous run cancelled".to_string(),
            )));
        }

        self.run_id += 1;
        self.seq = 0;
        self.state = SessionState::Compiling;
        self.language = Some(language.clone());

        commands.push(SessionCommand::Emit(ServerEvent::System(
            "Compiling...".to_string(),
        )));
        commands.push(SessionCommand::StartCompile {
            run_id: self.run_id,
            language,
            code,
        });

        Ok(SessionStep::next(commands))
    }

    fn on_input(&mut self, data: Vec<u8>) -> SessionStep {
        if self.state != SessionState::Running {
            debug!(state = %self.state, bytes = data.len(), "input outside of a run; ignoring");
            return SessionStep::next(Vec::new());
        }
        SessionStep::next(vec![SessionCommand::WriteInput(data)])
    }

    fn on_compile_finished(&mut self, result: CompileResult) -> SessionStep {
        if self.state != SessionState::Compiling {
            debug!(state = %self.state, "stale compile result; ignoring");
            return SessionStep::next(Vec::new());
        }

        let success = result.success();
        let mut commands = Vec::new();

        if !result.diagnostics.is_empty() {
            match result.outcome {
                // Environment problems are not compiler output.
                CompileOutcome::Unavailable | CompileOutcome::TimedOut(_) => {
                    let text = String::from_utf8_lossy(&result.diagnostics);
                    commands.push(SessionCommand::Emit(ServerEvent::System(
                        text.trim_end().to_string(),
                    )));
                }
                _ => commands.push(self.output(Channel::Stderr, result.diagnostics)),
            }
        }

        if success {
            self.state = SessionState::Running;
            commands.push(SessionCommand::Emit(ServerEvent::System(
                "Execution Started".to_string(),
            )));
            commands.push(SessionCommand::StartRun {
                run_id: self.run_id,
                language: self.language.clone().unwrap_or_else(|| self.default_language.clone()),
            });
        } else {
            self.state = SessionState::Idle;
            commands.push(SessionCommand::Emit(ServerEvent::System(
                "Compilation Failed".to_string(),
            )));
            commands.push(SessionCommand::CleanupBinary);
        }

        SessionStep::next(commands)
    }

    fn on_pipeline_failed(&mut self, message: String) -> SessionStep {
        match self.state {
            SessionState::Compiling | SessionState::Running => {
                self.state = SessionState::Idle;
                SessionStep::next(vec![
                    SessionCommand::Emit(ServerEvent::System(message)),
                    SessionCommand::Cleanup,
                ])
            }
            _ => {
                debug!(state = %self.state, %message, "pipeline failure outside of a run; ignoring");
                SessionStep::next(Vec::new())
            }
        }
    }

    fn on_run_output(&mut self, channel: Channel, data: Vec<u8>) -> SessionStep {
        if self.state != SessionState::Running {
            return SessionStep::next(Vec::new());
        }
        let command = self.output(channel, data);
        SessionStep::next(vec![command])
    }

    fn on_run_finished(&mut self, exit: ExitOutcome) -> SessionStep {
        if self.state != SessionState::Running {
            debug!(state = %self.state, %exit, "stale run exit; ignoring");
            return SessionStep::next(Vec::new());
        }

        self.state = SessionState::Idle;
        SessionStep::next(vec![
            SessionCommand::Emit(ServerEvent::System(format!("Process finished ({exit})"))),
            SessionCommand::Emit(ServerEvent::Finished {
                run_id: self.run_id,
                exit,
            }),
            SessionCommand::Cleanup,
        ])
    }

    fn on_disconnect(&mut self) -> SessionStep {
        if self.state == SessionState::Terminating {
            return SessionStep::stop(Vec::new());
        }

        self.state = SessionState::Terminating;
        SessionStep::stop(vec![SessionCommand::StopActive, SessionCommand::Cleanup])
    }

    fn output(&mut self, channel: Channel, data: Vec<u8>) -> SessionCommand {
        let event = OutputEvent {
            run_id: self.run_id,
            seq: self.seq,
            channel,
            data,
        };
        self.seq += 1;
        SessionCommand::Emit(ServerEvent::Output(event))
    }
}
