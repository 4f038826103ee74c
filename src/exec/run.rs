// src/exec/run.rs

//! Running a compiled program with live I/O.

use std::path::Path;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::Toolchain;
use crate::errors::{LiverunError, Result};
use crate::exec::supervisor::{ProcessEvent, ProcessHandle, ProcessSupervisor};
use crate::types::{Channel, ExitOutcome};

/// What a running program produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Output { channel: Channel, data: Vec<u8> },
    /// Last event of the run, delivered exactly once.
    Finished(ExitOutcome),
}

/// Starts compiled artifacts of one toolchain.
#[derive(Debug, Clone)]
pub struct RunStage {
    supervisor: ProcessSupervisor,
    toolchain: Toolchain,
}

impl RunStage {
    pub fn new(supervisor: ProcessSupervisor, toolchain: Toolchain) -> Self {
        Self {
            supervisor,
            toolchain,
        }
    }

    /// Launch the program built from `source` at `binary`.
    pub fn start(
        &self,
        source: &Path,
        binary: &Path,
        working_dir: &Path,
        run_id: u64,
    ) -> Result<RunHandle> {
        let spec = self.toolchain.run_command(source, binary);
        let process = self.supervisor.spawn(&spec, working_dir)?;
        info!(run_id, pid = ?process.pid(), "program started");

        Ok(RunHandle { run_id, process })
    }
}

/// A live program.
///
/// The output stream is live only: events produced before a caller starts
/// reading are buffered, but nothing is replayed once consumed.
#[derive(Debug)]
pub struct RunHandle {
    run_id: u64,
    process: ProcessHandle,
}

impl RunHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Forward client input to the program's stdin.
    pub fn write_input(&mut self, data: &[u8]) -> Result<()> {
        self.process.write(data)
    }

    /// Next output chunk, then `Finished`, then `None` forever.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        match self.process.next_event().await? {
            ProcessEvent::Output { channel, data } => Some(RunEvent::Output { channel, data }),
            ProcessEvent::Exited(exit) => Some(RunEvent::Finished(exit)),
        }
    }

    /// Request termination; idempotent.
    pub fn kill(&mut self) {
        if !self.process.kill() {
            debug!(run_id = self.run_id, "kill ignored; program already stopping or exited");
        }
    }

    /// Kill the program and wait for it to be gone, discarding its output.
    ///
    /// Fails with `TerminationTimeout` if the exit isn't observed within
    /// `bound`; the process handle is dropped either way, which re-issues
    /// the kill.
    pub async fn shutdown(mut self, bound: Duration) -> Result<ExitOutcome> {
        self.kill();

        let run_id = self.run_id;
        let pid = self.process.pid().unwrap_or_default();

        let drain = async {
            while let Some(event) = self.next_event().await {
                if let RunEvent::Finished(exit) = event {
                    return exit;
                }
            }
            ExitOutcome::Unknown
        };

        match timeout(bound, drain).await {
            Ok(exit) => {
                debug!(run_id, %exit, "program shut down");
                Ok(exit)
            }
            Err(_) => Err(LiverunError::TerminationTimeout {
                pid,
                timeout: bound,
            }),
        }
    }
}
