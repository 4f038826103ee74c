// src/exec/compile.rs

//! Compiler invocation.

use std::path::Path;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Toolchain;
use crate::exec::supervisor::{ProcessEvent, ProcessSupervisor};
use crate::types::ExitOutcome;

/// Why a compile attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Succeeded,
    /// The compiler ran and rejected the source.
    Failed(ExitOutcome),
    /// The compiler was killed after exceeding the compile timeout.
    TimedOut(Duration),
    /// The compiler could not be started (environment fault, not a source
    /// error).
    Unavailable,
    /// Cancelled by the session (disconnect or restart).
    Cancelled,
}

/// Result of one compiler invocation.
///
/// `diagnostics` holds everything the compiler printed, in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    pub outcome: CompileOutcome,
    pub diagnostics: Vec<u8>,
}

impl CompileResult {
    /// True iff the compiler exited with code zero.
    pub fn success(&self) -> bool {
        self.outcome == CompileOutcome::Succeeded
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            outcome: CompileOutcome::Unavailable,
            diagnostics: message.into().into_bytes(),
        }
    }
}

/// Runs a toolchain's compile step through the supervisor.
#[derive(Debug, Clone)]
pub struct CompileStage {
    supervisor: ProcessSupervisor,
    toolchain: Toolchain,
    timeout: Duration,
}

impl CompileStage {
    pub fn new(supervisor: ProcessSupervisor, toolchain: Toolchain, timeout: Duration) -> Self {
        Self {
            supervisor,
            toolchain,
            timeout,
        }
    }

    /// Compile `source` into `binary`.
    ///
    /// Firing (or dropping the sender of) `cancel` kills the compiler; the
    /// call still returns only after the compiler process is gone.
    pub async fn compile(
        &self,
        source: &Path,
        binary: &Path,
        working_dir: &Path,
        mut cancel: oneshot::Receiver<()>,
    ) -> CompileResult {
        let spec = self.toolchain.compile_command(source, binary);
        info!(language = %self.toolchain.name, cmd = %spec, "compiling");

        let mut handle = match self.supervisor.spawn(&spec, working_dir) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(language = %self.toolchain.name, error = %e, "compiler unavailable");
                return CompileResult::unavailable(format!("Compiler unavailable: {e}"));
            }
        };

        // Compilers never read stdin.
        handle.close_input();

        let deadline = sleep(self.timeout);
        tokio::pin!(deadline);

        let mut diagnostics = Vec::new();
        let mut timed_out = false;
        let mut cancelled = false;

        let exit = loop {
            tokio::select! {
                event = handle.next_event() => match event {
                    Some(ProcessEvent::Output { data, .. }) => diagnostics.extend_from_slice(&data),
                    Some(ProcessEvent::Exited(exit)) => break exit,
                    None => break ExitOutcome::Unknown,
                },
                _ = &mut deadline, if !timed_out && !cancelled => {
                    warn!(language = %self.toolchain.name, timeout = ?self.timeout, "compile timed out; killing compiler");
                    timed_out = true;
                    handle.kill();
                }
                _ = &mut cancel, if !timed_out && !cancelled => {
                    debug!(language = %self.toolchain.name, "compile cancelled; killing compiler");
                    cancelled = true;
                    handle.kill();
                }
            }
        };

        let outcome = if cancelled {
            CompileOutcome::Cancelled
        } else if timed_out {
            diagnostics.extend_from_slice(
                format!("compilation timed out after {:?}\n", self.timeout).as_bytes(),
            );
            CompileOutcome::TimedOut(self.timeout)
        } else if exit.success() {
            CompileOutcome::Succeeded
        } else {
            CompileOutcome::Failed(exit)
        };

        info!(language = %self.toolchain.name, ?outcome, %exit, "compiler finished");

        CompileResult {
            outcome,
            diagnostics,
        }
    }
}
