// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running compilers and user
//! programs, using `tokio::process::Command`.
//!
//! - [`supervisor`] spawns one child, streams its stdout/stderr as byte
//!   chunks, feeds its stdin and terminates it (SIGTERM, then SIGKILL).
//! - [`compile`] runs a toolchain's compile step and collects diagnostics.
//! - [`run`] starts the compiled program and exposes its live I/O.

pub mod compile;
pub mod run;
pub mod supervisor;

pub use compile::{CompileOutcome, CompileResult, CompileStage};
pub use run::{RunEvent, RunHandle, RunStage};
pub use supervisor::{CommandSpec, ProcessEvent, ProcessHandle, ProcessSupervisor};
