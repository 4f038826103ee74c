// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `liverun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "liverun",
    version,
    about = "Compile submitted programs and stream their interactive I/O to clients.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// If omitted, `liverun.toml` in the current working directory is used
    /// when present, otherwise built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on (overrides `[server].host`).
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on (overrides `[server].port`).
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Directory for per-session scratch files (overrides `[workspace].root`).
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LIVERUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load + validate the config, print the effective settings and exit.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
