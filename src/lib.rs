// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod server;
pub mod session;
pub mod types;
pub mod workspace;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::load_or_default;
use crate::config::model::ConfigFile;
use crate::server::Server;
use crate::session::SessionSettings;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the TCP server and its sessions
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_or_default(args.config.as_deref())?;
    apply_overrides(&mut cfg, &args);

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let settings = SessionSettings::from_config(&cfg);
    std::fs::create_dir_all(&settings.workspace_root)?;
    info!(
        root = %settings.workspace_root.display(),
        languages = ?settings.toolchains.keys().collect::<Vec<_>>(),
        "workspace root ready"
    );

    let server = Server::bind(&cfg.server.host, cfg.server.port, settings).await?;

    // Ctrl-C → graceful shutdown.
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    server.run(shutdown).await?;
    Ok(())
}

/// CLI flags win over the config file.
fn apply_overrides(cfg: &mut ConfigFile, args: &CliArgs) {
    if let Some(host) = &args.host {
        cfg.server.host = host.clone();
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }
    if let Some(root) = &args.workspace {
        cfg.workspace.root = Some(root.clone());
    }
}

/// Simple dry-run output: print server, session settings and toolchains.
fn print_dry_run(cfg: &ConfigFile) {
    let timeouts = cfg.timeouts();

    println!("liverun dry-run");
    println!("  server = {}:{}", cfg.server.host, cfg.server.port);
    println!(
        "  workspace.root = {}",
        cfg.workspace.effective_root().display()
    );
    println!("  session.busy_policy = {:?}", cfg.session.busy_policy);
    println!(
        "  session.default_language = {}",
        cfg.session.default_language
    );
    println!("  session.compile_timeout = {:?}", timeouts.compile);
    println!("  session.kill_grace = {:?}", timeouts.kill_grace);
    println!(
        "  session.termination_timeout = {:?}",
        timeouts.termination
    );
    println!();

    let binary = Path::new("main.out");
    let toolchains = cfg.toolchains();
    println!("languages ({}):", toolchains.len());
    for (name, toolchain) in toolchains.iter() {
        println!("  - {name}");
        let source = PathBuf::from(format!("main.{}", toolchain.source_ext));
        println!("      compile: {}", toolchain.compile_command(&source, binary));
        println!("      run: {}", toolchain.run_command(&source, binary));
    }

    debug!("dry-run complete (no execution)");
}
