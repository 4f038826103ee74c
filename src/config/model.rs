// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::exec::CommandSpec;
use crate::types::BusyPolicy;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [server]
/// host = "127.0.0.1"
/// port = 3000
///
/// [workspace]
/// root = "/tmp/liverun"
///
/// [session]
/// busy_policy = "reject"
/// default_language = "c"
/// compile_timeout = "10s"
/// kill_grace = "2s"
/// termination_timeout = "5s"
///
/// [language.c]
/// source_ext = "c"
/// compile = ["gcc", "{source}", "-o", "{binary}"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub workspace: WorkspaceSection,

    #[serde(default)]
    pub session: SessionSection,

    /// Toolchains from `[language.<name>]`, keyed by language name.
    #[serde(default)]
    pub language: BTreeMap<String, LanguageConfig>,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so durations are known
/// to parse and at least one toolchain (including the default language) is
/// present.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub workspace: WorkspaceSection,
    pub session: SessionSection,
    pub language: BTreeMap<String, LanguageConfig>,
    timeouts: Timeouts,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        server: ServerSection,
        workspace: WorkspaceSection,
        session: SessionSection,
        language: BTreeMap<String, LanguageConfig>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            server,
            workspace,
            session,
            language,
            timeouts,
        }
    }

    /// Parsed `[session]` durations.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// All toolchains, keyed by language name.
    pub fn toolchains(&self) -> BTreeMap<String, Toolchain> {
        self.language
            .iter()
            .map(|(name, lang)| (name.clone(), Toolchain::new(name, lang)))
            .collect()
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    /// `0` binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[workspace]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkspaceSection {
    /// Directory under which every session gets its own scratch directory.
    ///
    /// If `None`, `<system temp dir>/liverun` is used.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl WorkspaceSection {
    pub fn effective_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("liverun"))
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// `"reject"` (default) or `"restart"`.
    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Language used when a submission doesn't name one.
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Upper bound on a single compiler invocation.
    #[serde(default = "default_compile_timeout")]
    pub compile_timeout: String,

    /// Time between SIGTERM and SIGKILL when stopping a process.
    #[serde(default = "default_kill_grace")]
    pub kill_grace: String,

    /// Upper bound on tearing down an active pipeline (disconnect, restart).
    #[serde(default = "default_termination_timeout")]
    pub termination_timeout: String,
}

fn default_language() -> String {
    "c".to_string()
}

fn default_compile_timeout() -> String {
    "10s".to_string()
}

fn default_kill_grace() -> String {
    "2s".to_string()
}

fn default_termination_timeout() -> String {
    "5s".to_string()
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::default(),
            default_language: default_language(),
            compile_timeout: default_compile_timeout(),
            kill_grace: default_kill_grace(),
            termination_timeout: default_termination_timeout(),
        }
    }
}

/// Parsed durations from `[session]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub compile: Duration,
    pub kill_grace: Duration,
    pub termination: Duration,
}

/// `[language.<name>]` section.
///
/// `compile` and `run` are argv templates; `{source}` and `{binary}` are
/// replaced with the session's paths.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LanguageConfig {
    /// File extension of the source file, without the dot.
    pub source_ext: String,

    pub compile: Vec<String>,

    #[serde(default = "default_run")]
    pub run: Vec<String>,
}

fn default_run() -> Vec<String> {
    vec!["{binary}".to_string()]
}

/// Toolchains available when the config declares none.
pub fn builtin_languages() -> BTreeMap<String, LanguageConfig> {
    let mut map = BTreeMap::new();
    map.insert(
        "c".to_string(),
        LanguageConfig {
            source_ext: "c".to_string(),
            compile: argv(&["gcc", "{source}", "-o", "{binary}"]),
            run: default_run(),
        },
    );
    map.insert(
        "cpp".to_string(),
        LanguageConfig {
            source_ext: "cpp".to_string(),
            compile: argv(&["g++", "{source}", "-o", "{binary}"]),
            run: default_run(),
        },
    );
    map
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// A named toolchain ready to build commands for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub name: String,
    pub source_ext: String,
    compile: Vec<String>,
    run: Vec<String>,
}

impl Toolchain {
    pub fn new(name: &str, cfg: &LanguageConfig) -> Self {
        Self {
            name: name.to_string(),
            source_ext: cfg.source_ext.clone(),
            compile: cfg.compile.clone(),
            run: cfg.run.clone(),
        }
    }

    /// Compiler invocation for the given paths.
    pub fn compile_command(&self, source: &Path, binary: &Path) -> CommandSpec {
        expand(&self.compile, source, binary)
    }

    /// Program invocation for the given compiled artifact.
    pub fn run_command(&self, source: &Path, binary: &Path) -> CommandSpec {
        expand(&self.run, source, binary)
    }
}

fn expand(template: &[String], source: &Path, binary: &Path) -> CommandSpec {
    let source = source.to_string_lossy();
    let binary = binary.to_string_lossy();

    let mut parts = template
        .iter()
        .map(|part| part.replace("{source}", &source).replace("{binary}", &binary));

    // Validation guarantees a non-empty template.
    let program = parts.next().unwrap_or_default();
    CommandSpec {
        program,
        args: parts.collect(),
    }
}
