#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use liverun::config::model::builtin_languages;
use liverun::config::{ConfigFile, LanguageConfig, RawConfigFile, Toolchain};
use liverun::session::SessionSettings;
use liverun::types::BusyPolicy;

/// Shell-script "toolchain": `sh -n` is the compiler (syntax check), the
/// artifact is a copy of the script and `sh` runs it.
///
/// Lets session tests run real processes without a C compiler.
pub fn sh_language() -> LanguageConfig {
    LanguageConfig {
        source_ext: "sh".to_string(),
        compile: argv(&[
            "sh",
            "-c",
            "sh -n \"$0\" && cp \"$0\" \"$1\" && chmod +x \"$1\"",
            "{source}",
            "{binary}",
        ]),
        run: argv(&["sh", "{binary}"]),
    }
}

/// A language whose compiler does not exist.
pub fn missing_compiler_language() -> LanguageConfig {
    LanguageConfig {
        source_ext: "x".to_string(),
        compile: argv(&["liverun-no-such-compiler", "{source}", "-o", "{binary}"]),
        run: argv(&["{binary}"]),
    }
}

pub fn sh_toolchain() -> Toolchain {
    Toolchain::new("sh", &sh_language())
}

pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Builder for `SessionSettings` to simplify test setup.
///
/// Defaults to the `sh` toolchain only, short timeouts and the `reject`
/// busy policy.
pub struct SettingsBuilder {
    root: PathBuf,
    busy_policy: BusyPolicy,
    default_language: String,
    languages: BTreeMap<String, LanguageConfig>,
    compile_timeout: Duration,
    kill_grace: Duration,
    termination_timeout: Duration,
}

impl SettingsBuilder {
    pub fn new(root: &Path) -> Self {
        let mut languages = BTreeMap::new();
        languages.insert("sh".to_string(), sh_language());

        Self {
            root: root.to_path_buf(),
            busy_policy: BusyPolicy::Reject,
            default_language: "sh".to_string(),
            languages,
            compile_timeout: Duration::from_secs(5),
            kill_grace: Duration::from_millis(300),
            termination_timeout: Duration::from_secs(3),
        }
    }

    /// Add the built-in `c` and `cpp` toolchains.
    pub fn with_builtin_languages(mut self) -> Self {
        self.languages.extend(builtin_languages());
        self
    }

    pub fn with_language(mut self, name: &str, lang: LanguageConfig) -> Self {
        self.languages.insert(name.to_string(), lang);
        self
    }

    pub fn default_language(mut self, name: &str) -> Self {
        self.default_language = name.to_string();
        self
    }

    pub fn busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub fn compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn termination_timeout(mut self, timeout: Duration) -> Self {
        self.termination_timeout = timeout;
        self
    }

    pub fn build(self) -> Arc<SessionSettings> {
        let toolchains = self
            .languages
            .iter()
            .map(|(name, lang)| (name.clone(), Toolchain::new(name, lang)))
            .collect();

        Arc::new(SessionSettings {
            workspace_root: self.root,
            busy_policy: self.busy_policy,
            default_language: self.default_language,
            toolchains,
            compile_timeout: self.compile_timeout,
            kill_grace: self.kill_grace,
            termination_timeout: self.termination_timeout,
        })
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_language(mut self, name: &str, lang: LanguageConfig) -> Self {
        self.config.language.insert(name.to_string(), lang);
        self
    }

    pub fn default_language(mut self, name: &str) -> Self {
        self.config.session.default_language = name.to_string();
        self
    }

    pub fn workspace_root(mut self, root: &Path) -> Self {
        self.config.workspace.root = Some(root.to_path_buf());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
