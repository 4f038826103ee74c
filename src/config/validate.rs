// src/config/validate.rs

use crate::config::model::{
    builtin_languages, ConfigFile, LanguageConfig, RawConfigFile, SessionSection, Timeouts,
};
use crate::errors::{LiverunError, Result};
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = LiverunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let timeouts = validate_session(&raw.session)?;

        let languages = if raw.language.is_empty() {
            builtin_languages()
        } else {
            raw.language
        };

        for (name, lang) in languages.iter() {
            validate_language(name, lang)?;
        }

        if !languages.contains_key(&raw.session.default_language) {
            return Err(LiverunError::ConfigError(format!(
                "[session].default_language '{}' has no [language.{}] toolchain",
                raw.session.default_language, raw.session.default_language
            )));
        }

        Ok(ConfigFile::new_unchecked(
            raw.server,
            raw.workspace,
            raw.session,
            languages,
            timeouts,
        ))
    }
}

fn validate_session(session: &SessionSection) -> Result<Timeouts> {
    Ok(Timeouts {
        compile: positive_duration("compile_timeout", &session.compile_timeout)?,
        kill_grace: positive_duration("kill_grace", &session.kill_grace)?,
        termination: positive_duration("termination_timeout", &session.termination_timeout)?,
    })
}

fn positive_duration(field: &str, value: &str) -> Result<std::time::Duration> {
    let dur = parse_duration(value)
        .map_err(|e| LiverunError::ConfigError(format!("[session].{field}: {e}")))?;

    if dur.is_zero() {
        return Err(LiverunError::ConfigError(format!(
            "[session].{field} must be greater than zero (got {value:?})"
        )));
    }

    Ok(dur)
}

fn validate_language(name: &str, lang: &LanguageConfig) -> Result<()> {
    if lang.source_ext.is_empty() || !lang.source_ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LiverunError::ConfigError(format!(
            "[language.{name}].source_ext must be a non-empty alphanumeric extension (got {:?})",
            lang.source_ext
        )));
    }

    if lang.compile.is_empty() || lang.compile[0].trim().is_empty() {
        return Err(LiverunError::ConfigError(format!(
            "[language.{name}].compile must name a compiler executable"
        )));
    }

    if lang.run.is_empty() || lang.run[0].trim().is_empty() {
        return Err(LiverunError::ConfigError(format!(
            "[language.{name}].run must name an executable"
        )));
    }

    Ok(())
}
