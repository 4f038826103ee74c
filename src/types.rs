use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Behaviour when a new submission arrives while a session is compiling or
/// running a program.
///
/// - `Reject`: refuse the submission with `SessionBusy`; the in-flight run
///   keeps going untouched (default behaviour).
/// - `Restart`: kill the in-flight compile/run, wait for it to terminate and
///   start the new submission from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    #[default]
    Reject,
    Restart,
}

impl FromStr for BusyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(BusyPolicy::Reject),
            "restart" => Ok(BusyPolicy::Restart),
            other => Err(format!(
                "invalid busy_policy: {other} (expected \"reject\" or \"restart\")"
            )),
        }
    }
}

/// Channel an output chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Stdout => f.write_str("stdout"),
            Channel::Stderr => f.write_str("stderr"),
        }
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited normally with this code.
    Code(i32),
    /// Terminated by this signal number.
    Signal(i32),
    /// The platform reported neither (or the supervisor lost track).
    Unknown,
}

impl ExitOutcome {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitOutcome::Signal(sig);
            }
        }

        ExitOutcome::Unknown
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Code(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Code(code) => Some(*code),
            _ => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitOutcome::Signal(sig) => Some(*sig),
            _ => None,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "Code {code}"),
            ExitOutcome::Signal(sig) => write!(f, "Signal {sig}"),
            ExitOutcome::Unknown => f.write_str("Code unknown"),
        }
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
