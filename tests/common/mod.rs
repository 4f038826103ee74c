// tests/common/mod.rs

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use liverun::session::SessionSettings;
use liverun_test_utils::builders::SettingsBuilder;

pub use liverun_test_utils::{init_tracing, with_timeout};

/// Default test settings rooted at `root`: `sh` toolchain, reject policy.
pub fn sh_settings(root: &Path) -> Arc<SessionSettings> {
    SettingsBuilder::new(root).build()
}

/// Number of entries directly under `dir` (0 if it doesn't exist).
pub fn entries_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
}

/// Whether `pid` names a live (non-zombie) process.
pub fn process_alive(pid: i32) -> bool {
    if Path::new("/proc/self").exists() {
        // Orphans may linger as zombies until init reaps them.
        return match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        };
    }
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Poll until `pid` is gone, failing after a few seconds.
pub async fn wait_until_dead(pid: i32) {
    with_timeout(async {
        while process_alive(pid) {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await;
}
