pub mod builders;

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use liverun::session::{ServerEvent, SessionController, SessionHandle, SessionSettings};
use liverun::types::Channel;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 10-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// Whether a working `gcc` is on `PATH`.
pub fn gcc_available() -> bool {
    std::process::Command::new("gcc")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Start a session that only ends on disconnect.
pub fn spawn_session(settings: Arc<SessionSettings>) -> SessionHandle {
    // A dropped sender means "no server shutdown will ever come".
    let (_tx, rx) = watch::channel(false);
    SessionController::spawn(settings, rx)
}

/// Next event, failing the test if the session stays silent or ends.
pub async fn next_event(session: &mut SessionHandle) -> ServerEvent {
    with_timeout(session.recv())
        .await
        .expect("session ended unexpectedly")
}

/// Collect events up to and including the first `Finished`.
pub async fn collect_until_finished(session: &mut SessionHandle) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(session).await;
        let done = matches!(event, ServerEvent::Finished { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Collect events up to and including the system notice `message`.
pub async fn collect_until_system(session: &mut SessionHandle, message: &str) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(session).await;
        let done = matches!(&event, ServerEvent::System(m) if m == message);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Wait until the program has written `needle` to stdout.
pub async fn wait_for_stdout(session: &mut SessionHandle, needle: &str) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    loop {
        events.push(next_event(session).await);
        if output_text(&events, Channel::Stdout).contains(needle) {
            return events;
        }
    }
}

/// Concatenated output of one channel.
pub fn output_text(events: &[ServerEvent], channel: Channel) -> String {
    let mut bytes = Vec::new();
    for event in events {
        if let ServerEvent::Output(out) = event {
            if out.channel == channel {
                bytes.extend_from_slice(&out.data);
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// System notices, in order.
pub fn system_messages(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::System(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}
