// tests/integration/gcc_pipeline.rs
//
// Real C programs through the built-in toolchain. Skipped when gcc is not
// installed.

use std::time::Duration;

use liverun::session::ServerEvent;
use liverun::types::{Channel, ExitOutcome};
use liverun_test_utils::builders::SettingsBuilder;
use liverun_test_utils::{
    collect_until_finished, collect_until_system, gcc_available, init_tracing, output_text,
    spawn_session, system_messages, wait_for_stdout, with_timeout,
};

macro_rules! require_gcc {
    () => {
        if !gcc_available() {
            eprintln!("gcc not found; skipping");
            return;
        }
    };
}

fn c_settings(root: &std::path::Path) -> std::sync::Arc<liverun::session::SessionSettings> {
    SettingsBuilder::new(root)
        .with_builtin_languages()
        .default_language("c")
        .compile_timeout(Duration::from_secs(30))
        .build()
}

#[tokio::test]
async fn hello_world_in_c() {
    init_tracing();
    require_gcc!();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(c_settings(root.path()));

    session
        .submit(
            "#include <stdio.h>\nint main(){printf(\"hi\\n\");return 0;}\n",
            None,
        )
        .await
        .unwrap();
    let events = with_timeout(collect_until_finished(&mut session)).await;

    assert_eq!(output_text(&events, Channel::Stdout), "hi\n");
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Finished {
            exit: ExitOutcome::Code(0),
            ..
        })
    ));

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn scanf_reads_client_input() {
    init_tracing();
    require_gcc!();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(c_settings(root.path()));

    let code = r#"#include <stdio.h>
int main(void) {
    int n;
    setvbuf(stdout, NULL, _IONBF, 0);
    printf("number? ");
    if (scanf("%d", &n) != 1) return 2;
    printf("%d\n", n * 2);
    return 0;
}
"#;
    session.submit(code, None).await.unwrap();
    wait_for_stdout(&mut session, "number?").await;

    session.input("21\n").await.unwrap();
    let events = collect_until_finished(&mut session).await;
    assert_eq!(output_text(&events, Channel::Stdout), "42\n");

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn compile_error_never_runs() {
    init_tracing();
    require_gcc!();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(c_settings(root.path()));

    session.submit("int main( {", None).await.unwrap();
    let events = collect_until_system(&mut session, "Compilation Failed").await;

    assert!(output_text(&events, Channel::Stderr).contains("error"));
    assert!(!system_messages(&events).contains(&"Execution Started".to_string()));

    let rest = session.disconnect().await.unwrap();
    assert!(rest.is_empty(), "{rest:?}");
}

#[tokio::test]
async fn infinite_loop_is_killed_on_disconnect() {
    init_tracing();
    require_gcc!();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(c_settings(root.path()));

    let code = r#"#include <stdio.h>
int main(void) {
    setvbuf(stdout, NULL, _IONBF, 0);
    printf("looping\n");
    for (;;) {}
}
"#;
    session.submit(code, None).await.unwrap();
    wait_for_stdout(&mut session, "looping").await;

    with_timeout(session.disconnect()).await.unwrap();
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}
