// tests/session_controller.rs

mod common;

use std::time::{Duration, Instant};

use common::{entries_in, init_tracing, process_alive, sh_settings, wait_until_dead, with_timeout};
use liverun::session::{ServerEvent, SessionState};
use liverun::types::{BusyPolicy, Channel, ExitOutcome};
use liverun_test_utils::builders::{missing_compiler_language, SettingsBuilder};
use liverun_test_utils::{
    collect_until_finished, collect_until_system, next_event, output_text, spawn_session,
    system_messages, wait_for_stdout,
};

#[tokio::test]
async fn hello_program_runs_to_completion() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(sh_settings(root.path()));

    session.submit("echo hi", None).await.unwrap();
    let events = collect_until_finished(&mut session).await;

    assert_eq!(output_text(&events, Channel::Stdout), "hi\n");
    assert_eq!(
        system_messages(&events),
        vec![
            "Compiling...",
            "Execution Started",
            "Process finished (Code 0)"
        ]
    );
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Finished {
            run_id: 1,
            exit: ExitOutcome::Code(0)
        })
    ));

    session.disconnect().await.unwrap();
    assert_eq!(entries_in(root.path()), 0);
}

#[tokio::test]
async fn output_sequence_numbers_are_dense() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(sh_settings(root.path()));

    session
        .submit("for i in 1 2 3 4 5; do echo out$i; echo err$i 1>&2; done", None)
        .await
        .unwrap();
    let events = collect_until_finished(&mut session).await;

    let seqs: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Output(out) => Some(out.seq),
            _ => None,
        })
        .collect();
    assert_eq!(seqs, (0..seqs.len() as u64).collect::<Vec<_>>());

    assert_eq!(
        output_text(&events, Channel::Stdout),
        "out1\nout2\nout3\nout4\nout5\n"
    );
    assert_eq!(
        output_text(&events, Channel::Stderr),
        "err1\nerr2\nerr3\nerr4\nerr5\n"
    );

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn syntax_error_reports_compilation_failed_without_finished() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(sh_settings(root.path()));

    session.submit("if then fi (", None).await.unwrap();
    let events = collect_until_system(&mut session, "Compilation Failed").await;

    assert!(!output_text(&events, Channel::Stderr).is_empty());
    assert!(!system_messages(&events).contains(&"Execution Started".to_string()));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ServerEvent::Finished { .. })));

    // Back to idle: a corrected program runs normally.
    session.submit("echo fixed", None).await.unwrap();
    let events = collect_until_finished(&mut session).await;
    assert_eq!(output_text(&events, Channel::Stdout), "fixed\n");

    let rest = session.disconnect().await.unwrap();
    assert!(rest.is_empty(), "{rest:?}");
}

#[tokio::test]
async fn input_is_echoed_by_an_interactive_program() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(sh_settings(root.path()));

    session
        .submit("echo ready; read a; echo \"got $a\"; read b; echo \"got $b\"", None)
        .await
        .unwrap();
    wait_for_stdout(&mut session, "ready").await;

    session.input("5\n").await.unwrap();
    wait_for_stdout(&mut session, "got 5").await;

    session.input("7\n").await.unwrap();
    let events = collect_until_finished(&mut session).await;
    assert_eq!(output_text(&events, Channel::Stdout), "got 7\n");

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn input_without_a_running_program_is_ignored() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(sh_settings(root.path()));

    session.input("nobody listens\n").await.unwrap();
    session.submit("echo alone", None).await.unwrap();
    let events = collect_until_finished(&mut session).await;
    assert_eq!(output_text(&events, Channel::Stdout), "alone\n");

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_during_run_kills_program_and_cleans_workspace() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let marker = root.path().join("pid");
    let mut session = spawn_session(sh_settings(root.path()));

    let script = format!(
        "echo $$ > {}; echo started; while :; do sleep 0.1; done",
        marker.display()
    );
    session.submit(script, None).await.unwrap();
    wait_for_stdout(&mut session, "started").await;
    assert_eq!(entries_in(root.path()), 2); // workspace dir + marker

    let pid: libc::pid_t = std::fs::read_to_string(&marker)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let rest = with_timeout(session.disconnect()).await.unwrap();
    assert!(!rest
        .iter()
        .any(|e| matches!(e, ServerEvent::Finished { .. })));

    // SAFETY: signal 0 only checks for existence.
    assert_eq!(unsafe { libc::kill(pid, 0) }, -1, "program survived disconnect");

    std::fs::remove_file(&marker).unwrap();
    assert_eq!(entries_in(root.path()), 0);
}

#[tokio::test]
async fn disconnect_kills_a_term_ignoring_program() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let settings = SettingsBuilder::new(root.path())
        .kill_grace(Duration::from_millis(200))
        .build();
    let mut session = spawn_session(settings);

    session
        .submit("trap '' TERM; echo started; while :; do sleep 0.1; done", None)
        .await
        .unwrap();
    wait_for_stdout(&mut session, "started").await;

    with_timeout(session.disconnect()).await.unwrap();
    assert_eq!(entries_in(root.path()), 0);
}

fn read_pid(path: &std::path::Path) -> libc::pid_t {
    std::fs::read_to_string(path).unwrap().trim().parse().unwrap()
}

#[tokio::test]
async fn disconnect_kills_background_children_without_waiting_out_the_timeout() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("pid");
    let settings = SettingsBuilder::new(root.path())
        .kill_grace(Duration::from_secs(5))
        .termination_timeout(Duration::from_secs(10))
        .build();
    let mut session = spawn_session(settings);

    let script = format!("sleep 47 & echo $! > '{}'; echo started", marker.display());
    session.submit(script, None).await.unwrap();
    wait_for_stdout(&mut session, "started").await;
    let background = read_pid(&marker);
    assert!(process_alive(background));

    let started = Instant::now();
    with_timeout(session.disconnect()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(3), "disconnect took {elapsed:?}");
    wait_until_dead(background).await;
    assert_eq!(entries_in(root.path()), 0);
}

#[tokio::test]
async fn program_leaving_background_children_still_finishes() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("pid");
    let mut session = spawn_session(sh_settings(root.path()));

    let script = format!("sleep 47 & echo $! > '{}'; echo started", marker.display());
    session.submit(script, None).await.unwrap();
    let events = with_timeout(collect_until_finished(&mut session)).await;

    assert_eq!(output_text(&events, Channel::Stdout), "started\n");
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Finished {
            exit: ExitOutcome::Code(0),
            ..
        })
    ));
    wait_until_dead(read_pid(&marker)).await;

    // The session is idle again and accepts new work.
    session.submit("echo again", None).await.unwrap();
    let events = collect_until_finished(&mut session).await;
    assert_eq!(output_text(&events, Channel::Stdout), "again\n");

    session.disconnect().await.unwrap();
    assert_eq!(entries_in(root.path()), 0);
}

#[tokio::test]
async fn submit_while_running_is_rejected_by_default() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(sh_settings(root.path()));

    session
        .submit("echo first; read line; echo \"done $line\"", None)
        .await
        .unwrap();
    wait_for_stdout(&mut session, "first").await;

    session.submit("echo second", None).await.unwrap();
    match next_event(&mut session).await {
        ServerEvent::Error { kind, message } => {
            assert_eq!(kind, "session_busy");
            assert!(message.contains(&SessionState::Running.to_string()), "{message}");
        }
        other => panic!("expected busy error, got {other:?}"),
    }

    // The first program is unaffected.
    session.input("ok\n").await.unwrap();
    let events = collect_until_finished(&mut session).await;
    assert_eq!(output_text(&events, Channel::Stdout), "done ok\n");
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Finished { run_id: 1, .. })
    ));

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn restart_policy_replaces_the_running_program() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let settings = SettingsBuilder::new(root.path())
        .busy_policy(BusyPolicy::Restart)
        .build();
    let mut session = spawn_session(settings);

    session
        .submit("echo first; while :; do sleep 0.1; done", None)
        .await
        .unwrap();
    wait_for_stdout(&mut session, "first").await;

    session.submit("echo second", None).await.unwrap();
    let events = collect_until_finished(&mut session).await;

    let notices = system_messages(&events);
    assert_eq!(notices[0], "Previous run cancelled");
    assert_eq!(output_text(&events, Channel::Stdout), "second\n");

    // Only the replacement finishes.
    let finished: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::Finished { .. }))
        .collect();
    assert_eq!(
        finished,
        vec![&ServerEvent::Finished {
            run_id: 2,
            exit: ExitOutcome::Code(0)
        }]
    );

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn unknown_language_is_an_error_event() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(sh_settings(root.path()));

    session.submit("print(1)", Some("cobol")).await.unwrap();
    match next_event(&mut session).await {
        ServerEvent::Error { kind, .. } => assert_eq!(kind, "unsupported_language"),
        other => panic!("expected error, got {other:?}"),
    }

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn missing_compiler_is_reported_and_session_survives() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let settings = SettingsBuilder::new(root.path())
        .with_language("x", missing_compiler_language())
        .build();
    let mut session = spawn_session(settings);

    session.submit("anything", Some("x")).await.unwrap();
    let events = collect_until_system(&mut session, "Compilation Failed").await;
    assert!(system_messages(&events)
        .iter()
        .any(|m| m.starts_with("Compiler unavailable")));

    session.submit("echo still alive", None).await.unwrap();
    let events = collect_until_finished(&mut session).await;
    assert_eq!(output_text(&events, Channel::Stdout), "still alive\n");

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn concurrent_sessions_are_isolated() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let settings = sh_settings(root.path());

    let mut a = spawn_session(settings.clone());
    let mut b = spawn_session(settings);
    assert_ne!(a.id(), b.id());

    a.submit("read x; echo \"a:$x\"", None).await.unwrap();
    b.submit("read x; echo \"b:$x\"", None).await.unwrap();

    collect_until_system(&mut a, "Execution Started").await;
    collect_until_system(&mut b, "Execution Started").await;

    b.input("two\n").await.unwrap();
    a.input("one\n").await.unwrap();

    let events_a = collect_until_finished(&mut a).await;
    let events_b = collect_until_finished(&mut b).await;
    assert_eq!(output_text(&events_a, Channel::Stdout), "a:one\n");
    assert_eq!(output_text(&events_b, Channel::Stdout), "b:two\n");

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
    assert_eq!(entries_in(root.path()), 0);
}

#[tokio::test]
async fn killed_program_reports_its_signal() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = spawn_session(sh_settings(root.path()));

    session.submit("kill -9 $$", None).await.unwrap();
    let events = collect_until_finished(&mut session).await;

    assert!(system_messages(&events).contains(&"Process finished (Signal 9)".to_string()));
    assert!(matches!(
        events.last(),
        Some(ServerEvent::Finished {
            exit: ExitOutcome::Signal(9),
            ..
        })
    ));

    session.disconnect().await.unwrap();
}
