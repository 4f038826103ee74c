use proptest::prelude::*;
use liverun::errors::LiverunError;
use liverun::exec::{CompileOutcome, CompileResult};
use liverun::session::{ServerEvent, SessionCommand, SessionCore, SessionEvent, SessionState};
use liverun::types::{BusyPolicy, Channel, ExitOutcome};

// Arbitrary event sequences, including ones a real shell would never produce
// (stale exits, input before any run, repeated disconnects).
fn event_strategy() -> impl Strategy<Value = SessionEvent> {
    prop_oneof![
        3 => prop_oneof![Just(None), Just(Some("c".to_string())), Just(Some("rust".to_string()))]
            .prop_map(|language| SessionEvent::Submit { code: "x".to_string(), language }),
        2 => any::<Vec<u8>>().prop_map(SessionEvent::Input),
        3 => any::<bool>().prop_map(|ok| SessionEvent::CompileFinished(CompileResult {
            outcome: if ok { CompileOutcome::Succeeded } else { CompileOutcome::Failed(ExitOutcome::Code(1)) },
            diagnostics: Vec::new(),
        })),
        4 => prop_oneof![Just(Channel::Stdout), Just(Channel::Stderr)]
            .prop_map(|channel| SessionEvent::RunOutput { channel, data: b"x".to_vec() }),
        2 => (0..3i32).prop_map(|c| SessionEvent::RunFinished(ExitOutcome::Code(c))),
        1 => Just(SessionEvent::PipelineFailed { message: "boom".to_string() }),
        1 => Just(SessionEvent::Disconnect),
    ]
}

fn policy_strategy() -> impl Strategy<Value = BusyPolicy> {
    prop_oneof![Just(BusyPolicy::Reject), Just(BusyPolicy::Restart)]
}

proptest! {
    #[test]
    fn test_core_invariants(policy in policy_strategy(), events in proptest::collection::vec(event_strategy(), 0..60)) {
        let mut core = SessionCore::new(policy, "c", ["c".to_string()]);
        let mut last_seq: Option<(u64, u64)> = None;
        let mut finished_runs = Vec::new();
        let mut ended = false;

        for event in events {
            let before = core.state();
            let run_before = core.run_id();
            let is_submit = matches!(event, SessionEvent::Submit { .. });

            match core.step(event) {
                Ok(step) => {
                    prop_assert!(!ended || step.commands.is_empty(), "commands after the session ended");

                    let starts = step.commands.iter()
                        .filter(|c| matches!(c, SessionCommand::StartRun { .. }))
                        .count();
                    prop_assert!(starts <= 1);
                    if starts == 1 {
                        // Programs only start after a successful compile.
                        prop_assert_eq!(before, SessionState::Compiling);
                        prop_assert_eq!(core.state(), SessionState::Running);
                    }

                    // Only one pipeline may be active: a new compile starts
                    // from Idle, or after the old one is stopped.
                    if step.commands.iter().any(|c| matches!(c, SessionCommand::StartCompile { .. })) && before != SessionState::Idle {
                        prop_assert_eq!(&step.commands[0], &SessionCommand::StopActive);
                    }

                    for command in &step.commands {
                        match command {
                            SessionCommand::Emit(ServerEvent::Output(out)) => {
                                // Sequence numbers are dense and increasing within a run.
                                let expected = match last_seq {
                                    Some((run, seq)) if run == out.run_id => seq + 1,
                                    _ => 0,
                                };
                                prop_assert_eq!(out.seq, expected);
                                prop_assert!(!finished_runs.contains(&out.run_id), "output after finished");
                                last_seq = Some((out.run_id, out.seq));
                            }
                            SessionCommand::Emit(ServerEvent::Finished { run_id, .. }) => {
                                prop_assert!(!finished_runs.contains(run_id), "finished twice");
                                finished_runs.push(*run_id);
                            }
                            SessionCommand::WriteInput(_) => {
                                prop_assert_eq!(before, SessionState::Running);
                            }
                            _ => {}
                        }
                    }

                    if !step.keep_running {
                        prop_assert_eq!(core.state(), SessionState::Terminating);
                        ended = true;
                    }
                }
                Err(err) => {
                    prop_assert!(is_submit);
                    // Rejections never change anything.
                    prop_assert_eq!(core.state(), before);
                    prop_assert_eq!(core.run_id(), run_before);
                    let is_expected_error = matches!(
                        err,
                        LiverunError::SessionBusy(_) | LiverunError::UnsupportedLanguage(_)
                    );
                    prop_assert!(is_expected_error);
                }
            }
        }
    }
}
