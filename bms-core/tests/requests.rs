use bms_core::diagnostics::{ComponentId, DiagnosticsEvent, DiagnosticsLog};
use bms_core::sequencer::{
    MainState, Phase, RequestError, RequestKind, Sequencer, SequencerConfig, SequencerShared,
    StagePlan, StageStep, TickOutcome,
};
use bms_core::subsystems::scripted::Readiness;
use bms_core::subsystems::{NoRetainedFlags, ScriptedSubsystems, SubsystemId};

type TestSequencer<'a> = Sequencer<'a, ScriptedSubsystems, DiagnosticsLog, NoRetainedFlags>;

fn build(shared: &SequencerShared) -> TestSequencer<'_> {
    let plan = StagePlan::new(SequencerConfig::new()).expect("default config should be valid");
    Sequencer::with_collaborators(
        shared,
        plan,
        ScriptedSubsystems::new(),
        DiagnosticsLog::new(),
        NoRetainedFlags,
    )
}

#[test]
fn double_init_request_is_rejected_as_pending() {
    let shared = SequencerShared::new();
    let mut sequencer = build(&shared);

    assert_eq!(shared.request(RequestKind::InitRequest), Ok(()));
    assert_eq!(
        shared.request(RequestKind::InitRequest),
        Err(RequestError::RequestPending)
    );

    assert!(matches!(sequencer.tick(), TickOutcome::Transitioned(_)));
    assert_eq!(shared.state(), MainState::Initialization);
    assert_eq!(shared.pending_request(), None);
    assert_eq!(
        shared.request(RequestKind::InitRequest),
        Err(RequestError::AlreadyInitialized)
    );
}

#[test]
fn error_request_preempts_pending_init() {
    let shared = SequencerShared::new();
    let mut sequencer = build(&shared);

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    assert_eq!(shared.request(RequestKind::ErrorRequest), Ok(()));
    assert_eq!(shared.pending_request(), Some(RequestKind::ErrorRequest));

    assert_eq!(sequencer.tick(), TickOutcome::Dispatched);
    assert_eq!(sequencer.phase(), Phase::Uninitialized);
    assert_eq!(sequencer.illegal_request_count(), 1);
    assert_eq!(shared.pending_request(), None);
    assert_eq!(
        sequencer.diagnostics().latest().map(|record| record.event),
        Some(DiagnosticsEvent::IllegalRequest(RequestKind::ErrorRequest))
    );

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted after the error was consumed");
    sequencer.tick();
    assert_eq!(sequencer.phase(), Phase::Initialization);
}

#[test]
fn rejected_requests_leave_the_slot_untouched() {
    let shared = SequencerShared::new();

    assert_eq!(
        shared.request(RequestKind::NoRequest),
        Err(RequestError::IllegalRequest)
    );
    assert_eq!(
        shared.request(RequestKind::from_raw(0x17)),
        Err(RequestError::IllegalRequest)
    );
    assert_eq!(shared.pending_request(), None);
    assert_eq!(shared.state(), MainState::Uninitialized);
}

#[test]
fn held_guard_denies_the_tick_but_counts_liveness() {
    let shared = SequencerShared::new();
    let mut sequencer = build(&shared);
    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");

    {
        let _token = shared.guard().try_enter().expect("guard should be free");
        for _ in 0..3 {
            assert_eq!(sequencer.tick(), TickOutcome::Reentered);
        }
        assert_eq!(sequencer.phase(), Phase::Uninitialized);
        assert_eq!(shared.pending_request(), Some(RequestKind::InitRequest));
    }

    assert_eq!(sequencer.diagnostics().alive_count(ComponentId::Sys), 3);
    assert!(matches!(sequencer.tick(), TickOutcome::Transitioned(_)));
    assert!(!shared.guard().is_active());
}

#[test]
fn held_guard_freezes_an_armed_countdown_and_retries() {
    let shared = SequencerShared::new();
    let plan = StagePlan::new(SequencerConfig::new()).expect("default config should be valid");
    let mut sequencer = Sequencer::with_collaborators(
        &shared,
        plan,
        ScriptedSubsystems::new().with_readiness(SubsystemId::Measurement, Readiness::Never),
        DiagnosticsLog::new(),
        NoRetainedFlags,
    );
    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");

    let waiting = Phase::FirstMeasurementCycle(StageStep::Wait);
    let mut guard = 0;
    while !(sequencer.phase() == waiting && sequencer.retry_counter() == 2) {
        sequencer.tick();
        guard += 1;
        assert!(guard < 100, "measurement stage never retried");
    }
    sequencer.tick();
    let countdown = sequencer.countdown();
    assert!(countdown > 1, "countdown should be armed, got {countdown}");
    let snapshot = shared.snapshot();

    {
        let _token = shared.guard().try_enter().expect("guard should be free");
        for _ in 0..10 {
            assert_eq!(sequencer.tick(), TickOutcome::Reentered);
        }
        assert_eq!(sequencer.countdown(), countdown);
        assert_eq!(sequencer.retry_counter(), 2);
        assert_eq!(sequencer.phase(), waiting);
        assert_eq!(shared.snapshot(), snapshot);
    }

    assert_eq!(sequencer.tick(), TickOutcome::Delayed);
    assert_eq!(sequencer.countdown(), countdown - 1);
}

#[test]
fn held_guard_freezes_the_running_countdown() {
    let shared = SequencerShared::new();
    let mut sequencer = build(&shared);
    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");

    let mut guard = 0;
    while sequencer.phase() != Phase::Running {
        sequencer.tick();
        guard += 1;
        assert!(guard < 100, "bring-up did not finish");
    }
    sequencer.tick();
    for _ in 0..3 {
        sequencer.tick();
    }
    assert_eq!(sequencer.countdown(), 97);
    let retries = sequencer.retry_counter();

    {
        let _token = shared.guard().try_enter().expect("guard should be free");
        for _ in 0..5 {
            assert_eq!(sequencer.tick(), TickOutcome::Reentered);
        }
        assert_eq!(sequencer.countdown(), 97);
        assert_eq!(sequencer.retry_counter(), retries);
        assert_eq!(sequencer.phase(), Phase::Running);
    }

    assert_eq!(sequencer.tick(), TickOutcome::Delayed);
    assert_eq!(sequencer.countdown(), 96);
}

#[test]
fn countdown_counts_down_once_per_tick_in_running() {
    let shared = SequencerShared::new();
    let mut sequencer = build(&shared);
    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");

    let mut guard = 0;
    while sequencer.phase() != Phase::Running {
        sequencer.tick();
        guard += 1;
        assert!(guard < 100, "bring-up did not finish");
    }

    assert_eq!(sequencer.tick(), TickOutcome::Dispatched);
    assert_eq!(sequencer.countdown(), 100);

    for remaining in (1..100).rev() {
        assert_eq!(sequencer.tick(), TickOutcome::Delayed);
        assert_eq!(sequencer.countdown(), remaining);
    }

    assert_eq!(sequencer.tick(), TickOutcome::Dispatched);
    assert_eq!(sequencer.countdown(), 100);
}

#[test]
fn short_countdown_dispatches_on_the_next_tick() {
    let shared = SequencerShared::new();
    let mut sequencer = build(&shared);
    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");

    sequencer.tick();
    assert_eq!(sequencer.countdown(), 1);
    assert!(matches!(sequencer.tick(), TickOutcome::Transitioned(_)));
    assert_eq!(sequencer.phase(), Phase::Initialized);
}
