use bms_core::diagnostics::{DiagEvent, DiagnosticsEvent, DiagnosticsLog};
use bms_core::sequencer::{
    CurrentSensorConfig, MainState, Phase, RequestKind, Sequencer, SequencerConfig,
    SequencerShared, StagePlan, StageStep, Substate, TickOutcome,
};
use bms_core::subsystems::scripted::{ProxyCall, Readiness};
use bms_core::subsystems::{
    BalancingPolicy, BalancingRequest, InterlockRequest, ScriptedRetainedFlags,
    ScriptedSubsystems, SocMode, SubsystemId,
};

type TestSequencer<'a> = Sequencer<'a, ScriptedSubsystems, DiagnosticsLog, ScriptedRetainedFlags>;

fn build<'a>(
    shared: &'a SequencerShared,
    config: SequencerConfig,
    subsystems: ScriptedSubsystems,
) -> TestSequencer<'a> {
    let plan = StagePlan::new(config).expect("config should be valid");
    Sequencer::with_collaborators(
        shared,
        plan,
        subsystems,
        DiagnosticsLog::new(),
        ScriptedRetainedFlags::new(false),
    )
}

fn tick_until(sequencer: &mut TestSequencer<'_>, limit: u32, done: impl Fn(Phase) -> bool) -> u32 {
    for tick in 1..=limit {
        sequencer.tick();
        if done(sequencer.phase()) {
            return tick;
        }
    }
    panic!(
        "condition not reached within {limit} ticks, stuck in {}",
        sequencer.phase()
    );
}

fn visited(sequencer: &TestSequencer<'_>, main: MainState) -> bool {
    sequencer.diagnostics().records().any(|record| {
        matches!(record.event, DiagnosticsEvent::PhaseChanged(snapshot) if snapshot.main == main)
    })
}

#[test]
fn full_configuration_reaches_running() {
    let shared = SequencerShared::new();
    let mut sequencer = build(&shared, SequencerConfig::new(), ScriptedSubsystems::new());

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    tick_until(&mut sequencer, 100, |phase| phase == Phase::Running);

    let subsystems = sequencer.subsystems();
    assert_eq!(subsystems.boot_messages(), 1);
    assert!(subsystems.called(ProxyCall::Interlock(InterlockRequest::Open)));
    assert!(subsystems.isoguard_initialized());
    assert!(subsystems.open_wire_requested());
    assert!(subsystems.sof_initialized());
    assert_eq!(subsystems.soc_mode(), Some(SocMode::SensorCoulombCounter));
    assert_eq!(
        subsystems.balancing_policy(),
        Some(BalancingRequest::GlobalDisable)
    );
    assert!(!subsystems.periodic_transmission());

    assert_eq!(sequencer.diagnostics().deep_discharge(), Some(DiagEvent::Ok));
    assert_eq!(shared.state(), MainState::Running);
    assert_eq!(shared.snapshot().last_main, MainState::InitializeBms);
    assert_eq!(shared.snapshot().last_sub, Substate::WaitBms);
}

#[test]
fn stages_run_in_canonical_order() {
    let shared = SequencerShared::new();
    let mut sequencer = build(&shared, SequencerConfig::new(), ScriptedSubsystems::new());
    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    tick_until(&mut sequencer, 100, |phase| phase == Phase::Running);

    let mut order = sequencer
        .diagnostics()
        .records()
        .filter_map(|record| match record.event {
            DiagnosticsEvent::PhaseChanged(snapshot) if snapshot.sub == Substate::Entry => {
                Some(snapshot.main)
            }
            _ => None,
        });

    let expected = [
        MainState::Initialization,
        MainState::Initialized,
        MainState::InitializeInterlock,
        MainState::InitializeContactors,
        MainState::InitializeBalancing,
        MainState::InitializeIsoguard,
        MainState::FirstMeasurementCycle,
        MainState::CheckCurrentSensorPresence,
        MainState::InitializeMisc,
        MainState::InitializeBms,
        MainState::Running,
    ];
    for main in expected {
        assert_eq!(order.next(), Some(main));
    }
    assert_eq!(order.next(), None);
}

#[test]
fn missing_current_sensor_skips_presence_check() {
    let shared = SequencerShared::new();
    let config = SequencerConfig::new().with_current_sensor(None);
    let mut sequencer = build(&shared, config, ScriptedSubsystems::new());

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    tick_until(&mut sequencer, 100, |phase| phase == Phase::Running);

    assert!(!visited(&sequencer, MainState::CheckCurrentSensorPresence));
    let subsystems = sequencer.subsystems();
    assert_eq!(subsystems.soc_mode(), Some(SocMode::Internal));
    assert!(!subsystems.sof_initialized());
    assert!(!subsystems.periodic_transmission());
    assert_eq!(
        subsystems.call_count(ProxyCall::PeriodicTransmission(false)),
        1
    );
}

#[test]
fn optional_stages_are_not_visited_when_absent() {
    let shared = SequencerShared::new();
    let config = SequencerConfig::new()
        .with_interlock(false)
        .with_contactors(false)
        .with_isoguard(false);
    let mut sequencer = build(&shared, config, ScriptedSubsystems::new());

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    tick_until(&mut sequencer, 3, |phase| {
        phase == Phase::InitializeBalancing(StageStep::Entry)
    });
    tick_until(&mut sequencer, 100, |phase| phase == Phase::Running);

    assert!(!visited(&sequencer, MainState::InitializeInterlock));
    assert!(!visited(&sequencer, MainState::InitializeContactors));
    assert!(visited(&sequencer, MainState::InitializeIsoguard));
    let subsystems = sequencer.subsystems();
    assert!(!subsystems.called(ProxyCall::Interlock(InterlockRequest::Init)));
    assert!(!subsystems.isoguard_initialized());
}

#[test]
fn triggered_sensor_waits_long_before_polling() {
    let shared = SequencerShared::new();
    let config =
        SequencerConfig::new().with_current_sensor(Some(CurrentSensorConfig::TRIGGERED));
    let mut sequencer = build(&shared, config, ScriptedSubsystems::new());

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    tick_until(&mut sequencer, 100, |phase| {
        phase == Phase::CheckCurrentSensorPresence(StageStep::Wait)
    });
    assert_eq!(sequencer.countdown(), 100);
    assert_eq!(sequencer.subsystems().polls(SubsystemId::CurrentSensor), 0);

    let waited = tick_until(&mut sequencer, 200, |phase| phase == Phase::InitializeMisc);
    assert_eq!(waited, 100);
}

#[test]
fn sensor_without_coulomb_counter_uses_internal_soc() {
    let shared = SequencerShared::new();
    let subsystems = ScriptedSubsystems::new().with_coulomb_counter(false);
    let mut sequencer = build(&shared, SequencerConfig::new(), subsystems);

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    tick_until(&mut sequencer, 100, |phase| phase == Phase::Running);

    assert!(sequencer.subsystems().sof_initialized());
    assert_eq!(sequencer.subsystems().soc_mode(), Some(SocMode::Internal));
}

#[test]
fn active_balancing_default_is_asserted() {
    let shared = SequencerShared::new();
    let config = SequencerConfig::new().with_balancing_default(BalancingPolicy::Active);
    let subsystems =
        ScriptedSubsystems::new().with_readiness(SubsystemId::Balancing, Readiness::After(2));
    let mut sequencer = build(&shared, config, subsystems);

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    tick_until(&mut sequencer, 100, |phase| phase == Phase::Running);

    assert_eq!(
        sequencer
            .subsystems()
            .call_count(ProxyCall::Balancing(BalancingRequest::GlobalEnable)),
        3
    );
}

#[test]
fn deep_discharge_flag_is_reported_not_ok() {
    let shared = SequencerShared::new();
    let plan = StagePlan::new(SequencerConfig::new()).expect("config should be valid");
    let mut sequencer = Sequencer::with_collaborators(
        &shared,
        plan,
        ScriptedSubsystems::new(),
        DiagnosticsLog::new(),
        ScriptedRetainedFlags::new(true),
    );

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    sequencer.tick();
    sequencer.tick();

    assert_eq!(sequencer.phase(), Phase::Initialized);
    assert_eq!(
        sequencer.diagnostics().deep_discharge(),
        Some(DiagEvent::NotOk)
    );
}

#[test]
fn published_snapshot_matches_owned_phase_after_every_tick() {
    let shared = SequencerShared::new();
    let subsystems =
        ScriptedSubsystems::new().with_readiness(SubsystemId::Measurement, Readiness::After(3));
    let mut sequencer = build(&shared, SequencerConfig::new(), subsystems);

    shared
        .request(RequestKind::InitRequest)
        .expect("init should be admitted");
    for _ in 0..150 {
        let outcome = sequencer.tick();
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.main, sequencer.phase().main_state());
        assert_eq!(snapshot.sub, sequencer.phase().substate());
        assert_eq!(snapshot.last_main, sequencer.last_phase().main_state());
        assert_eq!(snapshot.last_sub, sequencer.last_phase().substate());
        if let TickOutcome::Transitioned(published) = outcome {
            assert_eq!(published, snapshot);
        }
    }
    assert_eq!(sequencer.phase(), Phase::Running);
}
