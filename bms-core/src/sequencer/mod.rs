//! Supervisory bring-up sequencer.
//!
//! [`SequencerShared`] is the part other contexts touch: the request inbox,
//! the re-entrancy guard and the published phase. It is `const`-constructible
//! so firmware can place it in a `static`. [`Sequencer`] owns everything else
//! and is advanced by calling [`Sequencer::tick`] at a fixed period.

mod guard;
mod inbox;
mod phase;
mod plan;
pub mod transition;

pub use guard::{GuardToken, ReentrancyGuard};
pub use inbox::{RequestError, RequestInbox, RequestKind};
pub use phase::{FaultCause, MainState, Phase, PhaseSnapshot, PublishedPhase, StageStep, Substate};
pub use plan::{
    CANONICAL_STAGES, ConfigError, CurrentSensorConfig, DEFAULT_INIT_TIMEOUT_MS,
    DEFAULT_LONG_DELAY, DEFAULT_MEDIUM_DELAY, DEFAULT_SHORT_DELAY, DEFAULT_TICK_PERIOD_MS, Delay,
    STAGE_COUNT, SequencerConfig, Stage, StagePlan,
};

use crate::diagnostics::{ComponentId, Diagnostics, NoopDiagnostics};
use crate::subsystems::{InterlockState, NoRetainedFlags, RetainedFlags, Subsystems};

use transition::{Action, Event};

/// State shared between the tick context and request submitters.
pub struct SequencerShared {
    inbox: RequestInbox,
    guard: ReentrancyGuard,
    published: PublishedPhase,
}

impl SequencerShared {
    pub const fn new() -> Self {
        Self {
            inbox: RequestInbox::new(),
            guard: ReentrancyGuard::new(),
            published: PublishedPhase::new(),
        }
    }

    /// Current main state, read atomically.
    pub fn state(&self) -> MainState {
        self.published.main_state()
    }

    /// Current and previous phase, read as one unit.
    pub fn snapshot(&self) -> PhaseSnapshot {
        self.published.load()
    }

    /// Submits a request for the next dispatch.
    ///
    /// # Errors
    ///
    /// Returns the admission error when the request is not stored.
    pub fn request(&self, request: RequestKind) -> Result<(), RequestError> {
        self.inbox
            .submit(request, || self.published.main_state())
    }

    /// Request waiting for the dispatcher, if any.
    pub fn pending_request(&self) -> Option<RequestKind> {
        self.inbox.peek()
    }

    pub fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }
}

impl Default for SequencerShared {
    fn default() -> Self {
        Self::new()
    }
}

/// What a call to [`Sequencer::tick`] did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TickOutcome {
    /// Another tick held the guard; nothing ran.
    Reentered,
    /// The countdown had not elapsed.
    Delayed,
    /// The dispatcher ran and stayed in the same phase.
    Dispatched,
    /// The dispatcher ran and committed a new phase.
    Transitioned(PhaseSnapshot),
}

/// Tick-owned part of the sequencer.
pub struct Sequencer<'a, S, D = NoopDiagnostics, R = NoRetainedFlags> {
    shared: &'a SequencerShared,
    plan: StagePlan,
    subsystems: S,
    diagnostics: D,
    retained: R,
    phase: Phase,
    last_phase: Phase,
    countdown: u16,
    retry_counter: u16,
    illegal_requests: u32,
}

impl<'a, S: Subsystems> Sequencer<'a, S> {
    /// Creates a sequencer without diagnostics or retained flags.
    pub fn new(shared: &'a SequencerShared, plan: StagePlan, subsystems: S) -> Self {
        Sequencer::with_collaborators(shared, plan, subsystems, NoopDiagnostics, NoRetainedFlags)
    }
}

impl<'a, S, D, R> Sequencer<'a, S, D, R>
where
    S: Subsystems,
    D: Diagnostics,
    R: RetainedFlags,
{
    pub fn with_collaborators(
        shared: &'a SequencerShared,
        plan: StagePlan,
        subsystems: S,
        diagnostics: D,
        retained: R,
    ) -> Self {
        Self {
            shared,
            plan,
            subsystems,
            diagnostics,
            retained,
            phase: Phase::Uninitialized,
            last_phase: Phase::Uninitialized,
            countdown: 0,
            retry_counter: 0,
            illegal_requests: 0,
        }
    }

    /// Advances the sequencer by one period.
    pub fn tick(&mut self) -> TickOutcome {
        self.diagnostics.notify_alive(ComponentId::Sys);

        let shared = self.shared;
        let Some(_token) = shared.guard.try_enter() else {
            return TickOutcome::Reentered;
        };

        if self.countdown > 0 {
            self.countdown -= 1;
            if self.countdown > 0 {
                return TickOutcome::Delayed;
            }
        }

        self.dispatch()
    }

    fn dispatch(&mut self) -> TickOutcome {
        let event = self.observe();
        let step = transition::step(&self.plan, self.phase, self.retry_counter, event);

        for action in &step.actions {
            self.perform(*action);
        }

        if let Some(request) = step.illegal_request {
            self.illegal_requests = self.illegal_requests.saturating_add(1);
            self.diagnostics
                .illegal_request(request, self.illegal_requests);
        }

        self.retry_counter = step.retry_counter;
        self.countdown = self.plan.ticks(step.delay);

        if step.changes_phase(self.phase) {
            TickOutcome::Transitioned(self.commit(step.next))
        } else {
            TickOutcome::Dispatched
        }
    }

    /// Reads whatever the current phase needs to decide.
    fn observe(&mut self) -> Event {
        match self.phase {
            Phase::Uninitialized => Event::Request(self.shared.inbox.take()),
            Phase::Initialization => Event::Boot {
                deep_discharge: self.retained.deep_discharge_detected(),
            },
            Phase::InitializeInterlock(StageStep::Wait) => Event::from_ready(
                self.subsystems.interlock_state() == InterlockState::WaitFirstRequest,
            ),
            Phase::InitializeContactors(StageStep::Wait) => {
                Event::from_ready(self.subsystems.contactors_initialized())
            }
            Phase::InitializeBalancing(StageStep::Wait) => {
                Event::from_ready(self.subsystems.balancing_initialized())
            }
            Phase::FirstMeasurementCycle(StageStep::Wait) => {
                Event::from_ready(self.subsystems.first_measurement_finished())
            }
            Phase::CheckCurrentSensorPresence(StageStep::Wait) => {
                if self.subsystems.current_sensor_present() {
                    Event::SensorPresent {
                        coulomb_counter: self.subsystems.current_sensor_coulomb_counter(),
                    }
                } else {
                    Event::NotReady
                }
            }
            Phase::InitializeBms(StageStep::Wait) => {
                Event::from_ready(self.subsystems.bms_initialized())
            }
            _ => Event::Dispatch,
        }
    }

    fn perform(&mut self, action: Action) {
        let subsystems = &mut self.subsystems;
        match action {
            Action::SendBootMessage => subsystems.send_boot_message(),
            Action::Report(channel, event) => self.diagnostics.report(channel, event),
            Action::Interlock(request) => subsystems.interlock_request(request),
            Action::Contactors(request) => subsystems.contactor_request(request),
            Action::Balancing(request) => subsystems.balancing_request(request),
            Action::InitIsoguard => subsystems.init_isoguard(),
            Action::StartMeasurement => subsystems.start_measurement(),
            Action::RequestOpenWireCheck => subsystems.request_open_wire_check(),
            Action::PeriodicTransmission(enabled) => {
                subsystems.set_periodic_transmission(enabled);
            }
            Action::InitSof => subsystems.init_sof(),
            Action::InitSoc(mode) => subsystems.init_soc(mode),
            Action::Bms(request) => subsystems.bms_request(request),
        }
    }

    /// Moves to `next`, remembering the phase being left, and publishes both
    /// in a single store.
    fn commit(&mut self, next: Phase) -> PhaseSnapshot {
        self.last_phase = self.phase;
        self.phase = next;

        let snapshot = PhaseSnapshot::new(self.phase, self.last_phase);
        self.shared.published.store(snapshot);
        self.diagnostics.phase_changed(snapshot);
        snapshot
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Phase left by the most recent transition.
    pub fn last_phase(&self) -> Phase {
        self.last_phase
    }

    /// Ticks left before the dispatcher runs again.
    pub fn countdown(&self) -> u16 {
        self.countdown
    }

    pub fn retry_counter(&self) -> u16 {
        self.retry_counter
    }

    /// Requests the dispatcher consumed but could not act on.
    pub fn illegal_request_count(&self) -> u32 {
        self.illegal_requests
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn shared(&self) -> &'a SequencerShared {
        self.shared
    }

    pub fn subsystems(&self) -> &S {
        &self.subsystems
    }

    pub fn subsystems_mut(&mut self) -> &mut S {
        &mut self.subsystems
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::ScriptedSubsystems;

    fn plan() -> StagePlan {
        StagePlan::new(SequencerConfig::new()).expect("default config should be valid")
    }

    #[test]
    fn idle_ticks_do_not_change_phase() {
        let shared = SequencerShared::new();
        let mut sequencer = Sequencer::new(&shared, plan(), ScriptedSubsystems::new());

        for _ in 0..5 {
            assert_eq!(sequencer.tick(), TickOutcome::Dispatched);
        }
        assert_eq!(shared.state(), MainState::Uninitialized);
    }

    #[test]
    fn init_request_publishes_transition() {
        let shared = SequencerShared::new();
        let mut sequencer = Sequencer::new(&shared, plan(), ScriptedSubsystems::new());

        shared
            .request(RequestKind::InitRequest)
            .expect("init should be admitted");
        let outcome = sequencer.tick();

        let TickOutcome::Transitioned(snapshot) = outcome else {
            panic!("expected a transition, got {outcome:?}");
        };
        assert_eq!(snapshot.main, MainState::Initialization);
        assert_eq!(snapshot.last_main, MainState::Uninitialized);
        assert_eq!(shared.snapshot(), snapshot);
        assert_eq!(sequencer.countdown(), DEFAULT_SHORT_DELAY);
    }

    #[test]
    fn held_guard_skips_the_tick() {
        let shared = SequencerShared::new();
        let mut sequencer = Sequencer::new(&shared, plan(), ScriptedSubsystems::new());
        shared
            .request(RequestKind::InitRequest)
            .expect("init should be admitted");

        let token = shared.guard().try_enter().expect("guard should be free");
        assert_eq!(sequencer.tick(), TickOutcome::Reentered);
        assert_eq!(shared.pending_request(), Some(RequestKind::InitRequest));

        drop(token);
        assert!(matches!(sequencer.tick(), TickOutcome::Transitioned(_)));
        assert!(!shared.guard().is_active());
    }
}
