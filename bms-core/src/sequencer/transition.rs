//! Pure transition function of the sequencer.
//!
//! [`step`] maps the current phase, the retry counter and one observed
//! [`Event`] to the next phase plus the side effects the caller must apply.
//! It never touches a collaborator, which keeps the whole bring-up table
//! testable without mocks.

use heapless::Vec;

use crate::diagnostics::{DiagChannel, DiagEvent};
use crate::subsystems::{
    BalancingRequest, BmsRequest, ContactorRequest, InterlockRequest, SocMode,
};

use super::inbox::RequestKind;
use super::phase::{FaultCause, Phase, StageStep};
use super::plan::{Delay, Stage, StagePlan};

/// Upper bound on the side effects one dispatch can emit.
pub const MAX_ACTIONS: usize = 4;

/// What the dispatcher observed before evaluating the phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// Nothing to observe in this phase.
    Dispatch,
    /// Request taken from the inbox while uninitialized.
    Request(Option<RequestKind>),
    /// Retained flags read during initialization.
    Boot { deep_discharge: bool },
    /// The polled subsystem reported ready.
    Ready,
    /// The polled subsystem is not ready yet.
    NotReady,
    /// The current sensor answered on the bus.
    SensorPresent { coulomb_counter: bool },
}

impl Event {
    pub const fn from_ready(ready: bool) -> Self {
        if ready { Event::Ready } else { Event::NotReady }
    }
}

/// Side effect requested by a transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Action {
    SendBootMessage,
    Report(DiagChannel, DiagEvent),
    Interlock(InterlockRequest),
    Contactors(ContactorRequest),
    Balancing(BalancingRequest),
    InitIsoguard,
    StartMeasurement,
    RequestOpenWireCheck,
    PeriodicTransmission(bool),
    InitSof,
    InitSoc(SocMode),
    Bms(BmsRequest),
}

/// Result of one dispatch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Step {
    pub next: Phase,
    pub retry_counter: u16,
    pub delay: Delay,
    pub actions: Vec<Action, MAX_ACTIONS>,
    /// Request that was consumed but cannot be acted on.
    pub illegal_request: Option<RequestKind>,
}

impl Step {
    const fn new(next: Phase, retry_counter: u16, delay: Delay) -> Self {
        Self {
            next,
            retry_counter,
            delay,
            actions: Vec::new(),
            illegal_request: None,
        }
    }

    fn then(mut self, action: Action) -> Self {
        let pushed = self.actions.push(action);
        debug_assert!(pushed.is_ok(), "transition emitted more than {MAX_ACTIONS} actions");
        self
    }

    fn then_if(self, condition: bool, action: Action) -> Self {
        if condition { self.then(action) } else { self }
    }

    const fn illegal(mut self, request: RequestKind) -> Self {
        self.illegal_request = Some(request);
        self
    }

    /// Returns `true` when the step leaves the current phase.
    pub fn changes_phase(&self, current: Phase) -> bool {
        self.next != current
    }
}

/// Evaluates one dispatch of the sequencer.
pub fn step(plan: &StagePlan, phase: Phase, retry_counter: u16, event: Event) -> Step {
    let stay = |delay| Step::new(phase, retry_counter, delay);
    let advance = |from: Stage| {
        Step::new(plan.after(from).entry_phase(), retry_counter, Delay::Short)
    };
    let retry = |cause, pacing| count_failed_poll(plan, phase, retry_counter, cause, pacing);

    match phase {
        Phase::Uninitialized => match event {
            Event::Request(Some(RequestKind::InitRequest)) => {
                Step::new(Phase::Initialization, retry_counter, Delay::Short)
            }
            Event::Request(Some(other)) => stay(Delay::None).illegal(other),
            _ => stay(Delay::None),
        },

        Phase::Initialization => {
            let deep_discharge = matches!(event, Event::Boot { deep_discharge: true });
            Step::new(Phase::Initialized, retry_counter, Delay::Short)
                .then(Action::SendBootMessage)
                .then(Action::Report(
                    DiagChannel::DeepDischargeDetected,
                    DiagEvent::from_fault(deep_discharge),
                ))
        }

        Phase::Initialized => Step::new(plan.first().entry_phase(), retry_counter, Delay::Short),

        Phase::InitializeInterlock(StageStep::Entry) => {
            Step::new(Phase::InitializeInterlock(StageStep::Wait), 0, Delay::Short)
                .then(Action::Interlock(InterlockRequest::Init))
        }
        Phase::InitializeInterlock(StageStep::Wait) => match event {
            Event::Ready => {
                advance(Stage::Interlock).then(Action::Interlock(InterlockRequest::Open))
            }
            _ => retry(FaultCause::InterlockInit, Delay::Short),
        },

        Phase::InitializeContactors(StageStep::Entry) => {
            Step::new(Phase::InitializeContactors(StageStep::Wait), 0, Delay::Short)
                .then(Action::Contactors(ContactorRequest::Init))
        }
        Phase::InitializeContactors(StageStep::Wait) => match event {
            Event::Ready => advance(Stage::Contactors),
            _ => retry(FaultCause::ContactorInit, Delay::Short),
        },

        Phase::InitializeBalancing(StageStep::Entry) => {
            Step::new(Phase::InitializeBalancing(StageStep::Wait), 0, Delay::Short)
                .then(Action::Balancing(BalancingRequest::Init))
        }
        Phase::InitializeBalancing(StageStep::Wait) => {
            let policy = Action::Balancing(plan.config().balancing_default.request());
            match event {
                Event::Ready => advance(Stage::Balancing).then(policy),
                _ => retry(FaultCause::BalancingInit, Delay::Short).then(policy),
            }
        }

        Phase::InitializeIsoguard => {
            advance(Stage::Isoguard).then_if(plan.config().isoguard, Action::InitIsoguard)
        }

        Phase::FirstMeasurementCycle(StageStep::Entry) => {
            Step::new(Phase::FirstMeasurementCycle(StageStep::Wait), 0, Delay::None)
                .then(Action::StartMeasurement)
        }
        Phase::FirstMeasurementCycle(StageStep::Wait) => match event {
            Event::Ready => advance(Stage::FirstMeasurement).then(Action::RequestOpenWireCheck),
            _ => retry(FaultCause::MeasurementInit, Delay::Medium),
        },

        Phase::CheckCurrentSensorPresence(StageStep::Entry) => {
            let triggered = plan.config().current_sensor.is_some_and(|sensor| sensor.triggered);
            let delay = if triggered { Delay::Long } else { Delay::Short };
            Step::new(Phase::CheckCurrentSensorPresence(StageStep::Wait), 0, delay)
                .then(Action::PeriodicTransmission(false))
        }
        Phase::CheckCurrentSensorPresence(StageStep::Wait) => match event {
            Event::SensorPresent { coulomb_counter } => {
                let mode = if coulomb_counter {
                    SocMode::SensorCoulombCounter
                } else {
                    SocMode::Internal
                };
                advance(Stage::CurrentSensor)
                    .then(Action::InitSof)
                    .then(Action::InitSoc(mode))
            }
            _ => retry(FaultCause::CurrentSensorPresence, Delay::Medium),
        },

        Phase::InitializeMisc => {
            let sensorless = plan.config().current_sensor.is_none();
            let next = plan.after(Stage::Misc).entry_phase();
            Step::new(next, retry_counter, Delay::Medium)
                .then_if(sensorless, Action::PeriodicTransmission(false))
                .then_if(sensorless, Action::InitSoc(SocMode::Internal))
        }

        Phase::InitializeBms(StageStep::Entry) => {
            Step::new(Phase::InitializeBms(StageStep::Wait), 0, Delay::Short)
                .then(Action::Bms(BmsRequest::Init))
        }
        Phase::InitializeBms(StageStep::Wait) => match event {
            Event::Ready => advance(Stage::Bms),
            _ => retry(FaultCause::BmsInit, Delay::Short),
        },

        Phase::Running => stay(Delay::Long),

        Phase::Fault(_) => stay(Delay::Long).then(Action::PeriodicTransmission(false)),
    }
}

/// Counts a failed poll and escalates once the budget is exceeded.
fn count_failed_poll(
    plan: &StagePlan,
    phase: Phase,
    retry_counter: u16,
    cause: FaultCause,
    pacing: Delay,
) -> Step {
    let retries = retry_counter.saturating_add(1);
    if retries > plan.retry_budget() {
        Step::new(Phase::Fault(cause), retries, Delay::Short)
    } else {
        Step::new(phase, retries, pacing)
    }
}
