//! Phase model of the sequencer.
//!
//! [`Phase`] is the tagged union the dispatcher works with: stages that wait
//! on a subsystem carry a [`StageStep`], and the fault phase carries the
//! [`FaultCause`] that sent it there. [`MainState`] and [`Substate`] are the
//! flat views published to other contexts through [`PublishedPhase`].

use core::fmt;

use portable_atomic::{AtomicU32, Ordering};

/// Top-level phase of the bring-up sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MainState {
    Uninitialized,
    Initialization,
    Initialized,
    InitializeInterlock,
    InitializeContactors,
    InitializeBalancing,
    InitializeIsoguard,
    FirstMeasurementCycle,
    CheckCurrentSensorPresence,
    InitializeMisc,
    InitializeBms,
    Running,
    Fault,
}

impl MainState {
    /// Compact code used when publishing the phase.
    pub const fn to_raw(self) -> u8 {
        match self {
            MainState::Uninitialized => 0,
            MainState::Initialization => 1,
            MainState::Initialized => 2,
            MainState::InitializeInterlock => 3,
            MainState::InitializeContactors => 4,
            MainState::InitializeBalancing => 5,
            MainState::InitializeIsoguard => 6,
            MainState::FirstMeasurementCycle => 7,
            MainState::CheckCurrentSensorPresence => 8,
            MainState::InitializeMisc => 9,
            MainState::InitializeBms => 10,
            MainState::Running => 11,
            MainState::Fault => 12,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(MainState::Uninitialized),
            1 => Some(MainState::Initialization),
            2 => Some(MainState::Initialized),
            3 => Some(MainState::InitializeInterlock),
            4 => Some(MainState::InitializeContactors),
            5 => Some(MainState::InitializeBalancing),
            6 => Some(MainState::InitializeIsoguard),
            7 => Some(MainState::FirstMeasurementCycle),
            8 => Some(MainState::CheckCurrentSensorPresence),
            9 => Some(MainState::InitializeMisc),
            10 => Some(MainState::InitializeBms),
            11 => Some(MainState::Running),
            12 => Some(MainState::Fault),
            _ => None,
        }
    }

    /// Short label used by logs and the console.
    pub const fn label(self) -> &'static str {
        match self {
            MainState::Uninitialized => "uninitialized",
            MainState::Initialization => "initialization",
            MainState::Initialized => "initialized",
            MainState::InitializeInterlock => "init-interlock",
            MainState::InitializeContactors => "init-contactors",
            MainState::InitializeBalancing => "init-balancing",
            MainState::InitializeIsoguard => "init-isoguard",
            MainState::FirstMeasurementCycle => "first-measurement",
            MainState::CheckCurrentSensorPresence => "check-current-sensor",
            MainState::InitializeMisc => "init-misc",
            MainState::InitializeBms => "init-bms",
            MainState::Running => "running",
            MainState::Fault => "fault",
        }
    }
}

impl fmt::Display for MainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Phase-local step. Fault phases use the error variants.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Substate {
    Entry,
    WaitInterlock,
    WaitContactors,
    WaitBalancing,
    WaitFirstMeasurement,
    WaitCurrentSensorPresence,
    WaitBms,
    InterlockInitError,
    ContactorInitError,
    BalancingInitError,
    MeasurementInitError,
    CurrentSensorPresenceError,
    BmsInitError,
}

impl Substate {
    pub const fn to_raw(self) -> u8 {
        match self {
            Substate::Entry => 0,
            Substate::WaitInterlock => 1,
            Substate::WaitContactors => 2,
            Substate::WaitBalancing => 3,
            Substate::WaitFirstMeasurement => 4,
            Substate::WaitCurrentSensorPresence => 5,
            Substate::WaitBms => 6,
            Substate::InterlockInitError => 0x80,
            Substate::ContactorInitError => 0x81,
            Substate::BalancingInitError => 0x82,
            Substate::MeasurementInitError => 0x83,
            Substate::CurrentSensorPresenceError => 0x84,
            Substate::BmsInitError => 0x85,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Substate::Entry),
            1 => Some(Substate::WaitInterlock),
            2 => Some(Substate::WaitContactors),
            3 => Some(Substate::WaitBalancing),
            4 => Some(Substate::WaitFirstMeasurement),
            5 => Some(Substate::WaitCurrentSensorPresence),
            6 => Some(Substate::WaitBms),
            0x80 => Some(Substate::InterlockInitError),
            0x81 => Some(Substate::ContactorInitError),
            0x82 => Some(Substate::BalancingInitError),
            0x83 => Some(Substate::MeasurementInitError),
            0x84 => Some(Substate::CurrentSensorPresenceError),
            0x85 => Some(Substate::BmsInitError),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Substate::Entry => "entry",
            Substate::WaitInterlock => "wait-interlock",
            Substate::WaitContactors => "wait-contactors",
            Substate::WaitBalancing => "wait-balancing",
            Substate::WaitFirstMeasurement => "wait-first-measurement",
            Substate::WaitCurrentSensorPresence => "wait-current-sensor",
            Substate::WaitBms => "wait-bms",
            Substate::InterlockInitError => "interlock-init-error",
            Substate::ContactorInitError => "contactor-init-error",
            Substate::BalancingInitError => "balancing-init-error",
            Substate::MeasurementInitError => "measurement-init-error",
            Substate::CurrentSensorPresenceError => "current-sensor-presence-error",
            Substate::BmsInitError => "bms-init-error",
        }
    }
}

impl fmt::Display for Substate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Step inside a stage that waits on a subsystem.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StageStep {
    /// Just arrived; the subsystem request has not been issued yet.
    Entry,
    /// Request issued; polling for readiness.
    Wait,
}

/// Stage whose retry budget ran out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultCause {
    InterlockInit,
    ContactorInit,
    BalancingInit,
    MeasurementInit,
    CurrentSensorPresence,
    BmsInit,
}

impl FaultCause {
    /// Substate tag published while in the fault phase.
    pub const fn substate(self) -> Substate {
        match self {
            FaultCause::InterlockInit => Substate::InterlockInitError,
            FaultCause::ContactorInit => Substate::ContactorInitError,
            FaultCause::BalancingInit => Substate::BalancingInitError,
            FaultCause::MeasurementInit => Substate::MeasurementInitError,
            FaultCause::CurrentSensorPresence => Substate::CurrentSensorPresenceError,
            FaultCause::BmsInit => Substate::BmsInitError,
        }
    }

    pub const fn from_substate(substate: Substate) -> Option<Self> {
        match substate {
            Substate::InterlockInitError => Some(FaultCause::InterlockInit),
            Substate::ContactorInitError => Some(FaultCause::ContactorInit),
            Substate::BalancingInitError => Some(FaultCause::BalancingInit),
            Substate::MeasurementInitError => Some(FaultCause::MeasurementInit),
            Substate::CurrentSensorPresenceError => Some(FaultCause::CurrentSensorPresence),
            Substate::BmsInitError => Some(FaultCause::BmsInit),
            _ => None,
        }
    }
}

/// Current position of the sequencer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Uninitialized,
    Initialization,
    Initialized,
    InitializeInterlock(StageStep),
    InitializeContactors(StageStep),
    InitializeBalancing(StageStep),
    InitializeIsoguard,
    FirstMeasurementCycle(StageStep),
    CheckCurrentSensorPresence(StageStep),
    InitializeMisc,
    InitializeBms(StageStep),
    Running,
    Fault(FaultCause),
}

impl Phase {
    pub const fn main_state(self) -> MainState {
        match self {
            Phase::Uninitialized => MainState::Uninitialized,
            Phase::Initialization => MainState::Initialization,
            Phase::Initialized => MainState::Initialized,
            Phase::InitializeInterlock(_) => MainState::InitializeInterlock,
            Phase::InitializeContactors(_) => MainState::InitializeContactors,
            Phase::InitializeBalancing(_) => MainState::InitializeBalancing,
            Phase::InitializeIsoguard => MainState::InitializeIsoguard,
            Phase::FirstMeasurementCycle(_) => MainState::FirstMeasurementCycle,
            Phase::CheckCurrentSensorPresence(_) => MainState::CheckCurrentSensorPresence,
            Phase::InitializeMisc => MainState::InitializeMisc,
            Phase::InitializeBms(_) => MainState::InitializeBms,
            Phase::Running => MainState::Running,
            Phase::Fault(_) => MainState::Fault,
        }
    }

    pub const fn substate(self) -> Substate {
        match self {
            Phase::InitializeInterlock(StageStep::Wait) => Substate::WaitInterlock,
            Phase::InitializeContactors(StageStep::Wait) => Substate::WaitContactors,
            Phase::InitializeBalancing(StageStep::Wait) => Substate::WaitBalancing,
            Phase::FirstMeasurementCycle(StageStep::Wait) => Substate::WaitFirstMeasurement,
            Phase::CheckCurrentSensorPresence(StageStep::Wait) => {
                Substate::WaitCurrentSensorPresence
            }
            Phase::InitializeBms(StageStep::Wait) => Substate::WaitBms,
            Phase::Fault(cause) => cause.substate(),
            _ => Substate::Entry,
        }
    }

    /// Rebuilds a phase from its flat parts; `None` for pairs that cannot occur.
    pub const fn from_parts(main: MainState, sub: Substate) -> Option<Self> {
        let phase = match (main, sub) {
            (MainState::Uninitialized, Substate::Entry) => Phase::Uninitialized,
            (MainState::Initialization, Substate::Entry) => Phase::Initialization,
            (MainState::Initialized, Substate::Entry) => Phase::Initialized,
            (MainState::InitializeInterlock, Substate::Entry) => {
                Phase::InitializeInterlock(StageStep::Entry)
            }
            (MainState::InitializeInterlock, Substate::WaitInterlock) => {
                Phase::InitializeInterlock(StageStep::Wait)
            }
            (MainState::InitializeContactors, Substate::Entry) => {
                Phase::InitializeContactors(StageStep::Entry)
            }
            (MainState::InitializeContactors, Substate::WaitContactors) => {
                Phase::InitializeContactors(StageStep::Wait)
            }
            (MainState::InitializeBalancing, Substate::Entry) => {
                Phase::InitializeBalancing(StageStep::Entry)
            }
            (MainState::InitializeBalancing, Substate::WaitBalancing) => {
                Phase::InitializeBalancing(StageStep::Wait)
            }
            (MainState::InitializeIsoguard, Substate::Entry) => Phase::InitializeIsoguard,
            (MainState::FirstMeasurementCycle, Substate::Entry) => {
                Phase::FirstMeasurementCycle(StageStep::Entry)
            }
            (MainState::FirstMeasurementCycle, Substate::WaitFirstMeasurement) => {
                Phase::FirstMeasurementCycle(StageStep::Wait)
            }
            (MainState::CheckCurrentSensorPresence, Substate::Entry) => {
                Phase::CheckCurrentSensorPresence(StageStep::Entry)
            }
            (MainState::CheckCurrentSensorPresence, Substate::WaitCurrentSensorPresence) => {
                Phase::CheckCurrentSensorPresence(StageStep::Wait)
            }
            (MainState::InitializeMisc, Substate::Entry) => Phase::InitializeMisc,
            (MainState::InitializeBms, Substate::Entry) => Phase::InitializeBms(StageStep::Entry),
            (MainState::InitializeBms, Substate::WaitBms) => Phase::InitializeBms(StageStep::Wait),
            (MainState::Running, Substate::Entry) => Phase::Running,
            (MainState::Fault, sub) => match FaultCause::from_substate(sub) {
                Some(cause) => Phase::Fault(cause),
                None => return None,
            },
            _ => return None,
        };
        Some(phase)
    }

    /// Returns `true` once the sequencer can no longer leave this phase.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Phase::Fault(_))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_state(), self.substate())
    }
}

/// Current and previous phase as seen by readers outside the tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhaseSnapshot {
    pub main: MainState,
    pub sub: Substate,
    pub last_main: MainState,
    pub last_sub: Substate,
}

impl PhaseSnapshot {
    /// Snapshot of a freshly created sequencer.
    pub const INITIAL: PhaseSnapshot = PhaseSnapshot {
        main: MainState::Uninitialized,
        sub: Substate::Entry,
        last_main: MainState::Uninitialized,
        last_sub: Substate::Entry,
    };

    pub const fn new(current: Phase, last: Phase) -> Self {
        Self {
            main: current.main_state(),
            sub: current.substate(),
            last_main: last.main_state(),
            last_sub: last.substate(),
        }
    }

    const fn pack(self) -> u32 {
        u32::from_le_bytes([
            self.main.to_raw(),
            self.sub.to_raw(),
            self.last_main.to_raw(),
            self.last_sub.to_raw(),
        ])
    }

    fn unpack(raw: u32) -> Self {
        let [main, sub, last_main, last_sub] = raw.to_le_bytes();
        Self {
            main: decode_main(main),
            sub: decode_sub(sub),
            last_main: decode_main(last_main),
            last_sub: decode_sub(last_sub),
        }
    }
}

impl fmt::Display for PhaseSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (from {}/{})",
            self.main, self.sub, self.last_main, self.last_sub
        )
    }
}

fn decode_main(raw: u8) -> MainState {
    match MainState::from_raw(raw) {
        Some(state) => state,
        None => undefined_state("main state", raw),
    }
}

fn decode_sub(raw: u8) -> Substate {
    match Substate::from_raw(raw) {
        Some(state) => state,
        None => undefined_state("substate", raw),
    }
}

/// Traps on a raw value that names no state.
#[cold]
fn undefined_state(what: &'static str, raw: u8) -> ! {
    panic!("sequencer published an undefined {what} ({raw:#04x})")
}

/// Lock-free publication slot for the phase snapshot.
///
/// The whole snapshot is one atomic word, so a reader never pairs a new
/// substate with a stale main state.
pub struct PublishedPhase {
    raw: AtomicU32,
}

impl PublishedPhase {
    pub const fn new() -> Self {
        Self {
            raw: AtomicU32::new(PhaseSnapshot::INITIAL.pack()),
        }
    }

    pub fn store(&self, snapshot: PhaseSnapshot) {
        self.raw.store(snapshot.pack(), Ordering::Release);
    }

    pub fn load(&self) -> PhaseSnapshot {
        PhaseSnapshot::unpack(self.raw.load(Ordering::Acquire))
    }

    /// Reads only the main state.
    pub fn main_state(&self) -> MainState {
        self.load().main
    }

    #[cfg(test)]
    pub(crate) fn store_raw(&self, raw: u32) {
        self.raw.store(raw, Ordering::Release);
    }
}

impl Default for PublishedPhase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_parts_round_trip_through_phase() {
        let phases = [
            Phase::Uninitialized,
            Phase::InitializeInterlock(StageStep::Wait),
            Phase::CheckCurrentSensorPresence(StageStep::Entry),
            Phase::Running,
            Phase::Fault(FaultCause::MeasurementInit),
        ];

        for phase in phases {
            assert_eq!(
                Phase::from_parts(phase.main_state(), phase.substate()),
                Some(phase)
            );
        }
    }

    #[test]
    fn mismatched_parts_are_rejected() {
        assert_eq!(
            Phase::from_parts(MainState::Running, Substate::WaitBms),
            None
        );
        assert_eq!(Phase::from_parts(MainState::Fault, Substate::Entry), None);
    }

    #[test]
    fn published_snapshot_is_read_back_whole() {
        let published = PublishedPhase::new();
        assert_eq!(published.load(), PhaseSnapshot::INITIAL);

        let snapshot = PhaseSnapshot::new(
            Phase::Fault(FaultCause::BmsInit),
            Phase::InitializeBms(StageStep::Wait),
        );
        published.store(snapshot);

        let read = published.load();
        assert_eq!(read.main, MainState::Fault);
        assert_eq!(read.sub, Substate::BmsInitError);
        assert_eq!(read.last_sub, Substate::WaitBms);
    }

    #[test]
    #[should_panic(expected = "undefined main state")]
    fn undefined_main_state_traps() {
        let published = PublishedPhase::new();
        published.store_raw(u32::from_le_bytes([0x7f, 0, 0, 0]));
        let _ = published.main_state();
    }
}
