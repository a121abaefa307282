//! Collaborator interfaces polled by the sequencer.
//!
//! Every subsystem the sequencer brings up is reached through a narrow proxy:
//! a setter that files a state request and a getter that reports readiness.
//! Proxies never block; the sequencer re-polls them on later ticks. Firmware
//! binds these traits to the real subsystem tasks, while [`scripted`] offers a
//! deterministic model for tests and the emulator.

use core::fmt;

pub mod scripted;

pub use scripted::{ScriptControl, ScriptedRetainedFlags, ScriptedSubsystems};

/// Requests understood by the interlock state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InterlockRequest {
    Init,
    Open,
    Close,
}

/// States reported by the interlock state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InterlockState {
    Undefined,
    Uninitialized,
    Initialization,
    /// Initialization finished; the interlock awaits its first command.
    WaitFirstRequest,
    Open,
    Closed,
    Error,
}

/// Requests understood by the contactor state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContactorRequest {
    Init,
}

/// Requests understood by the balancing state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BalancingRequest {
    Init,
    GlobalEnable,
    GlobalDisable,
}

/// Requests understood by the battery-management logic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BmsRequest {
    Init,
}

/// Balancing policy asserted while balancing initializes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum BalancingPolicy {
    /// Balancing stays globally disabled until explicitly enabled.
    #[default]
    Inactive,
    /// Balancing is globally enabled as soon as it is ready.
    Active,
}

impl BalancingPolicy {
    /// Request that asserts this policy on the balancing proxy.
    pub const fn request(self) -> BalancingRequest {
        match self {
            BalancingPolicy::Inactive => BalancingRequest::GlobalDisable,
            BalancingPolicy::Active => BalancingRequest::GlobalEnable,
        }
    }
}

/// Seeding mode for the state-of-charge estimator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocMode {
    /// Use the charge counter maintained by the current sensor.
    SensorCoulombCounter,
    /// Integrate internally without sensor-side counting (sensor-less mode).
    Internal,
}

/// Identifiers for the proxies the sequencer polls.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubsystemId {
    Interlock,
    Contactors,
    Balancing,
    Measurement,
    CurrentSensor,
    Bms,
}

/// Number of distinct [`SubsystemId`] variants.
pub const SUBSYSTEM_COUNT: usize = 6;

/// Every polled subsystem in bring-up order.
pub const ALL_SUBSYSTEMS: [SubsystemId; SUBSYSTEM_COUNT] = [
    SubsystemId::Interlock,
    SubsystemId::Contactors,
    SubsystemId::Balancing,
    SubsystemId::Measurement,
    SubsystemId::CurrentSensor,
    SubsystemId::Bms,
];

impl SubsystemId {
    /// Deterministic index for per-subsystem tables.
    pub const fn as_index(self) -> usize {
        match self {
            SubsystemId::Interlock => 0,
            SubsystemId::Contactors => 1,
            SubsystemId::Balancing => 2,
            SubsystemId::Measurement => 3,
            SubsystemId::CurrentSensor => 4,
            SubsystemId::Bms => 5,
        }
    }

    /// Lower-case label used by the console.
    pub const fn label(self) -> &'static str {
        match self {
            SubsystemId::Interlock => "interlock",
            SubsystemId::Contactors => "contactors",
            SubsystemId::Balancing => "balancing",
            SubsystemId::Measurement => "measurement",
            SubsystemId::CurrentSensor => "current-sensor",
            SubsystemId::Bms => "bms",
        }
    }

    /// Case-insensitive lookup by console label.
    pub fn from_label(label: &str) -> Option<Self> {
        ALL_SUBSYSTEMS
            .iter()
            .copied()
            .find(|id| id.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Proxy surface for every subsystem the sequencer brings up.
///
/// Getters take `&mut self` because real proxies may latch or count polls.
pub trait Subsystems {
    /// Transmits the boot announcement directly on the bus.
    fn send_boot_message(&mut self);

    fn interlock_request(&mut self, request: InterlockRequest);
    fn interlock_state(&mut self) -> InterlockState;

    fn contactor_request(&mut self, request: ContactorRequest);
    fn contactors_initialized(&mut self) -> bool;

    fn balancing_request(&mut self, request: BalancingRequest);
    fn balancing_initialized(&mut self) -> bool;

    /// Initializes the isolation-resistance guard.
    fn init_isoguard(&mut self);

    fn start_measurement(&mut self);
    fn first_measurement_finished(&mut self) -> bool;
    fn request_open_wire_check(&mut self);

    fn current_sensor_present(&mut self) -> bool;
    /// Returns `true` when the detected sensor maintains a coulomb counter.
    fn current_sensor_coulomb_counter(&mut self) -> bool;

    fn init_sof(&mut self);
    fn init_soc(&mut self, mode: SocMode);

    fn bms_request(&mut self, request: BmsRequest);
    fn bms_initialized(&mut self) -> bool;

    /// Enables or disables periodic bus transmission.
    fn set_periodic_transmission(&mut self, enabled: bool);
}

/// Flags retained across resets (backup RAM or RTC registers).
pub trait RetainedFlags {
    /// Returns `true` when an under-voltage safety limit was violated before
    /// the last reset.
    fn deep_discharge_detected(&self) -> bool;
}

/// Retained-flag source that never reports a violation.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoRetainedFlags;

impl RetainedFlags for NoRetainedFlags {
    fn deep_discharge_detected(&self) -> bool {
        false
    }
}
