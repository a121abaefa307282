//! Deterministic subsystem model.
//!
//! Each polled subsystem follows a [`Readiness`] script: it becomes ready
//! after a fixed number of polls once the sequencer has requested its
//! initialization, or never. Every proxy call is appended to a bounded call
//! log so scenario tests and the emulator can replay what the sequencer did.

use heapless::{HistoryBuf, OldestOrdered};

use super::{
    ALL_SUBSYSTEMS, BalancingRequest, BmsRequest, ContactorRequest, InterlockRequest,
    InterlockState, RetainedFlags, SUBSYSTEM_COUNT, SocMode, SubsystemId, Subsystems,
};

/// Number of proxy calls retained in the call log.
pub const MAX_PROXY_CALLS: usize = 64;

/// Side-effecting proxy calls captured by [`ScriptedSubsystems`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProxyCall {
    BootMessage,
    Interlock(InterlockRequest),
    Contactors(ContactorRequest),
    Balancing(BalancingRequest),
    IsoguardInit,
    MeasurementStart,
    OpenWireCheck,
    SofInit,
    SocInit(SocMode),
    Bms(BmsRequest),
    PeriodicTransmission(bool),
}

/// When a scripted subsystem reports ready.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Readiness {
    /// Ready on the poll following `n` not-ready polls.
    After(u16),
    /// Never ready; the sequencer eventually escalates.
    Never,
}

impl Readiness {
    /// Ready on the first poll.
    pub const IMMEDIATE: Readiness = Readiness::After(0);
}

#[derive(Copy, Clone, Debug)]
struct Script {
    readiness: Readiness,
    armed: bool,
    polls: u16,
}

impl Script {
    const fn new(readiness: Readiness) -> Self {
        Self {
            readiness,
            armed: false,
            polls: 0,
        }
    }

    fn arm(&mut self) {
        self.armed = true;
        self.polls = 0;
    }

    fn poll(&mut self) -> bool {
        if !self.armed {
            return false;
        }

        let not_ready_so_far = self.polls;
        self.polls = self.polls.saturating_add(1);
        match self.readiness {
            Readiness::After(threshold) => not_ready_so_far >= threshold,
            Readiness::Never => false,
        }
    }
}

/// Runtime control over scripted proxies, used by the console.
pub trait ScriptControl {
    /// Replaces the readiness script for a subsystem.
    fn set_readiness(&mut self, id: SubsystemId, readiness: Readiness);

    /// Returns the readiness script for a subsystem.
    fn readiness(&self, id: SubsystemId) -> Readiness;
}

/// Scripted implementation of [`Subsystems`].
#[derive(Clone)]
pub struct ScriptedSubsystems {
    scripts: [Script; SUBSYSTEM_COUNT],
    coulomb_counter: bool,
    interlock_open: bool,
    periodic_transmission: bool,
    soc_mode: Option<SocMode>,
    sof_initialized: bool,
    isoguard_initialized: bool,
    open_wire_requested: bool,
    boot_messages: u16,
    balancing_policy: Option<BalancingRequest>,
    calls: HistoryBuf<ProxyCall, MAX_PROXY_CALLS>,
}

impl ScriptedSubsystems {
    /// Creates a model where every subsystem is ready on its first poll and
    /// the current sensor maintains a coulomb counter.
    pub fn new() -> Self {
        let mut scripts = [Script::new(Readiness::IMMEDIATE); SUBSYSTEM_COUNT];
        // The sensor announces itself on the bus without being asked.
        scripts[SubsystemId::CurrentSensor.as_index()].armed = true;

        Self {
            scripts,
            coulomb_counter: true,
            interlock_open: false,
            periodic_transmission: true,
            soc_mode: None,
            sof_initialized: false,
            isoguard_initialized: false,
            open_wire_requested: false,
            boot_messages: 0,
            balancing_policy: None,
            calls: HistoryBuf::new(),
        }
    }

    /// Builder-style readiness override.
    #[must_use]
    pub fn with_readiness(mut self, id: SubsystemId, readiness: Readiness) -> Self {
        self.set_readiness(id, readiness);
        self
    }

    /// Builder-style override for the sensor's coulomb-counter capability.
    #[must_use]
    pub fn with_coulomb_counter(mut self, present: bool) -> Self {
        self.coulomb_counter = present;
        self
    }

    /// Number of polls observed for a subsystem since it was last armed.
    pub fn polls(&self, id: SubsystemId) -> u16 {
        self.scripts[id.as_index()].polls
    }

    /// Returns `true` when periodic bus transmission is enabled.
    pub fn periodic_transmission(&self) -> bool {
        self.periodic_transmission
    }

    /// Mode the state-of-charge estimator was seeded with, if any.
    pub fn soc_mode(&self) -> Option<SocMode> {
        self.soc_mode
    }

    pub fn sof_initialized(&self) -> bool {
        self.sof_initialized
    }

    pub fn isoguard_initialized(&self) -> bool {
        self.isoguard_initialized
    }

    pub fn open_wire_requested(&self) -> bool {
        self.open_wire_requested
    }

    pub fn boot_messages(&self) -> u16 {
        self.boot_messages
    }

    /// Most recent global balancing request asserted by the sequencer.
    pub fn balancing_policy(&self) -> Option<BalancingRequest> {
        self.balancing_policy
    }

    /// Iterates over recorded proxy calls, oldest first.
    pub fn calls(&self) -> OldestOrdered<'_, ProxyCall> {
        self.calls.oldest_ordered()
    }

    /// Returns `true` when `call` appears in the retained call log.
    pub fn called(&self, call: ProxyCall) -> bool {
        self.calls().any(|recorded| *recorded == call)
    }

    /// Number of times `call` appears in the retained call log.
    pub fn call_count(&self, call: ProxyCall) -> usize {
        self.calls().filter(|recorded| **recorded == call).count()
    }

    fn record(&mut self, call: ProxyCall) {
        self.calls.write(call);
    }

    fn script_mut(&mut self, id: SubsystemId) -> &mut Script {
        &mut self.scripts[id.as_index()]
    }
}

impl Default for ScriptedSubsystems {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptControl for ScriptedSubsystems {
    fn set_readiness(&mut self, id: SubsystemId, readiness: Readiness) {
        let script = self.script_mut(id);
        script.readiness = readiness;
        script.polls = 0;
    }

    fn readiness(&self, id: SubsystemId) -> Readiness {
        self.scripts[id.as_index()].readiness
    }
}

impl Subsystems for ScriptedSubsystems {
    fn send_boot_message(&mut self) {
        self.boot_messages = self.boot_messages.saturating_add(1);
        self.record(ProxyCall::BootMessage);
    }

    fn interlock_request(&mut self, request: InterlockRequest) {
        match request {
            InterlockRequest::Init => self.script_mut(SubsystemId::Interlock).arm(),
            InterlockRequest::Open => self.interlock_open = true,
            InterlockRequest::Close => self.interlock_open = false,
        }
        self.record(ProxyCall::Interlock(request));
    }

    fn interlock_state(&mut self) -> InterlockState {
        if self.interlock_open {
            return InterlockState::Open;
        }

        let script = self.script_mut(SubsystemId::Interlock);
        if !script.armed {
            InterlockState::Uninitialized
        } else if script.poll() {
            InterlockState::WaitFirstRequest
        } else {
            InterlockState::Initialization
        }
    }

    fn contactor_request(&mut self, request: ContactorRequest) {
        match request {
            ContactorRequest::Init => self.script_mut(SubsystemId::Contactors).arm(),
        }
        self.record(ProxyCall::Contactors(request));
    }

    fn contactors_initialized(&mut self) -> bool {
        self.script_mut(SubsystemId::Contactors).poll()
    }

    fn balancing_request(&mut self, request: BalancingRequest) {
        match request {
            BalancingRequest::Init => self.script_mut(SubsystemId::Balancing).arm(),
            policy => self.balancing_policy = Some(policy),
        }
        self.record(ProxyCall::Balancing(request));
    }

    fn balancing_initialized(&mut self) -> bool {
        self.script_mut(SubsystemId::Balancing).poll()
    }

    fn init_isoguard(&mut self) {
        self.isoguard_initialized = true;
        self.record(ProxyCall::IsoguardInit);
    }

    fn start_measurement(&mut self) {
        self.script_mut(SubsystemId::Measurement).arm();
        self.record(ProxyCall::MeasurementStart);
    }

    fn first_measurement_finished(&mut self) -> bool {
        self.script_mut(SubsystemId::Measurement).poll()
    }

    fn request_open_wire_check(&mut self) {
        self.open_wire_requested = true;
        self.record(ProxyCall::OpenWireCheck);
    }

    fn current_sensor_present(&mut self) -> bool {
        self.script_mut(SubsystemId::CurrentSensor).poll()
    }

    fn current_sensor_coulomb_counter(&mut self) -> bool {
        self.coulomb_counter
    }

    fn init_sof(&mut self) {
        self.sof_initialized = true;
        self.record(ProxyCall::SofInit);
    }

    fn init_soc(&mut self, mode: SocMode) {
        self.soc_mode = Some(mode);
        self.record(ProxyCall::SocInit(mode));
    }

    fn bms_request(&mut self, request: BmsRequest) {
        match request {
            BmsRequest::Init => self.script_mut(SubsystemId::Bms).arm(),
        }
        self.record(ProxyCall::Bms(request));
    }

    fn bms_initialized(&mut self) -> bool {
        self.script_mut(SubsystemId::Bms).poll()
    }

    fn set_periodic_transmission(&mut self, enabled: bool) {
        self.periodic_transmission = enabled;
        self.record(ProxyCall::PeriodicTransmission(enabled));
    }
}

/// Retained flags with a fixed deep-discharge verdict.
#[derive(Copy, Clone, Debug, Default)]
pub struct ScriptedRetainedFlags {
    deep_discharge: bool,
}

impl ScriptedRetainedFlags {
    pub const fn new(deep_discharge: bool) -> Self {
        Self { deep_discharge }
    }
}

impl RetainedFlags for ScriptedRetainedFlags {
    fn deep_discharge_detected(&self) -> bool {
        self.deep_discharge
    }
}

/// Lists every subsystem together with its current script.
pub fn scripts<C: ScriptControl>(control: &C) -> [(SubsystemId, Readiness); SUBSYSTEM_COUNT] {
    ALL_SUBSYSTEMS.map(|id| (id, control.readiness(id)))
}
