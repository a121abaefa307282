#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Subsystem proxies bound to firmware tasks.
//!
//! Requests leave the sequencer through a bounded queue and are acknowledged
//! by whichever task owns the subsystem. Readiness comes back through
//! [`ProxyFlags`], a block of atomics the owning tasks set and the sequencer
//! polls, so neither side ever blocks the other.

pub mod bench;

use bms_core::subsystems::{
    BalancingRequest, BmsRequest, ContactorRequest, InterlockRequest, InterlockState, SocMode,
    Subsystems,
};
#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use portable_atomic::{AtomicBool, Ordering};

use crate::log;

/// Depth of the queue between the sequencer and the subsystem tasks.
pub const PROXY_QUEUE_DEPTH: usize = 8;

#[cfg(target_os = "none")]
type ProxyMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type ProxyMutex = NoopRawMutex;

/// Requests forwarded from the sequencer to subsystem tasks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProxyCommand {
    BootMessage,
    Interlock(InterlockRequest),
    Contactors(ContactorRequest),
    Balancing(BalancingRequest),
    InitIsoguard,
    StartMeasurement,
    OpenWireCheck,
    InitSof,
    InitSoc(SocMode),
    Bms(BmsRequest),
}

pub type ProxyQueue = Channel<ProxyMutex, ProxyCommand, PROXY_QUEUE_DEPTH>;
pub type ProxySender<'a> = Sender<'a, ProxyMutex, ProxyCommand, PROXY_QUEUE_DEPTH>;
pub type ProxyReceiver<'a> = Receiver<'a, ProxyMutex, ProxyCommand, PROXY_QUEUE_DEPTH>;

/// Readiness reported by the subsystem tasks.
pub struct ProxyFlags {
    interlock_requested: AtomicBool,
    interlock_ready: AtomicBool,
    contactors_ready: AtomicBool,
    balancing_ready: AtomicBool,
    first_measurement: AtomicBool,
    current_sensor: AtomicBool,
    coulomb_counter: AtomicBool,
    bms_ready: AtomicBool,
    periodic_transmission: AtomicBool,
}

impl ProxyFlags {
    pub const fn new() -> Self {
        Self {
            interlock_requested: AtomicBool::new(false),
            interlock_ready: AtomicBool::new(false),
            contactors_ready: AtomicBool::new(false),
            balancing_ready: AtomicBool::new(false),
            first_measurement: AtomicBool::new(false),
            current_sensor: AtomicBool::new(false),
            coulomb_counter: AtomicBool::new(false),
            bms_ready: AtomicBool::new(false),
            periodic_transmission: AtomicBool::new(false),
        }
    }

    pub fn set_interlock_ready(&self) {
        self.interlock_ready.store(true, Ordering::Release);
    }

    pub fn set_contactors_ready(&self) {
        self.contactors_ready.store(true, Ordering::Release);
    }

    pub fn set_balancing_ready(&self) {
        self.balancing_ready.store(true, Ordering::Release);
    }

    pub fn set_first_measurement_finished(&self) {
        self.first_measurement.store(true, Ordering::Release);
    }

    /// Marks the current sensor as detected on the bus.
    pub fn set_current_sensor_present(&self, coulomb_counter: bool) {
        self.coulomb_counter.store(coulomb_counter, Ordering::Relaxed);
        self.current_sensor.store(true, Ordering::Release);
    }

    pub fn set_bms_ready(&self) {
        self.bms_ready.store(true, Ordering::Release);
    }

    /// Whether the bus transmitter may send its periodic frames.
    pub fn periodic_transmission(&self) -> bool {
        self.periodic_transmission.load(Ordering::Acquire)
    }
}

impl Default for ProxyFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Subsystems`] implementation backed by the proxy queue and flags.
pub struct QueueSubsystems<'a> {
    sender: ProxySender<'a>,
    flags: &'a ProxyFlags,
    dropped: u32,
}

impl<'a> QueueSubsystems<'a> {
    pub fn new(sender: ProxySender<'a>, flags: &'a ProxyFlags) -> Self {
        Self {
            sender,
            flags,
            dropped: 0,
        }
    }

    /// Requests lost because the queue was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    fn forward(&mut self, command: ProxyCommand) {
        if let Err(TrySendError::Full(command)) = self.sender.try_send(command) {
            self.dropped = self.dropped.saturating_add(1);
            log::proxy_dropped(command, self.dropped);
        }
    }
}

impl Subsystems for QueueSubsystems<'_> {
    fn send_boot_message(&mut self) {
        self.forward(ProxyCommand::BootMessage);
    }

    fn interlock_request(&mut self, request: InterlockRequest) {
        self.flags.interlock_requested.store(true, Ordering::Relaxed);
        self.forward(ProxyCommand::Interlock(request));
    }

    fn interlock_state(&mut self) -> InterlockState {
        if self.flags.interlock_ready.load(Ordering::Acquire) {
            InterlockState::WaitFirstRequest
        } else if self.flags.interlock_requested.load(Ordering::Relaxed) {
            InterlockState::Initialization
        } else {
            InterlockState::Uninitialized
        }
    }

    fn contactor_request(&mut self, request: ContactorRequest) {
        self.forward(ProxyCommand::Contactors(request));
    }

    fn contactors_initialized(&mut self) -> bool {
        self.flags.contactors_ready.load(Ordering::Acquire)
    }

    fn balancing_request(&mut self, request: BalancingRequest) {
        self.forward(ProxyCommand::Balancing(request));
    }

    fn balancing_initialized(&mut self) -> bool {
        self.flags.balancing_ready.load(Ordering::Acquire)
    }

    fn init_isoguard(&mut self) {
        self.forward(ProxyCommand::InitIsoguard);
    }

    fn start_measurement(&mut self) {
        self.forward(ProxyCommand::StartMeasurement);
    }

    fn first_measurement_finished(&mut self) -> bool {
        self.flags.first_measurement.load(Ordering::Acquire)
    }

    fn request_open_wire_check(&mut self) {
        self.forward(ProxyCommand::OpenWireCheck);
    }

    fn current_sensor_present(&mut self) -> bool {
        self.flags.current_sensor.load(Ordering::Acquire)
    }

    fn current_sensor_coulomb_counter(&mut self) -> bool {
        self.flags.coulomb_counter.load(Ordering::Relaxed)
    }

    fn init_sof(&mut self) {
        self.forward(ProxyCommand::InitSof);
    }

    fn init_soc(&mut self, mode: SocMode) {
        self.forward(ProxyCommand::InitSoc(mode));
    }

    fn bms_request(&mut self, request: BmsRequest) {
        self.forward(ProxyCommand::Bms(request));
    }

    fn bms_initialized(&mut self) -> bool {
        self.flags.bms_ready.load(Ordering::Acquire)
    }

    fn set_periodic_transmission(&mut self, enabled: bool) {
        self.flags
            .periodic_transmission
            .store(enabled, Ordering::Release);
    }
}
