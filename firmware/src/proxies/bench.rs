//! Bench stand-ins for the subsystem tasks.
//!
//! Each init request is acknowledged once its settle time has elapsed. This
//! lets the image run the full bring-up on a bare board without the analog
//! front end, contactor drivers or a current sensor attached.

use bms_core::subsystems::{BalancingRequest, BmsRequest, ContactorRequest, InterlockRequest};
use embassy_time::{Duration, Instant};

use super::{ProxyCommand, ProxyFlags};
use crate::log;

/// Settle times used by [`BenchDrivers`].
#[derive(Copy, Clone, Debug)]
pub struct BenchTiming {
    pub settle: Duration,
    pub first_measurement: Duration,
    /// Time until the sensor shows up on the bus; `None` if never fitted.
    pub current_sensor: Option<Duration>,
    pub coulomb_counter: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Pending {
    Interlock,
    Contactors,
    Balancing,
    Measurement,
    CurrentSensor,
    Bms,
}

const PENDING_COUNT: usize = 6;

impl Pending {
    const ALL: [Pending; PENDING_COUNT] = [
        Pending::Interlock,
        Pending::Contactors,
        Pending::Balancing,
        Pending::Measurement,
        Pending::CurrentSensor,
        Pending::Bms,
    ];

    const fn as_index(self) -> usize {
        match self {
            Pending::Interlock => 0,
            Pending::Contactors => 1,
            Pending::Balancing => 2,
            Pending::Measurement => 3,
            Pending::CurrentSensor => 4,
            Pending::Bms => 5,
        }
    }
}

/// Acknowledges proxy requests after fixed delays.
pub struct BenchDrivers<'a> {
    flags: &'a ProxyFlags,
    timing: BenchTiming,
    deadlines: [Option<Instant>; PENDING_COUNT],
}

impl<'a> BenchDrivers<'a> {
    /// Creates the drivers and starts the sensor detection clock at `now`.
    pub fn new(flags: &'a ProxyFlags, timing: BenchTiming, now: Instant) -> Self {
        let mut drivers = Self {
            flags,
            timing,
            deadlines: [None; PENDING_COUNT],
        };
        if let Some(delay) = timing.current_sensor {
            drivers.schedule(Pending::CurrentSensor, now + delay);
        }
        drivers
    }

    /// Handles one request taken from the proxy queue.
    pub fn accept(&mut self, command: ProxyCommand, now: Instant) {
        let settle = now + self.timing.settle;
        match command {
            ProxyCommand::Interlock(InterlockRequest::Init) => {
                self.schedule(Pending::Interlock, settle);
            }
            ProxyCommand::Contactors(ContactorRequest::Init) => {
                self.schedule(Pending::Contactors, settle);
            }
            ProxyCommand::Balancing(BalancingRequest::Init) => {
                self.schedule(Pending::Balancing, settle);
            }
            ProxyCommand::StartMeasurement => {
                self.schedule(Pending::Measurement, now + self.timing.first_measurement);
            }
            ProxyCommand::Bms(BmsRequest::Init) => self.schedule(Pending::Bms, settle),
            other => log::bench_ignored(other),
        }
    }

    /// Publishes every acknowledgement whose deadline has passed.
    pub fn advance(&mut self, now: Instant) {
        for pending in Pending::ALL {
            let slot = &mut self.deadlines[pending.as_index()];
            if slot.is_some_and(|deadline| deadline <= now) {
                *slot = None;
                self.complete(pending);
            }
        }
    }

    /// Whether any acknowledgement is still outstanding.
    pub fn is_idle(&self) -> bool {
        self.deadlines.iter().all(Option::is_none)
    }

    fn schedule(&mut self, pending: Pending, deadline: Instant) {
        self.deadlines[pending.as_index()] = Some(deadline);
    }

    fn complete(&self, pending: Pending) {
        match pending {
            Pending::Interlock => self.flags.set_interlock_ready(),
            Pending::Contactors => self.flags.set_contactors_ready(),
            Pending::Balancing => self.flags.set_balancing_ready(),
            Pending::Measurement => self.flags.set_first_measurement_finished(),
            Pending::CurrentSensor => self
                .flags
                .set_current_sensor_present(self.timing.coulomb_counter),
            Pending::Bms => self.flags.set_bms_ready(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxies::{ProxyQueue, QueueSubsystems};
    use bms_core::subsystems::{InterlockState, Subsystems};

    const TIMING: BenchTiming = BenchTiming {
        settle: Duration::from_millis(30),
        first_measurement: Duration::from_millis(80),
        current_sensor: Some(Duration::from_millis(50)),
        coulomb_counter: false,
    };

    fn at(millis: u64) -> Instant {
        Instant::from_millis(millis)
    }

    #[test]
    fn init_requests_are_acknowledged_after_settling() {
        let queue = ProxyQueue::new();
        let flags = ProxyFlags::new();
        let mut proxies = QueueSubsystems::new(queue.sender(), &flags);
        let mut drivers = BenchDrivers::new(&flags, TIMING, at(0));

        drivers.accept(ProxyCommand::Interlock(InterlockRequest::Init), at(10));
        drivers.accept(ProxyCommand::Contactors(ContactorRequest::Init), at(20));

        drivers.advance(at(39));
        assert!(!proxies.contactors_initialized());
        assert_ne!(proxies.interlock_state(), InterlockState::WaitFirstRequest);

        drivers.advance(at(40));
        assert_eq!(proxies.interlock_state(), InterlockState::WaitFirstRequest);
        assert!(!proxies.contactors_initialized());

        drivers.advance(at(50));
        assert!(proxies.contactors_initialized());
    }

    #[test]
    fn sensor_appears_without_a_request() {
        let queue = ProxyQueue::new();
        let flags = ProxyFlags::new();
        let mut proxies = QueueSubsystems::new(queue.sender(), &flags);
        let mut drivers = BenchDrivers::new(&flags, TIMING, at(100));

        drivers.advance(at(149));
        assert!(!proxies.current_sensor_present());
        drivers.advance(at(150));
        assert!(proxies.current_sensor_present());
        assert!(!proxies.current_sensor_coulomb_counter());
        assert!(drivers.is_idle());
    }

    #[test]
    fn missing_sensor_never_shows_up() {
        let flags = ProxyFlags::new();
        let timing = BenchTiming {
            current_sensor: None,
            ..TIMING
        };
        let mut drivers = BenchDrivers::new(&flags, timing, at(0));
        assert!(drivers.is_idle());

        drivers.advance(at(10_000));
        let queue = ProxyQueue::new();
        let mut proxies = QueueSubsystems::new(queue.sender(), &flags);
        assert!(!proxies.current_sensor_present());
    }

    #[test]
    fn measurement_uses_its_own_settle_time() {
        let queue = ProxyQueue::new();
        let flags = ProxyFlags::new();
        let mut proxies = QueueSubsystems::new(queue.sender(), &flags);
        let mut drivers = BenchDrivers::new(&flags, TIMING, at(0));

        drivers.accept(ProxyCommand::StartMeasurement, at(0));
        drivers.accept(ProxyCommand::OpenWireCheck, at(0));
        drivers.advance(at(79));
        assert!(!proxies.first_measurement_finished());
        drivers.advance(at(80));
        assert!(proxies.first_measurement_finished());
    }
}
