#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Build-time configuration for the controller image.

use bms_core::sequencer::{CurrentSensorConfig, SequencerConfig};
use bms_core::subsystems::BalancingPolicy;
use embassy_time::Duration;

use crate::proxies::bench::BenchTiming;

/// Sequencer profile for this pack: every optional stage fitted, cyclic
/// current sensor, balancing held off until the BMS enables it.
pub const SEQUENCER: SequencerConfig = SequencerConfig::new()
    .with_tick_period_ms(10)
    .with_init_timeout_ms(100)
    .with_current_sensor(Some(CurrentSensorConfig::CYCLIC))
    .with_balancing_default(BalancingPolicy::Inactive);

/// Back-off between init submissions while a request is still pending.
pub const INIT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Poll interval of the bench driver loop when no request arrives.
pub const BENCH_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Settle times of the bench stand-ins that acknowledge proxy requests.
pub const BENCH: BenchTiming = BenchTiming {
    settle: Duration::from_millis(30),
    first_measurement: Duration::from_millis(80),
    current_sensor: Some(Duration::from_millis(50)),
    coulomb_counter: true,
};

/// Number of liveness notifications between heartbeat log lines.
pub const HEARTBEAT_EVERY: u32 = 1_000;
