use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_time::Instant;

use bms_core::sequencer::{Sequencer, SequencerShared, StagePlan};

use crate::config;
use crate::log::LogDiagnostics;
use crate::proxies::bench::BenchDrivers;
use crate::proxies::{ProxyFlags, ProxyQueue, QueueSubsystems};

mod bench_task;
mod engine_task;
mod retained;
mod sys_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) static SHARED: SequencerShared = SequencerShared::new();
pub(super) static PROXY_QUEUE: ProxyQueue = ProxyQueue::new();
pub(super) static PROXY_FLAGS: ProxyFlags = ProxyFlags::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let _peripherals = hal::init(hal::Config::default());

    let plan = StagePlan::new(config::SEQUENCER).expect("sequencer configuration");
    let sequencer = Sequencer::with_collaborators(
        &SHARED,
        plan,
        QueueSubsystems::new(PROXY_QUEUE.sender(), &PROXY_FLAGS),
        LogDiagnostics::new(),
        retained::RetainedWord::capture(),
    );
    let drivers = BenchDrivers::new(&PROXY_FLAGS, config::BENCH, Instant::now());

    spawner
        .spawn(bench_task::run(drivers, PROXY_QUEUE.receiver()))
        .expect("failed to spawn bench driver task");

    spawner
        .spawn(sys_task::run(sequencer))
        .expect("failed to spawn sys task");

    spawner
        .spawn(engine_task::run(&SHARED))
        .expect("failed to spawn engine task");

    core::future::pending::<()>().await;
}
