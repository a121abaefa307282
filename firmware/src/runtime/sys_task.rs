use embassy_time::{Duration, Ticker};

use bms_core::sequencer::{MainState, Sequencer, TickOutcome};

use super::retained::RetainedWord;
use crate::log::{self, LogDiagnostics};
use crate::proxies::QueueSubsystems;

pub type SysSequencer =
    Sequencer<'static, QueueSubsystems<'static>, LogDiagnostics, RetainedWord>;

#[embassy_executor::task]
pub async fn run(mut sequencer: SysSequencer) -> ! {
    let period = u64::from(sequencer.plan().config().tick_period_ms);
    let mut ticker = Ticker::every(Duration::from_millis(period));

    loop {
        ticker.next().await;
        match sequencer.tick() {
            TickOutcome::Transitioned(snapshot) if snapshot.main == MainState::Fault => {
                log::fault(snapshot);
            }
            TickOutcome::Reentered => log::reentered(),
            _ => {}
        }
    }
}
