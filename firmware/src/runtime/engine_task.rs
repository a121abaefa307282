use embassy_time::Timer;

use bms_core::sequencer::SequencerShared;

use crate::config::INIT_RETRY_INTERVAL;
use crate::engine::{Submission, submit_init};

#[embassy_executor::task]
pub async fn run(shared: &'static SequencerShared) -> ! {
    while submit_init(shared) == Submission::Retry {
        Timer::after(INIT_RETRY_INTERVAL).await;
    }

    loop {
        core::future::pending::<()>().await;
    }
}
