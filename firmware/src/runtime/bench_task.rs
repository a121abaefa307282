use embassy_futures::select::{Either, select};
use embassy_time::{Instant, Timer};

use crate::config::BENCH_POLL_INTERVAL;
use crate::proxies::ProxyReceiver;
use crate::proxies::bench::BenchDrivers;

#[embassy_executor::task]
pub async fn run(mut drivers: BenchDrivers<'static>, receiver: ProxyReceiver<'static>) -> ! {
    loop {
        match select(receiver.receive(), Timer::after(BENCH_POLL_INTERVAL)).await {
            Either::First(command) => drivers.accept(command, Instant::now()),
            Either::Second(()) => {}
        }
        drivers.advance(Instant::now());
    }
}
