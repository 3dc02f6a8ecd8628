use embassy_rp::gpio::Input;
use embassy_time::Instant;
use power_core::wake::{EdgeOutcome, WakeSourceManager};

use super::EDGE_SIGNAL;
use crate::hw::Rp2040Wake;

/// Parks on the wake button and feeds every falling edge through the filter.
#[embassy_executor::task]
pub async fn run(
    mut button: Input<'static>,
    wake: &'static WakeSourceManager<Rp2040Wake>,
) -> ! {
    loop {
        button.wait_for_falling_edge().await;
        let now = Instant::now().as_micros();
        match wake.on_edge_interrupt(now) {
            EdgeOutcome::Accepted => EDGE_SIGNAL.signal(now),
            EdgeOutcome::Dropped => defmt::trace!("bounce dropped at {=u64}us", now),
            EdgeOutcome::Ignored => defmt::trace!("edge before arming ignored"),
        }
    }
}
