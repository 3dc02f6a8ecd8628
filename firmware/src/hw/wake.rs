use core::cell::RefCell;

use embassy_rp::pac;
use embassy_rp::watchdog::Watchdog;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Duration;
use power_core::wake::{EdgeConfig, WakeHardware, WatchdogTimeout};

/// Watchdog plus the bank 0 edge latches.
///
/// The watchdog is reached from both the foreground and the edge task, so it
/// sits behind a critical-section mutex.
pub struct Rp2040Wake {
    watchdog: Mutex<CriticalSectionRawMutex, RefCell<Watchdog>>,
}

impl Rp2040Wake {
    pub fn new(watchdog: Watchdog) -> Self {
        Self {
            watchdog: Mutex::new(RefCell::new(watchdog)),
        }
    }
}

fn group_and_bit(pin: u8) -> (usize, usize) {
    (usize::from(pin / 8), usize::from(pin % 8))
}

impl WakeHardware for Rp2040Wake {
    fn start_watchdog(&self, timeout: WatchdogTimeout) {
        self.watchdog.lock(|watchdog| {
            watchdog
                .borrow_mut()
                .start(Duration::from_millis(u64::from(timeout.as_millis())));
        });
        defmt::info!("watchdog armed for {=u32} ms", timeout.as_millis());
    }

    fn feed_watchdog(&self) {
        self.watchdog.lock(|watchdog| watchdog.borrow_mut().feed());
    }

    fn enable_edge_interrupt(&self, edge: EdgeConfig) {
        let (group, bit) = group_and_bit(edge.pin);
        // Drop anything latched before arming so a stale press does not end the sleep at once.
        pac::IO_BANK0.intr(group).write(|w| w.set_edge_low(bit, true));
        critical_section::with(|_| {
            pac::IO_BANK0
                .int_proc(0)
                .inte(group)
                .modify(|w| w.set_edge_low(bit, true));
        });
        defmt::info!("falling edge armed on gpio {=u8}", edge.pin);
    }

    fn acknowledge_edge(&self, edge: EdgeConfig) {
        let (group, bit) = group_and_bit(edge.pin);
        pac::IO_BANK0.intr(group).write(|w| w.set_edge_low(bit, true));
    }
}
