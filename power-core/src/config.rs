//! Board and timing constants for the low-power demo.

use core::time::Duration;

use crate::wake::{DEBOUNCE_WINDOW, DebounceFilter, WatchdogTimeout};

/// GPIO driving the on-board LED of a Pico.
pub const DEFAULT_LED_PIN: u8 = 25;
/// GPIO wired to the active-low wake button.
pub const DEFAULT_WAKE_PIN: u8 = 18;
/// Longest time the watchdog can count, used by the demo as its wake timeout.
pub const DEFAULT_WATCHDOG_TIMEOUT_MS: u32 = WatchdogTimeout::MAX_MS;
/// Idle period bracketing each transition so current draw can be measured.
pub const SETTLE_TIME: Duration = Duration::from_secs(5);
/// How long the LED stays lit at boot.
pub const LED_PULSE: Duration = Duration::from_millis(500);
/// Interval between heartbeat dots once the demo has finished.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Baud rate of the diagnostic UART.
pub const DIAGNOSTIC_BAUD: u32 = 115_200;

/// Everything the foreground loop needs to know about the board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DemoConfig {
    pub led_pin: u8,
    pub wake_pin: u8,
    pub debounce_window: Duration,
    pub watchdog_timeout_ms: u32,
    pub settle_time: Duration,
    pub led_pulse: Duration,
    pub heartbeat_interval: Duration,
    pub baud_rate: u32,
}

impl DemoConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            led_pin: DEFAULT_LED_PIN,
            wake_pin: DEFAULT_WAKE_PIN,
            debounce_window: DEBOUNCE_WINDOW,
            watchdog_timeout_ms: DEFAULT_WATCHDOG_TIMEOUT_MS,
            settle_time: SETTLE_TIME,
            led_pulse: LED_PULSE,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            baud_rate: DIAGNOSTIC_BAUD,
        }
    }

    /// Validates the watchdog timeout against the counter width.
    ///
    /// # Errors
    ///
    /// Returns [`crate::wake::ConfigError::TimeoutTooLarge`] when the
    /// configured timeout does not fit.
    pub fn watchdog_timeout(&self) -> Result<WatchdogTimeout, crate::wake::ConfigError> {
        WatchdogTimeout::from_millis(self.watchdog_timeout_ms)
    }

    /// Edge filter using the configured window, its clock starting at `now_us`.
    #[must_use]
    pub const fn debounce_filter(&self, now_us: u64) -> DebounceFilter {
        DebounceFilter::with_window(self.debounce_window, now_us)
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self::new()
    }
}
