//! Wake sources: the falling-edge input and the watchdog countdown.
//!
//! Both sources are armed by the foreground before deep sleep, but edges are
//! reported from interrupt context. The manager therefore keeps all of its
//! mutable state in atomics and exposes only `&self` methods, so a single
//! instance can be shared between the sequencer and the edge handler.

use core::fmt;
use core::time::Duration;

use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

mod debounce;

pub use debounce::{DEBOUNCE_WINDOW, DebounceDecision, DebounceFilter};

/// Rate at which the watchdog counter decrements.
pub const WATCHDOG_TICK_HZ: u32 = 2_000_000;
/// Largest value the 24-bit watchdog load register accepts.
pub const WATCHDOG_MAX_TICKS: u32 = 0x00FF_FFFF;
/// Number of user GPIOs in bank 0.
pub const GPIO_COUNT: u8 = 30;

/// Configuration-time failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// Requested watchdog duration does not fit in the counter.
    TimeoutTooLarge { requested_ms: u32, max_ms: u32 },
    /// The wake pin is not a bank 0 GPIO.
    InvalidPin(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TimeoutTooLarge {
                requested_ms,
                max_ms,
            } => write!(
                f,
                "watchdog timeout {requested_ms} ms exceeds maximum of {max_ms} ms"
            ),
            ConfigError::InvalidPin(pin) => write!(f, "gpio {pin} cannot be used as a wake pin"),
        }
    }
}

/// Watchdog duration that is known to fit the hardware counter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct WatchdogTimeout(u32);

impl WatchdogTimeout {
    /// Longest representable timeout in whole milliseconds.
    pub const MAX_MS: u32 = WATCHDOG_MAX_TICKS / (WATCHDOG_TICK_HZ / 1_000);
    pub const MAX: WatchdogTimeout = WatchdogTimeout(Self::MAX_MS);

    /// Rejects durations the counter cannot hold rather than truncating them.
    ///
    /// Zero is accepted; the chip resets as soon as the watchdog starts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TimeoutTooLarge`] above [`Self::MAX_MS`].
    pub const fn from_millis(ms: u32) -> Result<Self, ConfigError> {
        if ms > Self::MAX_MS {
            Err(ConfigError::TimeoutTooLarge {
                requested_ms: ms,
                max_ms: Self::MAX_MS,
            })
        } else {
            Ok(Self(ms))
        }
    }

    #[must_use]
    pub const fn as_millis(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_duration(self) -> Duration {
        Duration::from_millis(self.0 as u64)
    }

    /// Counter load value for this timeout.
    #[must_use]
    pub const fn ticks(self) -> u32 {
        self.0 * (WATCHDOG_TICK_HZ / 1_000)
    }
}

impl fmt::Display for WatchdogTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ms", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Falling,
    Rising,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pull {
    Up,
    Down,
    None,
}

/// Electrical configuration of the wake input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EdgeConfig {
    pub pin: u8,
    pub edge: Edge,
    pub pull: Pull,
}

impl EdgeConfig {
    /// Active-low input idling high through the internal pull-up.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPin`] outside bank 0.
    pub const fn falling(pin: u8) -> Result<Self, ConfigError> {
        if pin >= GPIO_COUNT {
            return Err(ConfigError::InvalidPin(pin));
        }
        Ok(Self {
            pin,
            edge: Edge::Falling,
            pull: Pull::Up,
        })
    }
}

/// Access to the watchdog and GPIO interrupt registers.
pub trait WakeHardware {
    /// Loads and starts the watchdog. Expiry resets the chip.
    fn start_watchdog(&self, timeout: WatchdogTimeout);

    /// Reloads the watchdog counter.
    fn feed_watchdog(&self);

    /// Configures the pin and unmasks its edge interrupt.
    fn enable_edge_interrupt(&self, edge: EdgeConfig);

    /// Clears the latched edge so the interrupt does not fire again.
    fn acknowledge_edge(&self, edge: EdgeConfig);
}

impl<T> WakeHardware for &T
where
    T: WakeHardware + ?Sized,
{
    fn start_watchdog(&self, timeout: WatchdogTimeout) {
        (**self).start_watchdog(timeout);
    }

    fn feed_watchdog(&self) {
        (**self).feed_watchdog();
    }

    fn enable_edge_interrupt(&self, edge: EdgeConfig) {
        (**self).enable_edge_interrupt(edge);
    }

    fn acknowledge_edge(&self, edge: EdgeConfig) {
        (**self).acknowledge_edge(edge);
    }
}

/// Result of delivering one edge to the manager.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeOutcome {
    /// First edge after the cool-down: acknowledged and the watchdog fed.
    Accepted,
    /// Bounce inside the cool-down window.
    Dropped,
    /// The edge source was not armed.
    Ignored,
}

/// Counters kept for diagnostics.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WakeStats {
    pub accepted: u32,
    pub dropped: u32,
    pub ignored: u32,
    pub last_accepted_us: u64,
}

/// Arms the wake sources and filters edges reported by the interrupt handler.
pub struct WakeSourceManager<W> {
    hardware: W,
    filter: DebounceFilter,
    edge_armed: AtomicBool,
    edge_pin: AtomicU8,
    watchdog_armed: AtomicBool,
    accepted: AtomicU32,
    dropped: AtomicU32,
    ignored: AtomicU32,
}

impl<W> WakeSourceManager<W>
where
    W: WakeHardware,
{
    /// Creates a manager whose debounce clock starts at `now_us`.
    #[must_use]
    pub const fn new(hardware: W, now_us: u64) -> Self {
        Self::with_filter(hardware, DebounceFilter::new(now_us))
    }

    #[must_use]
    pub const fn with_filter(hardware: W, filter: DebounceFilter) -> Self {
        Self {
            hardware,
            filter,
            edge_armed: AtomicBool::new(false),
            edge_pin: AtomicU8::new(0),
            watchdog_armed: AtomicBool::new(false),
            accepted: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            ignored: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn hardware(&self) -> &W {
        &self.hardware
    }

    /// Arms the watchdog and the falling-edge input together.
    ///
    /// Both arguments are validated before either source is touched, so a bad
    /// timeout leaves the hardware exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] for an oversized timeout or a bad pin.
    pub fn arm(&self, edge_pin: u8, watchdog_timeout_ms: u32) -> Result<(), ConfigError> {
        let timeout = WatchdogTimeout::from_millis(watchdog_timeout_ms)?;
        let edge = EdgeConfig::falling(edge_pin)?;
        self.start_watchdog(timeout);
        self.enable_edge(edge);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::TimeoutTooLarge`] above [`WatchdogTimeout::MAX_MS`].
    pub fn arm_watchdog(&self, timeout_ms: u32) -> Result<WatchdogTimeout, ConfigError> {
        let timeout = WatchdogTimeout::from_millis(timeout_ms)?;
        self.start_watchdog(timeout);
        Ok(timeout)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPin`] outside bank 0.
    pub fn arm_edge(&self, pin: u8) -> Result<EdgeConfig, ConfigError> {
        let edge = EdgeConfig::falling(pin)?;
        self.enable_edge(edge);
        Ok(edge)
    }

    fn start_watchdog(&self, timeout: WatchdogTimeout) {
        self.hardware.start_watchdog(timeout);
        self.watchdog_armed.store(true, Ordering::Release);
    }

    fn enable_edge(&self, edge: EdgeConfig) {
        self.edge_pin.store(edge.pin, Ordering::Relaxed);
        self.hardware.enable_edge_interrupt(edge);
        self.edge_armed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_edge_armed(&self) -> bool {
        self.edge_armed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_watchdog_armed(&self) -> bool {
        self.watchdog_armed.load(Ordering::Acquire)
    }

    /// The armed edge configuration, if any.
    #[must_use]
    pub fn edge(&self) -> Option<EdgeConfig> {
        if !self.is_edge_armed() {
            return None;
        }
        Some(EdgeConfig {
            pin: self.edge_pin.load(Ordering::Relaxed),
            edge: Edge::Falling,
            pull: Pull::Up,
        })
    }

    /// Handles one falling edge observed at `now_us`.
    ///
    /// Runs to completion in interrupt context. On acceptance the latched
    /// edge is cleared and the watchdog is fed; dropped edges have no side
    /// effect beyond the counter.
    pub fn on_edge_interrupt(&self, now_us: u64) -> EdgeOutcome {
        let Some(edge) = self.edge() else {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            return EdgeOutcome::Ignored;
        };

        match self.filter.check(now_us) {
            DebounceDecision::Accepted => {
                self.hardware.acknowledge_edge(edge);
                if self.is_watchdog_armed() {
                    self.hardware.feed_watchdog();
                }
                self.accepted.fetch_add(1, Ordering::Relaxed);
                EdgeOutcome::Accepted
            }
            DebounceDecision::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                EdgeOutcome::Dropped
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> WakeStats {
        WakeStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            last_accepted_us: self.filter.last_accepted_us(),
        }
    }
}
