//! Power-state sequencing between full speed, reduced speed, and deep sleep.
//!
//! The sequencer owns the clock controller and the sleep registers. Entering
//! deep sleep follows a fixed order: drop to the crystal, snapshot the
//! sleep-enable and sleep-control registers, arm the wake sources, narrow the
//! sleep-enable mask to the RTC, set SLEEPDEEP and halt. Arming happens
//! before the mask is narrowed because the watchdog counts from the RTC
//! domain. The snapshot is held by value until [`PowerSequencer::restore_full_speed`]
//! writes it back; without that restore every later wait-for-interrupt would
//! drop the chip into deep sleep again.

use core::fmt;

use crate::clocks::{ClockController, ClockDomain, ClockError, ClockHardware, OperatingPoint};
use crate::diagnostics::{DiagnosticTransport, FrequencySnapshot, RegisterProbe};
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder};
use crate::wake::{ConfigError, EdgeConfig, WakeHardware, WakeSourceManager, WatchdogTimeout};

/// `SLEEPDEEP` bit in the Cortex-M0+ system control register.
pub const SCR_SLEEPDEEP: u32 = 1 << 2;

/// `CLK_RTC` enable bit in `SLEEP_EN0`.
pub const SLEEP_EN0_CLK_RTC: u32 = 1 << 21;

/// Stable and transient power states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerState {
    FullSpeed,
    ReducedSpeed,
    /// Halted in wait-for-interrupt with a wake source armed.
    DeepSleep,
}

impl PowerState {
    #[must_use]
    pub const fn from_point(point: OperatingPoint) -> Self {
        match point {
            OperatingPoint::FullSpeed => PowerState::FullSpeed,
            OperatingPoint::ReducedSpeed => PowerState::ReducedSpeed,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::FullSpeed => f.write_str("full-speed"),
            PowerState::ReducedSpeed => f.write_str("reduced-speed"),
            PowerState::DeepSleep => f.write_str("deep-sleep"),
        }
    }
}

/// The two `SLEEP_ENx` words: which peripherals keep their clock in sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepEnableMask {
    pub en0: u32,
    pub en1: u32,
}

impl SleepEnableMask {
    /// Register values after reset: everything stays clocked.
    pub const RESET: Self = Self::new(0xFFFF_FFFF, 0x0000_7FFF);
    /// Only the RTC keeps running, which the watchdog needs.
    pub const RTC_ONLY: Self = Self::new(SLEEP_EN0_CLK_RTC, 0);

    #[must_use]
    pub const fn new(en0: u32, en1: u32) -> Self {
        Self { en0, en1 }
    }
}

impl fmt::Display for SleepEnableMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sleep_en0=0x{:X} sleep_en1=0x{:X}", self.en0, self.en1)
    }
}

/// Register state captured immediately before deep sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepSnapshot {
    pub mask: SleepEnableMask,
    /// Raw system control register.
    pub scr: u32,
}

/// Why the wait-for-interrupt returned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WakeReason {
    /// The wake pin latched a falling edge.
    Edge,
    /// Some other enabled interrupt fired.
    Interrupt,
    /// The watchdog expired. Real silicon resets instead of returning, so
    /// only simulated chips report this.
    Watchdog,
}

impl fmt::Display for WakeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeReason::Edge => f.write_str("edge"),
            WakeReason::Interrupt => f.write_str("interrupt"),
            WakeReason::Watchdog => f.write_str("watchdog"),
        }
    }
}

/// Sleep-related registers of the clock block and the processor.
pub trait PowerControl {
    fn sleep_enable(&self) -> SleepEnableMask;

    fn set_sleep_enable(&mut self, mask: SleepEnableMask);

    /// Reads the system control register.
    fn sleep_control(&self) -> u32;

    fn set_sleep_control(&mut self, scr: u32);

    /// Halts the core until an enabled interrupt fires.
    fn wait_for_interrupt(&mut self) -> WakeReason;

    /// Free-running microsecond counter.
    fn now_micros(&self) -> u64;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SleepError {
    Config(ConfigError),
    Clock(ClockError),
    /// The previous deep sleep has not been followed by a restore.
    RestorePending,
}

impl From<ConfigError> for SleepError {
    fn from(error: ConfigError) -> Self {
        SleepError::Config(error)
    }
}

impl From<ClockError> for SleepError {
    fn from(error: ClockError) -> Self {
        SleepError::Clock(error)
    }
}

impl fmt::Display for SleepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepError::Config(error) => write!(f, "configuration rejected: {error}"),
            SleepError::Clock(error) => write!(f, "clock sequencing failed: {error}"),
            SleepError::RestorePending => {
                f.write_str("deep sleep re-entered before restoring the previous snapshot")
            }
        }
    }
}

pub struct PowerSequencer<'a, C, P, W> {
    clocks: ClockController<C>,
    power: P,
    wake: &'a WakeSourceManager<W>,
    edge: EdgeConfig,
    state: PowerState,
    pending: Option<SleepSnapshot>,
    telemetry: TelemetryRecorder,
}

impl<'a, C, P, W> PowerSequencer<'a, C, P, W>
where
    C: ClockHardware,
    P: PowerControl,
    W: WakeHardware,
{
    /// Builds a sequencer around clocks in the state described by their tree.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPin`] when `wake_pin` is not a bank 0 GPIO.
    pub fn new(
        clocks: ClockController<C>,
        power: P,
        wake: &'a WakeSourceManager<W>,
        wake_pin: u8,
    ) -> Result<Self, ConfigError> {
        let state = PowerState::from_point(clocks.operating_point());
        Ok(Self {
            clocks,
            power,
            wake,
            edge: EdgeConfig::falling(wake_pin)?,
            state,
            pending: None,
            telemetry: TelemetryRecorder::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> PowerState {
        self.state
    }

    #[must_use]
    pub fn clocks(&self) -> &ClockController<C> {
        &self.clocks
    }

    #[must_use]
    pub fn power(&self) -> &P {
        &self.power
    }

    pub fn power_mut(&mut self) -> &mut P {
        &mut self.power
    }

    #[must_use]
    pub fn wake(&self) -> &'a WakeSourceManager<W> {
        self.wake
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// Snapshot waiting to be written back, if deep sleep was entered and not
    /// yet restored.
    #[must_use]
    pub fn pending_snapshot(&self) -> Option<SleepSnapshot> {
        self.pending
    }

    /// Full speed to reduced speed. A no-op when already reduced.
    ///
    /// # Errors
    ///
    /// Fails with [`SleepError::RestorePending`] while a snapshot is
    /// outstanding, or with the clock fault that stopped the plan.
    pub fn begin_low_power<T>(&mut self, transport: &mut T) -> Result<(), SleepError>
    where
        T: DiagnosticTransport,
    {
        if self.pending.is_some() {
            return Err(SleepError::RestorePending);
        }
        self.move_to(OperatingPoint::ReducedSpeed, transport)
    }

    /// Drops to the crystal if needed, arms both wake sources, and halts.
    ///
    /// Returns once the core resumes, still at reduced speed with the
    /// sleep-enable registers narrowed; call [`Self::restore_full_speed`]
    /// next. Arguments are validated before any register is touched.
    ///
    /// # Errors
    ///
    /// Fails with [`SleepError::Config`] for an oversized timeout,
    /// [`SleepError::RestorePending`] if the last sleep was never restored,
    /// or [`SleepError::Clock`] if the reduced-speed plan fails.
    pub fn enter_deep_sleep<T>(
        &mut self,
        watchdog_timeout_ms: u32,
        transport: &mut T,
    ) -> Result<WakeReason, SleepError>
    where
        T: DiagnosticTransport,
    {
        if self.pending.is_some() {
            return Err(SleepError::RestorePending);
        }
        let timeout = WatchdogTimeout::from_millis(watchdog_timeout_ms)?;

        self.move_to(OperatingPoint::ReducedSpeed, transport)?;

        let snapshot = SleepSnapshot {
            mask: self.power.sleep_enable(),
            scr: self.power.sleep_control(),
        };
        self.pending = Some(snapshot);

        self.wake.arm(self.edge.pin, timeout.as_millis())?;

        // The UART loses its clock once the mask is narrowed.
        transport.flush();

        self.power.set_sleep_enable(SleepEnableMask::RTC_ONLY);
        self.power.set_sleep_control(snapshot.scr | SCR_SLEEPDEEP);
        self.state = PowerState::DeepSleep;
        let now = self.power.now_micros();
        self.telemetry.record(
            TelemetryEventKind::SleepEntered,
            TelemetryPayload::Mask(SleepEnableMask::RTC_ONLY),
            now,
        );

        let reason = self.power.wait_for_interrupt();

        self.state = PowerState::ReducedSpeed;
        let now = self.power.now_micros();
        self.telemetry
            .record(TelemetryEventKind::Woke(reason), TelemetryPayload::None, now);
        Ok(reason)
    }

    /// Writes back the pre-sleep snapshot, returns to full speed, and resumes
    /// the transport on the new peripheral clock.
    ///
    /// # Errors
    ///
    /// Returns [`SleepError::Clock`] if the full-speed plan fails. The
    /// snapshot has already been written back by then.
    pub fn restore_full_speed<T>(&mut self, transport: &mut T) -> Result<(), SleepError>
    where
        T: DiagnosticTransport,
    {
        if let Some(snapshot) = self.pending.take() {
            self.power.set_sleep_enable(snapshot.mask);
            self.power.set_sleep_control(snapshot.scr);
            let now = self.power.now_micros();
            self.telemetry.record(
                TelemetryEventKind::SnapshotRestored,
                TelemetryPayload::Mask(snapshot.mask),
                now,
            );
        }
        self.move_to(OperatingPoint::FullSpeed, transport)
    }

    fn move_to<T>(&mut self, point: OperatingPoint, transport: &mut T) -> Result<(), SleepError>
    where
        T: DiagnosticTransport,
    {
        if self.state == PowerState::from_point(point) {
            return Ok(());
        }

        let started_at = self.power.now_micros();
        self.telemetry.record(
            TelemetryEventKind::PlanStarted(point),
            TelemetryPayload::None,
            started_at,
        );

        transport.flush();
        let result = self.clocks.apply(point);
        // Whatever happened, the UART divisor must follow the clock tree.
        transport.resume(self.clocks.frequency(ClockDomain::Peripheral));

        let now = self.power.now_micros();
        match result {
            Ok(()) => {
                self.state = PowerState::from_point(point);
                let sys_hz = self.clocks.frequency(ClockDomain::System);
                self.telemetry
                    .record_plan_completed(point, sys_hz, started_at, now);
                Ok(())
            }
            Err(error) => {
                self.telemetry.record(
                    TelemetryEventKind::PlanFailed(point),
                    TelemetryPayload::Fault(error),
                    now,
                );
                Err(error.into())
            }
        }
    }
}

impl<C, P, W> PowerSequencer<'_, C, P, W>
where
    C: ClockHardware,
    P: PowerControl + RegisterProbe,
    W: WakeHardware,
{
    /// Captures the current frequencies and registers.
    #[must_use]
    pub fn snapshot(&self) -> FrequencySnapshot {
        FrequencySnapshot::capture(self.clocks.tree(), self.state, &self.power)
    }

    /// Prints a frequency report and waits for the transport to drain.
    ///
    /// # Errors
    ///
    /// Propagates the transport's write error.
    pub fn report<T>(&self, transport: &mut T) -> Result<FrequencySnapshot, fmt::Error>
    where
        T: DiagnosticTransport,
    {
        let snapshot = self.snapshot();
        crate::diagnostics::report(&snapshot, transport)?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_only_mask_keeps_just_the_rtc() {
        assert_eq!(SleepEnableMask::RTC_ONLY.en0.count_ones(), 1);
        assert_eq!(SleepEnableMask::RTC_ONLY.en0, 0x0020_0000);
        assert_eq!(SleepEnableMask::RTC_ONLY.en1, 0);
    }

    #[test]
    fn errors_convert_for_question_mark() {
        let config: SleepError = ConfigError::InvalidPin(40).into();
        assert_eq!(config, SleepError::Config(ConfigError::InvalidPin(40)));

        let clock: SleepError = ClockError::InvalidPllConfig.into();
        assert_eq!(clock, SleepError::Clock(ClockError::InvalidPllConfig));
    }

    #[test]
    fn power_state_follows_operating_point() {
        assert_eq!(
            PowerState::from_point(OperatingPoint::ReducedSpeed),
            PowerState::ReducedSpeed
        );
        assert_eq!(
            PowerState::from_point(OperatingPoint::FullSpeed),
            PowerState::FullSpeed
        );
    }
}
