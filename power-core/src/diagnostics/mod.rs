//! Read-only frequency and register reporting.
//!
//! Nothing here feeds back into control decisions. Reports are written to a
//! [`DiagnosticTransport`] and the transport is drained before returning,
//! because the caller may reconfigure the clock the transport runs from.

use core::fmt::{self, Write};

use crate::clocks::{ClockDomain, ClockTree, MHZ};
use crate::sequencer::{PowerControl, PowerState, SleepEnableMask};

/// Lowest regulator output the selector can encode.
pub const VREG_FLOOR_MV: u16 = 800;

/// Text sink for the human-readable status stream.
pub trait DiagnosticTransport: Write {
    /// Blocks until every queued byte has left the wire.
    fn flush(&mut self);

    /// Re-derives bit timing after the peripheral clock moved to `peripheral_hz`.
    fn resume(&mut self, peripheral_hz: u32);
}

/// Registers only read for reporting.
pub trait RegisterProbe {
    fn wake_enable(&self) -> WakeEnableMask;

    /// Raw `VREG` register of the regulator block.
    fn vreg_raw(&self) -> u32;
}

/// The two `WAKE_ENx` words.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WakeEnableMask {
    pub en0: u32,
    pub en1: u32,
}

impl WakeEnableMask {
    pub const RESET: Self = Self {
        en0: 0xFFFF_FFFF,
        en1: 0x0000_7FFF,
    };
}

/// Converts the 4-bit `VSEL` field of the raw regulator register to millivolts.
///
/// Selectors 6 and up map linearly from 850 mV in 50 mV steps; everything
/// below 6 is the 800 mV floor.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub const fn vreg_millivolts(raw: u32) -> u16 {
    let vsel = ((raw >> 4) & 0x0F) as u16;
    if vsel < 6 {
        VREG_FLOOR_MV
    } else {
        850 + (vsel - 6) * 50
    }
}

/// Why the chip last came out of reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetCause {
    Clean,
    Watchdog,
}

impl ResetCause {
    #[must_use]
    pub const fn from_watchdog_flag(caused_by_watchdog: bool) -> Self {
        if caused_by_watchdog {
            ResetCause::Watchdog
        } else {
            ResetCause::Clean
        }
    }
}

/// Prints the start-up banner.
///
/// # Errors
///
/// Propagates the transport's write error.
pub fn write_boot_banner<T>(transport: &mut T, cause: ResetCause) -> fmt::Result
where
    T: DiagnosticTransport,
{
    transport.write_str("\n\n\nStartup!\n")?;
    match cause {
        ResetCause::Watchdog => transport.write_str("Rebooted by Watchdog!\n")?,
        ResetCause::Clean => transport.write_str("Clean boot\n")?,
    }
    transport.flush();
    Ok(())
}

/// Point-in-time view of every clock domain and the sleep registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrequencySnapshot {
    pub state: PowerState,
    frequencies: [u32; 6],
    pub sleep: SleepEnableMask,
    pub wake: WakeEnableMask,
    pub vreg_mv: u16,
}

impl FrequencySnapshot {
    #[must_use]
    pub fn capture<R>(tree: &ClockTree, state: PowerState, chip: &R) -> Self
    where
        R: PowerControl + RegisterProbe,
    {
        let mut frequencies = [0; 6];
        for domain in ClockDomain::ALL {
            frequencies[domain.as_index()] = tree.frequency(domain);
        }
        Self {
            state,
            frequencies,
            sleep: chip.sleep_enable(),
            wake: chip.wake_enable(),
            vreg_mv: vreg_millivolts(chip.vreg_raw()),
        }
    }

    #[must_use]
    pub const fn frequency(&self, domain: ClockDomain) -> u32 {
        self.frequencies[domain.as_index()]
    }
}

impl fmt::Display for FrequencySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for domain in ClockDomain::ALL {
            let hz = self.frequency(domain);
            if matches!(domain, ClockDomain::RealTimeClock) {
                writeln!(f, "{domain} frequency: {hz} Hz")?;
            } else {
                writeln!(f, "{domain} frequency: {} MHz", hz / MHZ)?;
            }
        }
        writeln!(f, "Current VREG: {} mV", self.vreg_mv)?;
        writeln!(f, "sleep_en0: 0x{:X}", self.sleep.en0)?;
        writeln!(f, "sleep_en1: 0x{:X}", self.sleep.en1)?;
        writeln!(f, "wake_en0: 0x{:X}", self.wake.en0)?;
        writeln!(f, "wake_en1: 0x{:X}", self.wake.en1)
    }
}

/// Writes `snapshot` followed by a blank line, then drains the transport.
///
/// # Errors
///
/// Propagates the transport's write error.
pub fn report<T>(snapshot: &FrequencySnapshot, transport: &mut T) -> fmt::Result
where
    T: DiagnosticTransport,
{
    write!(transport, "{snapshot}")?;
    transport.write_char('\n')?;
    transport.flush();
    Ok(())
}
