//! PL011 divisor math for re-timing the diagnostic UART after a clock change.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

/// Integer and fractional baud divisors as written to `UARTIBRD`/`UARTFBRD`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BaudDivisors {
    pub integer: u32,
    pub fraction: u32,
}

impl BaudDivisors {
    /// Divisors that best approximate `baud` from a `peripheral_hz` UART clock.
    ///
    /// Results are clamped to the range the hardware accepts.
    pub const fn for_clock(peripheral_hz: u32, baud: u32) -> Self {
        let div = (8 * peripheral_hz as u64 / baud as u64) as u32;
        let integer = div >> 7;
        if integer == 0 {
            Self {
                integer: 1,
                fraction: 0,
            }
        } else if integer >= 0xFFFF {
            Self {
                integer: 0xFFFF,
                fraction: 0,
            }
        } else {
            Self {
                integer,
                fraction: ((div & 0x7F) + 1) / 2,
            }
        }
    }

    /// Baud rate the divisors actually produce.
    #[cfg_attr(target_os = "none", allow(dead_code))]
    pub const fn effective_baud(self, peripheral_hz: u32) -> u32 {
        ((4 * peripheral_hz as u64) / (64 * self.integer as u64 + self.fraction as u64)) as u32
    }
}
