//! Full-speed plan: both PLLs running, SYSTEM at 125 MHz, USB and ADC at 48 MHz.
//!
//! Each PLL is programmed and confirmed locked before the first domain is
//! pointed at it. PERIPHERAL is re-routed last so its recorded frequency
//! matches the final SYSTEM rate.

use super::{
    ClockDomain, ClockPlan, ClockSource, ClockStep, OperatingPoint, PLL_SYS_125MHZ,
    PLL_USB_48MHZ, PllId,
};

/// SYSTEM frequency at full speed.
pub const FULL_SPEED_SYS_HZ: u32 = PLL_SYS_125MHZ.output_hz();
/// USB and ADC frequency at full speed.
pub const FULL_SPEED_USB_HZ: u32 = PLL_USB_48MHZ.output_hz();

/// Ordered steps that bring the chip back to full speed.
pub const FULL_SPEED_STEPS: [ClockStep; 8] = [
    ClockStep::StartPll {
        pll: PllId::Sys,
        config: PLL_SYS_125MHZ,
    },
    ClockStep::AwaitLock { pll: PllId::Sys },
    ClockStep::route(
        ClockDomain::System,
        ClockSource::Pll(PllId::Sys),
        FULL_SPEED_SYS_HZ,
    ),
    ClockStep::StartPll {
        pll: PllId::Usb,
        config: PLL_USB_48MHZ,
    },
    ClockStep::AwaitLock { pll: PllId::Usb },
    ClockStep::route(
        ClockDomain::Usb,
        ClockSource::Pll(PllId::Usb),
        FULL_SPEED_USB_HZ,
    ),
    ClockStep::route(
        ClockDomain::Adc,
        ClockSource::Pll(PllId::Usb),
        FULL_SPEED_USB_HZ,
    ),
    ClockStep::route(
        ClockDomain::Peripheral,
        ClockSource::System,
        FULL_SPEED_SYS_HZ,
    ),
];

pub const FULL_SPEED_PLAN: ClockPlan =
    ClockPlan::new(OperatingPoint::FullSpeed, &FULL_SPEED_STEPS);

/// Returns the shared full-speed plan.
#[must_use]
pub const fn full_speed_plan() -> ClockPlan {
    FULL_SPEED_PLAN
}
