//! Reduced-speed plan: everything on the crystal, both PLLs powered down.

use super::{ClockDomain, ClockPlan, ClockSource, ClockStep, OperatingPoint, PllId, XOSC_HZ};

/// SYSTEM frequency once the PLLs are bypassed.
pub const REDUCED_SPEED_SYS_HZ: u32 = XOSC_HZ;

/// Ordered steps that drop the chip onto the crystal.
pub const REDUCED_SPEED_STEPS: [ClockStep; 7] = [
    ClockStep::route(ClockDomain::Reference, ClockSource::Crystal, XOSC_HZ),
    // Reparent SYSTEM before the SYS PLL goes away.
    ClockStep::route(ClockDomain::System, ClockSource::Crystal, REDUCED_SPEED_SYS_HZ),
    ClockStep::StopPll { pll: PllId::Sys },
    ClockStep::StopDomain {
        domain: ClockDomain::Usb,
    },
    ClockStep::StopDomain {
        domain: ClockDomain::Adc,
    },
    ClockStep::StopPll { pll: PllId::Usb },
    ClockStep::route(
        ClockDomain::Peripheral,
        ClockSource::System,
        REDUCED_SPEED_SYS_HZ,
    ),
];

pub const REDUCED_SPEED_PLAN: ClockPlan =
    ClockPlan::new(OperatingPoint::ReducedSpeed, &REDUCED_SPEED_STEPS);

/// Returns the shared reduced-speed plan.
#[must_use]
pub const fn reduced_speed_plan() -> ClockPlan {
    REDUCED_SPEED_PLAN
}
