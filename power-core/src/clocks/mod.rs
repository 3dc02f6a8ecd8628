//! Clock domain data structures shared by firmware and host targets.
//!
//! Each operating point is described as an ordered, immutable list of
//! [`ClockStep`]s. The [`ClockController`] walks that list, validating every
//! step against a [`ClockTree`] model before it touches hardware, so a plan
//! that tears down a PLL while a domain still depends on it is rejected
//! instead of glitching the chip.

use core::fmt;

pub mod full_speed;
pub mod reduced_speed;
mod tree;

pub use full_speed::{FULL_SPEED_PLAN, full_speed_plan};
pub use reduced_speed::{REDUCED_SPEED_PLAN, reduced_speed_plan};
pub use tree::{ClockTree, DomainState, PllState};

/// One megahertz, in hertz.
pub const MHZ: u32 = 1_000_000;

/// Frequency of the external crystal oscillator on the Pico board.
pub const XOSC_HZ: u32 = 12 * MHZ;

/// Real-time clock rate (crystal divided by 256). No plan ever changes it.
pub const RTC_HZ: u32 = 46_875;

/// Number of times [`ClockStep::AwaitLock`] samples the lock flag before giving up.
pub const PLL_LOCK_POLL_LIMIT: u32 = 100_000;

/// Clock domains that the plans reconfigure or report on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockDomain {
    Reference,
    System,
    Peripheral,
    Usb,
    Adc,
    RealTimeClock,
}

impl ClockDomain {
    /// Every domain in reporting order.
    pub const ALL: [ClockDomain; 6] = [
        ClockDomain::Reference,
        ClockDomain::System,
        ClockDomain::RealTimeClock,
        ClockDomain::Peripheral,
        ClockDomain::Usb,
        ClockDomain::Adc,
    ];

    /// Deterministic index for lookups into per-domain tables.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            ClockDomain::Reference => 0,
            ClockDomain::System => 1,
            ClockDomain::Peripheral => 2,
            ClockDomain::Usb => 3,
            ClockDomain::Adc => 4,
            ClockDomain::RealTimeClock => 5,
        }
    }

    /// Register-style label used in diagnostics output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ClockDomain::Reference => "clk_ref",
            ClockDomain::System => "clk_sys",
            ClockDomain::Peripheral => "clk_peri",
            ClockDomain::Usb => "clk_usb",
            ClockDomain::Adc => "clk_adc",
            ClockDomain::RealTimeClock => "clk_rtc",
        }
    }
}

impl fmt::Display for ClockDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The two phase-locked loops on the chip.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PllId {
    Sys,
    Usb,
}

impl PllId {
    pub const ALL: [PllId; 2] = [PllId::Sys, PllId::Usb];

    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            PllId::Sys => 0,
            PllId::Usb => 1,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            PllId::Sys => "pll_sys",
            PllId::Usb => "pll_usb",
        }
    }
}

impl fmt::Display for PllId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a clock domain takes its input from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockSource {
    Crystal,
    Pll(PllId),
    /// Follows the SYSTEM domain with no divider.
    System,
    Stopped,
}

impl ClockSource {
    /// Returns `true` when this source is the output of `pll`.
    #[must_use]
    pub const fn is_pll(self, pll: PllId) -> bool {
        matches!(self, ClockSource::Pll(p) if p.as_index() == pll.as_index())
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockSource::Crystal => f.write_str("xosc"),
            ClockSource::Pll(pll) => write!(f, "{pll}"),
            ClockSource::System => f.write_str("clk_sys"),
            ClockSource::Stopped => f.write_str("stopped"),
        }
    }
}

/// Discrete run-time operating points.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperatingPoint {
    FullSpeed,
    ReducedSpeed,
}

impl fmt::Display for OperatingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingPoint::FullSpeed => f.write_str("full-speed"),
            OperatingPoint::ReducedSpeed => f.write_str("reduced-speed"),
        }
    }
}

/// Divider settings for one PLL.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PllConfig {
    pub refdiv: u8,
    pub vco_hz: u32,
    pub postdiv1: u8,
    pub postdiv2: u8,
}

impl PllConfig {
    pub const VCO_MIN_HZ: u32 = 400 * MHZ;
    pub const VCO_MAX_HZ: u32 = 1_600 * MHZ;
    pub const FBDIV_MIN: u32 = 16;
    pub const FBDIV_MAX: u32 = 320;
    pub const POSTDIV_MAX: u8 = 7;

    #[must_use]
    pub const fn new(refdiv: u8, vco_hz: u32, postdiv1: u8, postdiv2: u8) -> Self {
        Self {
            refdiv,
            vco_hz,
            postdiv1,
            postdiv2,
        }
    }

    /// Frequency leaving the post dividers.
    #[must_use]
    pub const fn output_hz(&self) -> u32 {
        self.vco_hz / (self.postdiv1 as u32 * self.postdiv2 as u32)
    }

    /// Feedback divider needed to reach the VCO target from `reference_hz`.
    #[must_use]
    pub const fn feedback_divider(&self, reference_hz: u32) -> u32 {
        self.vco_hz / (reference_hz / self.refdiv as u32)
    }

    /// Checks the settings against the PLL's documented operating range.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidPllConfig`] for out-of-range dividers or a
    /// VCO target the feedback divider cannot reach.
    pub fn validate(&self, reference_hz: u32) -> Result<(), ClockError> {
        let postdivs_ok = (1..=Self::POSTDIV_MAX).contains(&self.postdiv1)
            && (1..=Self::POSTDIV_MAX).contains(&self.postdiv2)
            && self.postdiv1 >= self.postdiv2;
        if self.refdiv == 0 || !postdivs_ok {
            return Err(ClockError::InvalidPllConfig);
        }
        if !(Self::VCO_MIN_HZ..=Self::VCO_MAX_HZ).contains(&self.vco_hz) {
            return Err(ClockError::InvalidPllConfig);
        }

        let step_hz = reference_hz / u32::from(self.refdiv);
        if step_hz == 0 || self.vco_hz % step_hz != 0 {
            return Err(ClockError::InvalidPllConfig);
        }
        let fbdiv = self.vco_hz / step_hz;
        if !(Self::FBDIV_MIN..=Self::FBDIV_MAX).contains(&fbdiv) {
            return Err(ClockError::InvalidPllConfig);
        }
        Ok(())
    }
}

/// System PLL settings: 12 MHz / 1 * 125 = 1500 MHz, / 6 / 2 = 125 MHz.
pub const PLL_SYS_125MHZ: PllConfig = PllConfig::new(1, 1_500 * MHZ, 6, 2);

/// USB PLL settings: 12 MHz / 1 * 40 = 480 MHz, / 5 / 2 = 48 MHz.
pub const PLL_USB_48MHZ: PllConfig = PllConfig::new(1, 480 * MHZ, 5, 2);

/// A single, named reconfiguration applied in order by a [`ClockPlan`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockStep {
    /// Power up and program a PLL. Its output is not trustworthy until locked.
    StartPll { pll: PllId, config: PllConfig },
    /// Spin until the PLL reports lock.
    AwaitLock { pll: PllId },
    /// Point a domain at a new source, producing `freq_hz`.
    Route {
        domain: ClockDomain,
        source: ClockSource,
        freq_hz: u32,
    },
    /// Gate a domain entirely.
    StopDomain { domain: ClockDomain },
    /// Power down a PLL. Every dependent domain must already be reparented.
    StopPll { pll: PllId },
}

impl ClockStep {
    #[must_use]
    pub const fn route(domain: ClockDomain, source: ClockSource, freq_hz: u32) -> Self {
        ClockStep::Route {
            domain,
            source,
            freq_hz,
        }
    }
}

/// Immutable step list that moves the chip to one operating point.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockPlan {
    pub target: OperatingPoint,
    pub steps: &'static [ClockStep],
}

impl ClockPlan {
    #[must_use]
    pub const fn new(target: OperatingPoint, steps: &'static [ClockStep]) -> Self {
        Self { target, steps }
    }

    /// Returns the plan that reaches `target`.
    #[must_use]
    pub const fn for_point(target: OperatingPoint) -> Self {
        match target {
            OperatingPoint::FullSpeed => FULL_SPEED_PLAN,
            OperatingPoint::ReducedSpeed => REDUCED_SPEED_PLAN,
        }
    }

    #[must_use]
    pub const fn steps(&self) -> &'static [ClockStep] {
        self.steps
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Runs the plan against a copy of `tree` without touching hardware.
    ///
    /// Lock waits are assumed to succeed; everything else is checked exactly
    /// as [`ClockController::apply`] would.
    ///
    /// # Errors
    ///
    /// Returns the first step the model rejects, including PLL dividers that
    /// fail [`PllConfig::validate`].
    pub fn dry_run(&self, tree: &ClockTree) -> Result<ClockTree, ClockError> {
        let mut model = *tree;
        for step in self.steps {
            model.check(step)?;
            match *step {
                ClockStep::StartPll { config, .. } => {
                    config.validate(model.frequency(ClockDomain::Reference))?;
                    model.commit(step);
                }
                ClockStep::AwaitLock { pll } => model.mark_locked(pll),
                _ => model.commit(step),
            }
        }
        model.set_operating_point(self.target);
        Ok(model)
    }
}

/// Failures surfaced while reconfiguring clocks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockError {
    /// A domain was switched onto a PLL that had not reported lock.
    SourceUnstable { domain: ClockDomain, pll: PllId },
    /// A PLL was about to be torn down while `dependent` still used it.
    OrderingViolation { pll: PllId, dependent: ClockDomain },
    /// The route breaks a fixed parent relationship.
    InvalidRoute {
        domain: ClockDomain,
        source: ClockSource,
    },
    /// A lock wait was requested for a PLL that was never started.
    PllNotRunning(PllId),
    /// PLL dividers fall outside the supported range.
    InvalidPllConfig,
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::SourceUnstable { domain, pll } => {
                write!(f, "{domain} switched onto {pll} before lock")
            }
            ClockError::OrderingViolation { pll, dependent } => {
                write!(f, "{pll} stopped while {dependent} still depends on it")
            }
            ClockError::InvalidRoute { domain, source } => {
                write!(f, "{domain} cannot be routed to {source}")
            }
            ClockError::PllNotRunning(pll) => write!(f, "{pll} is not running"),
            ClockError::InvalidPllConfig => f.write_str("pll dividers out of range"),
        }
    }
}

/// Abstraction over the clock generator registers.
pub trait ClockHardware {
    /// Powers up `pll` with the provided dividers.
    fn configure_pll(&mut self, pll: PllId, config: &PllConfig);

    /// Reports whether `pll` has achieved lock.
    fn pll_locked(&self, pll: PllId) -> bool;

    /// Powers `pll` down completely.
    fn stop_pll(&mut self, pll: PllId);

    /// Selects `source` for `domain`, enabling the domain if it was stopped.
    fn route(&mut self, domain: ClockDomain, source: ClockSource, freq_hz: u32);

    /// Gates `domain`.
    fn stop(&mut self, domain: ClockDomain);
}

/// Owns the clock hardware and the model of its current routing.
pub struct ClockController<H> {
    hardware: H,
    tree: ClockTree,
}

impl<H> ClockController<H>
where
    H: ClockHardware,
{
    /// Wraps hardware that is currently configured as described by `tree`.
    #[must_use]
    pub const fn new(hardware: H, tree: ClockTree) -> Self {
        Self { hardware, tree }
    }

    /// Wraps hardware that booted into the full-speed configuration.
    #[must_use]
    pub const fn from_boot(hardware: H) -> Self {
        Self::new(hardware, ClockTree::full_speed())
    }

    #[must_use]
    pub fn tree(&self) -> &ClockTree {
        &self.tree
    }

    #[must_use]
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    #[must_use]
    pub fn operating_point(&self) -> OperatingPoint {
        self.tree.operating_point()
    }

    #[must_use]
    pub fn frequency(&self, domain: ClockDomain) -> u32 {
        self.tree.frequency(domain)
    }

    /// Moves the hardware to `target`, one validated step at a time.
    ///
    /// A failure part-way through leaves the hardware in the state reached by
    /// the last successful step; the model tracks that state exactly. Asking
    /// for the point the tree already settled at writes nothing.
    ///
    /// # Errors
    ///
    /// Returns the first step the model rejects, or
    /// [`ClockError::SourceUnstable`] when a PLL never reports lock.
    pub fn apply(&mut self, target: OperatingPoint) -> Result<(), ClockError> {
        if self.is_settled_at(target) {
            return Ok(());
        }
        let steps = ClockPlan::for_point(target).steps();
        for (index, step) in steps.iter().enumerate() {
            self.tree.check(step)?;
            match *step {
                ClockStep::StartPll { pll, config } => {
                    config.validate(self.tree.frequency(ClockDomain::Reference))?;
                    self.hardware.configure_pll(pll, &config);
                    self.tree.commit(step);
                }
                ClockStep::AwaitLock { pll } => {
                    if !self.await_lock(pll) {
                        let domain = next_consumer(&steps[index + 1..], pll)
                            .unwrap_or(ClockDomain::System);
                        return Err(ClockError::SourceUnstable { domain, pll });
                    }
                    self.tree.mark_locked(pll);
                }
                ClockStep::Route {
                    domain,
                    source,
                    freq_hz,
                } => {
                    self.hardware.route(domain, source, freq_hz);
                    self.tree.commit(step);
                }
                ClockStep::StopDomain { domain } => {
                    self.hardware.stop(domain);
                    self.tree.commit(step);
                }
                ClockStep::StopPll { pll } => {
                    self.hardware.stop_pll(pll);
                    self.tree.commit(step);
                }
            }
        }
        self.tree.set_operating_point(target);
        Ok(())
    }

    /// `true` when the tree is exactly where a completed plan for `target` leaves it.
    fn is_settled_at(&self, target: OperatingPoint) -> bool {
        let settled = match target {
            OperatingPoint::FullSpeed => Ok(ClockTree::full_speed()),
            OperatingPoint::ReducedSpeed => {
                ClockPlan::for_point(target).dry_run(&ClockTree::full_speed())
            }
        };
        settled.is_ok_and(|tree| tree == self.tree)
    }

    fn await_lock(&self, pll: PllId) -> bool {
        for _ in 0..PLL_LOCK_POLL_LIMIT {
            if self.hardware.pll_locked(pll) {
                return true;
            }
            core::hint::spin_loop();
        }
        false
    }
}

/// First domain in `steps` that will be routed onto `pll`.
fn next_consumer(steps: &[ClockStep], pll: PllId) -> Option<ClockDomain> {
    steps.iter().find_map(|step| match *step {
        ClockStep::Route { domain, source, .. } if source.is_pll(pll) => Some(domain),
        _ => None,
    })
}
