//! Model of the live clock routing used to validate plan steps.

use super::{
    ClockDomain, ClockError, ClockSource, ClockStep, MHZ, OperatingPoint, PLL_SYS_125MHZ,
    PLL_USB_48MHZ, PllId, RTC_HZ, XOSC_HZ,
};

/// Source and frequency currently feeding one domain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DomainState {
    pub source: ClockSource,
    pub freq_hz: u32,
}

impl DomainState {
    #[must_use]
    pub const fn new(source: ClockSource, freq_hz: u32) -> Self {
        Self { source, freq_hz }
    }

    #[must_use]
    pub const fn stopped() -> Self {
        Self::new(ClockSource::Stopped, 0)
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self.source, ClockSource::Stopped)
    }
}

/// Power and lock state of a PLL.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PllState {
    Stopped,
    /// Powered and programmed, lock not yet confirmed.
    Starting { output_hz: u32 },
    Locked { output_hz: u32 },
}

impl PllState {
    #[must_use]
    pub const fn is_locked(self) -> bool {
        matches!(self, PllState::Locked { .. })
    }

    #[must_use]
    pub const fn output_hz(self) -> Option<u32> {
        match self {
            PllState::Stopped => None,
            PllState::Starting { output_hz } | PllState::Locked { output_hz } => Some(output_hz),
        }
    }
}

/// Snapshot of every domain and PLL the plans touch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockTree {
    domains: [DomainState; 6],
    plls: [PllState; 2],
    point: OperatingPoint,
}

impl ClockTree {
    /// Routing the chip boots into: both PLLs locked, SYSTEM at 125 MHz.
    #[must_use]
    pub const fn full_speed() -> Self {
        let sys_hz = PLL_SYS_125MHZ.output_hz();
        let usb_hz = PLL_USB_48MHZ.output_hz();
        Self {
            domains: [
                DomainState::new(ClockSource::Crystal, XOSC_HZ),
                DomainState::new(ClockSource::Pll(PllId::Sys), sys_hz),
                DomainState::new(ClockSource::System, sys_hz),
                DomainState::new(ClockSource::Pll(PllId::Usb), usb_hz),
                DomainState::new(ClockSource::Pll(PllId::Usb), usb_hz),
                DomainState::new(ClockSource::Crystal, RTC_HZ),
            ],
            plls: [
                PllState::Locked { output_hz: sys_hz },
                PllState::Locked { output_hz: usb_hz },
            ],
            point: OperatingPoint::FullSpeed,
        }
    }

    #[must_use]
    pub const fn domain(&self, domain: ClockDomain) -> DomainState {
        self.domains[domain.as_index()]
    }

    #[must_use]
    pub const fn source(&self, domain: ClockDomain) -> ClockSource {
        self.domains[domain.as_index()].source
    }

    #[must_use]
    pub const fn frequency(&self, domain: ClockDomain) -> u32 {
        self.domains[domain.as_index()].freq_hz
    }

    #[must_use]
    pub const fn pll(&self, pll: PllId) -> PllState {
        self.plls[pll.as_index()]
    }

    #[must_use]
    pub const fn operating_point(&self) -> OperatingPoint {
        self.point
    }

    /// First domain still fed by `pll`, if any.
    #[must_use]
    pub fn first_dependent(&self, pll: PllId) -> Option<ClockDomain> {
        ClockDomain::ALL
            .into_iter()
            .find(|domain| self.source(*domain).is_pll(pll))
    }

    /// Validates that `step` can run from the current routing.
    ///
    /// # Errors
    ///
    /// Returns the [`ClockError`] describing why the step would glitch or
    /// break a fixed parent.
    pub fn check(&self, step: &ClockStep) -> Result<(), ClockError> {
        match *step {
            ClockStep::StartPll { pll, .. } => match self.first_dependent(pll) {
                Some(dependent) => Err(ClockError::OrderingViolation { pll, dependent }),
                None => Ok(()),
            },
            ClockStep::AwaitLock { pll } => match self.pll(pll) {
                PllState::Stopped => Err(ClockError::PllNotRunning(pll)),
                _ => Ok(()),
            },
            ClockStep::Route {
                domain,
                source,
                freq_hz,
            } => self.check_route(domain, source, freq_hz),
            ClockStep::StopDomain { domain } => match domain {
                ClockDomain::Reference | ClockDomain::System | ClockDomain::RealTimeClock => {
                    Err(ClockError::InvalidRoute {
                        domain,
                        source: ClockSource::Stopped,
                    })
                }
                _ => Ok(()),
            },
            ClockStep::StopPll { pll } => match self.first_dependent(pll) {
                Some(dependent) => Err(ClockError::OrderingViolation { pll, dependent }),
                None => Ok(()),
            },
        }
    }

    fn check_route(
        &self,
        domain: ClockDomain,
        source: ClockSource,
        freq_hz: u32,
    ) -> Result<(), ClockError> {
        let invalid = Err(ClockError::InvalidRoute { domain, source });

        let parent_ok = match domain {
            ClockDomain::Reference | ClockDomain::RealTimeClock => {
                matches!(source, ClockSource::Crystal)
            }
            ClockDomain::Peripheral => matches!(source, ClockSource::System),
            ClockDomain::System => matches!(source, ClockSource::Crystal | ClockSource::Pll(_)),
            ClockDomain::Usb | ClockDomain::Adc => matches!(source, ClockSource::Pll(_)),
        };
        if !parent_ok {
            return invalid;
        }

        match source {
            ClockSource::Crystal if freq_hz == 0 || freq_hz > XOSC_HZ => invalid,
            ClockSource::Crystal => Ok(()),
            ClockSource::Pll(pll) => match self.pll(pll) {
                PllState::Locked { output_hz } if output_hz == freq_hz => Ok(()),
                PllState::Locked { .. } => invalid,
                PllState::Starting { .. } | PllState::Stopped => {
                    Err(ClockError::SourceUnstable { domain, pll })
                }
            },
            ClockSource::System if freq_hz == self.frequency(ClockDomain::System) => Ok(()),
            ClockSource::System | ClockSource::Stopped => invalid,
        }
    }

    /// Records the effect of `step`. Callers check it first.
    pub(crate) fn commit(&mut self, step: &ClockStep) {
        match *step {
            ClockStep::StartPll { pll, config } => {
                self.plls[pll.as_index()] = PllState::Starting {
                    output_hz: config.output_hz(),
                };
            }
            ClockStep::AwaitLock { pll } => self.mark_locked(pll),
            ClockStep::Route {
                domain,
                source,
                freq_hz,
            } => {
                self.domains[domain.as_index()] = DomainState::new(source, freq_hz);
                if matches!(domain, ClockDomain::System) {
                    for state in &mut self.domains {
                        if matches!(state.source, ClockSource::System) {
                            state.freq_hz = freq_hz;
                        }
                    }
                }
            }
            ClockStep::StopDomain { domain } => {
                self.domains[domain.as_index()] = DomainState::stopped();
            }
            ClockStep::StopPll { pll } => self.plls[pll.as_index()] = PllState::Stopped,
        }
    }

    pub(crate) fn mark_locked(&mut self, pll: PllId) {
        if let PllState::Starting { output_hz } = self.plls[pll.as_index()] {
            self.plls[pll.as_index()] = PllState::Locked { output_hz };
        }
    }

    pub(crate) fn set_operating_point(&mut self, point: OperatingPoint) {
        self.point = point;
    }

    /// Returns `true` when every domain that should run is clocked and
    /// PERIPHERAL tracks SYSTEM.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let peri = self.domain(ClockDomain::Peripheral);
        let sys_hz = self.frequency(ClockDomain::System);
        matches!(peri.source, ClockSource::System)
            && peri.freq_hz == sys_hz
            && sys_hz >= MHZ
            && !self.domain(ClockDomain::RealTimeClock).is_stopped()
    }
}

impl Default for ClockTree {
    fn default() -> Self {
        Self::full_speed()
    }
}
