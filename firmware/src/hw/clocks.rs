use embassy_rp::pac;
use embassy_rp::pac::clocks::vals::{
    ClkAdcCtrlAuxsrc, ClkPeriCtrlAuxsrc, ClkRefCtrlSrc, ClkSysCtrlAuxsrc, ClkSysCtrlSrc,
    ClkUsbCtrlAuxsrc,
};
use power_core::clocks::{ClockDomain, ClockHardware, ClockSource, PllConfig, PllId, XOSC_HZ};

/// System cycles to wait after gating an auxiliary mux before switching it.
const AUX_SWITCH_DELAY_CYCLES: u32 = 3 * (125_000_000 / XOSC_HZ + 1);

// One-hot `*_SELECTED` values for the glitchless muxes.
const REF_SELECTED_XOSC: u32 = 1 << 2;
const SYS_SELECTED_REF: u32 = 1 << 0;
const SYS_SELECTED_AUX: u32 = 1 << 1;

/// Clock generator and PLL registers.
pub struct Rp2040Clocks;

impl Rp2040Clocks {
    pub const fn new() -> Self {
        Self
    }
}

fn pll_block(pll: PllId) -> pac::pll::Pll {
    match pll {
        PllId::Sys => pac::PLL_SYS,
        PllId::Usb => pac::PLL_USB,
    }
}

impl ClockHardware for Rp2040Clocks {
    #[allow(clippy::cast_possible_truncation)]
    fn configure_pll(&mut self, pll: PllId, config: &PllConfig) {
        let block = pll_block(pll);
        let fbdiv = config.feedback_divider(XOSC_HZ);

        // Fully powered down before reprogramming.
        block.pwr().write(|w| {
            w.set_pd(true);
            w.set_dsmpd(true);
            w.set_postdivpd(true);
            w.set_vcopd(true);
        });
        block.cs().write(|w| w.set_refdiv(config.refdiv));
        block.fbdiv_int().write(|w| w.set_fbdiv_int(fbdiv as u16));
        block.prim().write(|w| {
            w.set_postdiv1(config.postdiv1);
            w.set_postdiv2(config.postdiv2);
        });
        block.pwr().modify(|w| {
            w.set_pd(false);
            w.set_vcopd(false);
            w.set_postdivpd(false);
        });
        defmt::debug!(
            "{=str} programmed: refdiv={=u8} fbdiv={=u32} postdiv={=u8}/{=u8}",
            pll.label(),
            config.refdiv,
            fbdiv,
            config.postdiv1,
            config.postdiv2
        );
    }

    fn pll_locked(&self, pll: PllId) -> bool {
        pll_block(pll).cs().read().lock()
    }

    fn stop_pll(&mut self, pll: PllId) {
        pll_block(pll).pwr().write(|w| {
            w.set_pd(true);
            w.set_dsmpd(true);
            w.set_postdivpd(true);
            w.set_vcopd(true);
        });
        defmt::debug!("{=str} powered down", pll.label());
    }

    fn route(&mut self, domain: ClockDomain, source: ClockSource, freq_hz: u32) {
        let c = pac::CLOCKS;
        match (domain, source) {
            (ClockDomain::Reference, ClockSource::Crystal) => {
                c.clk_ref_ctrl().modify(|w| w.set_src(ClkRefCtrlSrc::XOSC_CLKSRC));
                while c.clk_ref_selected().read() != REF_SELECTED_XOSC {}
                c.clk_ref_div().write(|w| w.set_int(1));
            }
            (ClockDomain::System, ClockSource::Crystal) => {
                c.clk_sys_ctrl().modify(|w| w.set_src(ClkSysCtrlSrc::CLK_REF));
                while c.clk_sys_selected().read() != SYS_SELECTED_REF {}
                c.clk_sys_div().write(|w| w.set_int(1));
            }
            (ClockDomain::System, ClockSource::Pll(PllId::Sys)) => {
                // The aux mux may only change while the glitchless mux points at clk_ref.
                c.clk_sys_ctrl().modify(|w| w.set_src(ClkSysCtrlSrc::CLK_REF));
                while c.clk_sys_selected().read() != SYS_SELECTED_REF {}
                c.clk_sys_ctrl()
                    .modify(|w| w.set_auxsrc(ClkSysCtrlAuxsrc::CLKSRC_PLL_SYS));
                c.clk_sys_div().write(|w| w.set_int(1));
                c.clk_sys_ctrl()
                    .modify(|w| w.set_src(ClkSysCtrlSrc::CLKSRC_CLK_SYS_AUX));
                while c.clk_sys_selected().read() != SYS_SELECTED_AUX {}
            }
            (ClockDomain::Peripheral, ClockSource::System) => {
                c.clk_peri_ctrl().modify(|w| w.set_enable(false));
                cortex_m::asm::delay(AUX_SWITCH_DELAY_CYCLES);
                c.clk_peri_ctrl().modify(|w| {
                    w.set_auxsrc(ClkPeriCtrlAuxsrc::CLK_SYS);
                    w.set_enable(true);
                });
            }
            (ClockDomain::Usb, ClockSource::Pll(PllId::Usb)) => {
                c.clk_usb_ctrl().modify(|w| w.set_enable(false));
                cortex_m::asm::delay(AUX_SWITCH_DELAY_CYCLES);
                c.clk_usb_div().write(|w| w.set_int(1));
                c.clk_usb_ctrl().modify(|w| {
                    w.set_auxsrc(ClkUsbCtrlAuxsrc::CLKSRC_PLL_USB);
                    w.set_enable(true);
                });
            }
            (ClockDomain::Adc, ClockSource::Pll(PllId::Usb)) => {
                c.clk_adc_ctrl().modify(|w| w.set_enable(false));
                cortex_m::asm::delay(AUX_SWITCH_DELAY_CYCLES);
                c.clk_adc_div().write(|w| w.set_int(1));
                c.clk_adc_ctrl().modify(|w| {
                    w.set_auxsrc(ClkAdcCtrlAuxsrc::CLKSRC_PLL_USB);
                    w.set_enable(true);
                });
            }
            _ => {
                defmt::warn!(
                    "no register sequence for {=str} <- {}",
                    domain.label(),
                    defmt::Display2Format(&source)
                );
                return;
            }
        }
        defmt::debug!("{=str} -> {=u32} Hz", domain.label(), freq_hz);
    }

    fn stop(&mut self, domain: ClockDomain) {
        let c = pac::CLOCKS;
        match domain {
            ClockDomain::Usb => c.clk_usb_ctrl().modify(|w| w.set_enable(false)),
            ClockDomain::Adc => c.clk_adc_ctrl().modify(|w| w.set_enable(false)),
            ClockDomain::Peripheral => c.clk_peri_ctrl().modify(|w| w.set_enable(false)),
            ClockDomain::Reference | ClockDomain::System | ClockDomain::RealTimeClock => {
                defmt::warn!("{=str} has no gate", domain.label());
                return;
            }
        }
        defmt::debug!("{=str} stopped", domain.label());
    }
}
