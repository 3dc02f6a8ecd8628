use cortex_m::peripheral::SCB;
use embassy_rp::pac;
use embassy_rp::pac::clocks::regs::{SleepEn0, SleepEn1};
use embassy_time::Instant;
use power_core::diagnostics::{RegisterProbe, WakeEnableMask};
use power_core::sequencer::{PowerControl, SleepEnableMask, WakeReason};

/// Sleep-enable registers, the Cortex-M0+ SCR, and the regulator.
pub struct Rp2040Power {
    wake_pin: u8,
}

impl Rp2040Power {
    pub const fn new(wake_pin: u8) -> Self {
        Self { wake_pin }
    }

    fn edge_latched(&self) -> bool {
        let group = usize::from(self.wake_pin / 8);
        let bit = usize::from(self.wake_pin % 8);
        pac::IO_BANK0.intr(group).read().edge_low(bit)
    }
}

impl PowerControl for Rp2040Power {
    fn sleep_enable(&self) -> SleepEnableMask {
        let c = pac::CLOCKS;
        SleepEnableMask::new(c.sleep_en0().read().0, c.sleep_en1().read().0)
    }

    fn set_sleep_enable(&mut self, mask: SleepEnableMask) {
        let c = pac::CLOCKS;
        c.sleep_en0().write_value(SleepEn0(mask.en0));
        c.sleep_en1().write_value(SleepEn1(mask.en1));
    }

    fn sleep_control(&self) -> u32 {
        // SAFETY: plain word read of a core register.
        unsafe { (*SCB::PTR).scr.read() }
    }

    fn set_sleep_control(&mut self, scr: u32) {
        // SAFETY: only the foreground sequencer writes SCR.
        unsafe { (*SCB::PTR).scr.write(scr) }
    }

    fn wait_for_interrupt(&mut self) -> WakeReason {
        cortex_m::asm::dsb();
        cortex_m::asm::wfi();
        if self.edge_latched() {
            WakeReason::Edge
        } else {
            WakeReason::Interrupt
        }
    }

    fn now_micros(&self) -> u64 {
        Instant::now().as_micros()
    }
}

impl RegisterProbe for Rp2040Power {
    fn wake_enable(&self) -> WakeEnableMask {
        let c = pac::CLOCKS;
        WakeEnableMask {
            en0: c.wake_en0().read().0,
            en1: c.wake_en1().read().0,
        }
    }

    fn vreg_raw(&self) -> u32 {
        pac::VREG_AND_CHIP_RESET.vreg().read().0
    }
}
