//! Simulated RP2040 with a virtual microsecond clock.
//!
//! All register state lives in one shared [`Board`]; the clock, power, and
//! wake views hold an `Rc` to it so the sequencer can own two of them while
//! the wake manager owns the third.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use power_core::clocks::{ClockDomain, ClockHardware, ClockSource, PllConfig, PllId};
use power_core::diagnostics::{RegisterProbe, WakeEnableMask};
use power_core::sequencer::{PowerControl, SleepEnableMask, WakeReason};
use power_core::wake::{EdgeConfig, WakeHardware, WakeSourceManager, WatchdogTimeout};

/// Time from PLL power-up to lock.
pub const PLL_LOCK_US: u64 = 60;
/// Regulator register as left by the boot ROM: VSEL 11, 1.10 V.
pub const VREG_RESET_RAW: u32 = 0xB1;
/// Contact bounce following each scripted press, relative to the first edge.
pub const BOUNCE_OFFSETS_US: [u64; 3] = [800, 2_500, 11_000];

pub struct Board {
    now_us: Cell<u64>,
    lock_at: [Cell<Option<u64>>; 2],
    sleep_enable: Cell<SleepEnableMask>,
    scr: Cell<u32>,
    watchdog_timeout_us: Cell<Option<u64>>,
    watchdog_deadline: Cell<Option<u64>>,
    edge_enabled: Cell<bool>,
    edge_latched: Cell<bool>,
    edges: RefCell<VecDeque<u64>>,
    peri_hz: Cell<u32>,
}

impl Board {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            now_us: Cell::new(0),
            lock_at: [Cell::new(None), Cell::new(None)],
            sleep_enable: Cell::new(SleepEnableMask::RESET),
            scr: Cell::new(0),
            watchdog_timeout_us: Cell::new(None),
            watchdog_deadline: Cell::new(None),
            edge_enabled: Cell::new(false),
            edge_latched: Cell::new(false),
            edges: RefCell::new(VecDeque::new()),
            peri_hz: Cell::new(0),
        })
    }

    pub fn now_us(&self) -> u64 {
        self.now_us.get()
    }

    fn tick(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
    }

    /// Moves the virtual clock forward to `at_us`.
    ///
    /// Returns `false`, with the clock stopped at the deadline, if the
    /// watchdog expires first.
    pub fn advance_to(&self, at_us: u64) -> bool {
        match self.watchdog_deadline.get() {
            Some(deadline) if deadline <= at_us => {
                self.now_us.set(deadline.max(self.now_us.get()));
                false
            }
            _ => {
                self.now_us.set(at_us.max(self.now_us.get()));
                true
            }
        }
    }

    /// Schedules a single falling edge on the wake pin.
    pub fn schedule_edge(&self, at_us: u64) {
        let mut edges = self.edges.borrow_mut();
        let index = edges.partition_point(|&queued| queued <= at_us);
        edges.insert(index, at_us);
    }

    /// Schedules a button press: one clean edge followed by its bounce.
    pub fn press(&self, at_us: u64) {
        self.schedule_edge(at_us);
        for offset in BOUNCE_OFFSETS_US {
            self.schedule_edge(at_us + offset);
        }
    }

    /// Pops the next scripted edge if it falls at or before `until_us`.
    pub fn take_edge_before(&self, until_us: u64) -> Option<u64> {
        let mut edges = self.edges.borrow_mut();
        match edges.front() {
            Some(&at) if at <= until_us => edges.pop_front(),
            _ => None,
        }
    }

    pub fn watchdog_deadline(&self) -> Option<u64> {
        self.watchdog_deadline.get()
    }

    #[cfg(test)]
    pub fn edge_latched(&self) -> bool {
        self.edge_latched.get()
    }

    /// Peripheral clock the UART was last retimed for.
    pub fn peripheral_hz(&self) -> u32 {
        self.peri_hz.get()
    }

    pub fn set_peripheral_hz(&self, hz: u32) {
        self.peri_hz.set(hz);
    }

    /// Power-on reset: registers go back to their defaults, time and the
    /// remaining script carry on.
    pub fn reset(&self) {
        for lock in &self.lock_at {
            lock.set(None);
        }
        self.sleep_enable.set(SleepEnableMask::RESET);
        self.scr.set(0);
        self.watchdog_timeout_us.set(None);
        self.watchdog_deadline.set(None);
        self.edge_enabled.set(false);
        self.edge_latched.set(false);
    }
}

pub struct SimClocks {
    board: Rc<Board>,
}

impl SimClocks {
    pub fn new(board: Rc<Board>) -> Self {
        Self { board }
    }
}

impl ClockHardware for SimClocks {
    fn configure_pll(&mut self, pll: PllId, _config: &PllConfig) {
        let at = self.board.now_us() + PLL_LOCK_US;
        self.board.lock_at[pll.as_index()].set(Some(at));
    }

    fn pll_locked(&self, pll: PllId) -> bool {
        // Each poll costs a microsecond of bus time.
        self.board.tick(1);
        self.board.lock_at[pll.as_index()]
            .get()
            .is_some_and(|at| self.board.now_us() >= at)
    }

    fn stop_pll(&mut self, pll: PllId) {
        self.board.lock_at[pll.as_index()].set(None);
    }

    fn route(&mut self, _domain: ClockDomain, _source: ClockSource, _freq_hz: u32) {
        self.board.tick(1);
    }

    fn stop(&mut self, _domain: ClockDomain) {
        self.board.tick(1);
    }
}

/// Sleep registers plus the core's wait-for-interrupt.
///
/// Halting hands control to the scripted world: the first of the next wake
/// edge or the watchdog deadline wins. An edge is delivered to the wake
/// manager exactly as the interrupt handler would.
pub struct SimPower<'a> {
    board: Rc<Board>,
    wake: &'a WakeSourceManager<SimWake>,
}

impl<'a> SimPower<'a> {
    pub fn new(board: Rc<Board>, wake: &'a WakeSourceManager<SimWake>) -> Self {
        Self { board, wake }
    }
}

impl PowerControl for SimPower<'_> {
    fn sleep_enable(&self) -> SleepEnableMask {
        self.board.sleep_enable.get()
    }

    fn set_sleep_enable(&mut self, mask: SleepEnableMask) {
        self.board.sleep_enable.set(mask);
    }

    fn sleep_control(&self) -> u32 {
        self.board.scr.get()
    }

    fn set_sleep_control(&mut self, scr: u32) {
        self.board.scr.set(scr);
    }

    fn wait_for_interrupt(&mut self) -> WakeReason {
        let board = &self.board;
        if board.edge_latched.get() {
            // Still pending from before; the core does not halt at all.
            return WakeReason::Edge;
        }
        let horizon = board.watchdog_deadline().unwrap_or(u64::MAX);
        loop {
            let edge = if board.edge_enabled.get() {
                board.take_edge_before(horizon.saturating_sub(1))
            } else {
                None
            };
            match edge {
                Some(at) if at < board.now_us() => {
                    // Fell while the core was still running; nothing latched.
                }
                Some(at) => {
                    board.advance_to(at);
                    board.edge_latched.set(true);
                    self.wake.on_edge_interrupt(at);
                    return WakeReason::Edge;
                }
                None if horizon == u64::MAX => return WakeReason::Interrupt,
                None => {
                    board.advance_to(horizon);
                    return WakeReason::Watchdog;
                }
            }
        }
    }

    fn now_micros(&self) -> u64 {
        self.board.now_us()
    }
}

impl RegisterProbe for SimPower<'_> {
    fn wake_enable(&self) -> WakeEnableMask {
        WakeEnableMask::RESET
    }

    fn vreg_raw(&self) -> u32 {
        VREG_RESET_RAW
    }
}

pub struct SimWake {
    board: Rc<Board>,
}

impl SimWake {
    pub fn new(board: Rc<Board>) -> Self {
        Self { board }
    }
}

impl WakeHardware for SimWake {
    fn start_watchdog(&self, timeout: WatchdogTimeout) {
        let timeout_us = u64::from(timeout.as_millis()) * 1_000;
        self.board.watchdog_timeout_us.set(Some(timeout_us));
        self.board
            .watchdog_deadline
            .set(Some(self.board.now_us() + timeout_us));
    }

    fn feed_watchdog(&self) {
        if let Some(timeout_us) = self.board.watchdog_timeout_us.get() {
            self.board
                .watchdog_deadline
                .set(Some(self.board.now_us() + timeout_us));
        }
    }

    fn enable_edge_interrupt(&self, _edge: EdgeConfig) {
        self.board.edge_latched.set(false);
        self.board.edge_enabled.set(true);
    }

    fn acknowledge_edge(&self, _edge: EdgeConfig) {
        self.board.edge_latched.set(false);
    }
}
