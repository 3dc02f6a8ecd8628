use core::cell::RefCell;
use core::fmt;

use heapless::{String as HeaplessString, Vec as HeaplessVec};
use power_core::clocks::{
    ClockController, ClockDomain, ClockHardware, ClockSource, MHZ, PllConfig, PllId, XOSC_HZ,
};
use power_core::diagnostics::{DiagnosticTransport, RegisterProbe, WakeEnableMask};
use power_core::sequencer::{
    PowerControl, PowerSequencer, PowerState, SCR_SLEEPDEEP, SleepEnableMask, SleepError,
    WakeReason,
};
use power_core::telemetry::TelemetryEventKind;
use power_core::wake::{
    ConfigError, EdgeConfig, EdgeOutcome, WakeHardware, WakeSourceManager, WatchdogTimeout,
};

const WAKE_PIN: u8 = 18;
const TIMEOUT_MS: u32 = 8_388;
/// Default SCR on the M0+ has SLEEPONEXIT and SEVONPEND clear.
const BOOT_SCR: u32 = 0;

type Log = RefCell<HeaplessVec<Event, 128>>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Event {
    PllConfigured(PllId),
    PllStopped(PllId),
    Routed(ClockDomain),
    Gated(ClockDomain),
    MaskWritten(SleepEnableMask),
    ScrWritten(u32),
    Wfi,
    WatchdogStarted(u32),
    WatchdogFed,
    EdgeEnabled(u8),
    EdgeAcknowledged(u8),
}

fn log(events: &Log, event: Event) {
    events.borrow_mut().push(event).expect("event log full");
}

fn position(events: &Log, event: Event) -> usize {
    events
        .borrow()
        .iter()
        .position(|logged| *logged == event)
        .unwrap_or_else(|| panic!("{event:?} never happened"))
}

#[test]
fn end_to_end_boot_sleep_wake_restore() {
    let events = Log::default();
    let wake = WakeSourceManager::new(MockWake { log: &events }, 0);
    let mut chip = MockChip::new(&events, &wake);
    chip.edges.push(2_000_000).unwrap();

    let mut sequencer = PowerSequencer::new(
        ClockController::from_boot(MockClocks { log: &events }),
        chip,
        &wake,
        WAKE_PIN,
    )
    .unwrap();
    let mut uart = MockUart::default();

    let boot = sequencer.report(&mut uart).unwrap();
    assert_eq!(boot.state, PowerState::FullSpeed);
    assert_eq!(boot.frequency(ClockDomain::System), 125 * MHZ);
    assert_eq!(boot.vreg_mv, 1_100);
    assert!(uart.text.contains("clk_sys frequency: 125 MHz"));

    sequencer.begin_low_power(&mut uart).unwrap();
    let reduced = sequencer.report(&mut uart).unwrap();
    assert_eq!(reduced.state, PowerState::ReducedSpeed);
    assert_eq!(reduced.frequency(ClockDomain::System), XOSC_HZ);
    assert_eq!(reduced.frequency(ClockDomain::Usb), 0);
    assert_eq!(reduced.frequency(ClockDomain::Adc), 0);
    assert_eq!(uart.resumed_at.last(), Some(&XOSC_HZ));

    let before = sequencer.power().sleep_enable();
    let reason = sequencer.enter_deep_sleep(TIMEOUT_MS, &mut uart).unwrap();
    assert_eq!(reason, WakeReason::Edge);
    assert_eq!(sequencer.power().edge_outcomes.as_slice(), &[EdgeOutcome::Accepted]);
    assert_eq!(wake.stats().last_accepted_us, 2_000_000);
    assert_eq!(sequencer.state(), PowerState::ReducedSpeed);
    assert!(sequencer.pending_snapshot().is_some());

    sequencer.restore_full_speed(&mut uart).unwrap();
    assert_eq!(sequencer.power().sleep_enable(), before);
    assert_eq!(sequencer.power().scr, BOOT_SCR);

    let restored = sequencer.report(&mut uart).unwrap();
    assert_eq!(restored.state, PowerState::FullSpeed);
    assert_eq!(restored.frequency(ClockDomain::System), 125 * MHZ);
    assert_eq!(restored.frequency(ClockDomain::Usb), 48 * MHZ);
    assert_eq!(restored.frequency(ClockDomain::Adc), 48 * MHZ);
    assert_eq!(restored.frequency(ClockDomain::Peripheral), 125 * MHZ);
    assert_eq!(uart.resumed_at.last(), Some(&(125 * MHZ)));
    // One drain per report, plus one before every clock change and before halting.
    assert!(uart.flushes >= 6);

    // The accepted edge acknowledged the pin and fed the watchdog.
    assert!(position(&events, Event::Wfi) < position(&events, Event::EdgeAcknowledged(WAKE_PIN)));
    assert!(position(&events, Event::Wfi) < position(&events, Event::WatchdogFed));
}

#[test]
fn deep_sleep_arms_wake_sources_before_narrowing_the_mask() {
    let events = Log::default();
    let wake = WakeSourceManager::new(MockWake { log: &events }, 0);
    let mut chip = MockChip::new(&events, &wake);
    chip.edges.push(500_000).unwrap();
    let mut sequencer = PowerSequencer::new(
        ClockController::from_boot(MockClocks { log: &events }),
        chip,
        &wake,
        WAKE_PIN,
    )
    .unwrap();
    let mut uart = MockUart::default();

    sequencer.enter_deep_sleep(TIMEOUT_MS, &mut uart).unwrap();

    let reduced = position(&events, Event::PllStopped(PllId::Usb));
    let watchdog = position(&events, Event::WatchdogStarted(TIMEOUT_MS));
    let edge = position(&events, Event::EdgeEnabled(WAKE_PIN));
    let mask = position(&events, Event::MaskWritten(SleepEnableMask::RTC_ONLY));
    let scr = position(&events, Event::ScrWritten(BOOT_SCR | SCR_SLEEPDEEP));
    let wfi = position(&events, Event::Wfi);

    assert!(reduced < watchdog);
    assert!(watchdog < mask);
    assert!(edge < mask);
    assert!(mask < scr);
    assert!(scr < wfi);
    assert_eq!(
        sequencer.power().during_sleep.as_slice(),
        &[(SleepEnableMask::RTC_ONLY, SCR_SLEEPDEEP)]
    );
}

#[test]
fn mask_round_trips_across_repeated_cycles() {
    let events = Log::default();
    let wake = WakeSourceManager::new(MockWake { log: &events }, 0);
    let mut chip = MockChip::new(&events, &wake);
    // Deliberately non-default values so a recomputed default would not match.
    chip.sleep = SleepEnableMask::new(0xDEAD_BEEF, 0x0000_1234);
    chip.scr = 0x10;
    for cycle in 1..=5_u64 {
        chip.edges.push(cycle * 3_000_000).unwrap();
    }
    let original = chip.sleep;
    let mut sequencer = PowerSequencer::new(
        ClockController::from_boot(MockClocks { log: &events }),
        chip,
        &wake,
        WAKE_PIN,
    )
    .unwrap();
    let mut uart = MockUart::default();

    for cycle in 0..5 {
        events.borrow_mut().clear();
        let reason = sequencer.enter_deep_sleep(TIMEOUT_MS, &mut uart).unwrap();
        assert_eq!(reason, WakeReason::Edge, "cycle {cycle}");
        assert_eq!(
            sequencer.power().sleep_enable(),
            SleepEnableMask::RTC_ONLY,
            "cycle {cycle}: mask stays narrowed until restore"
        );

        sequencer.restore_full_speed(&mut uart).unwrap();
        assert_eq!(sequencer.power().sleep_enable(), original, "cycle {cycle}");
        assert_eq!(sequencer.power().scr, 0x10, "cycle {cycle}");
        assert_eq!(sequencer.state(), PowerState::FullSpeed);
    }

    assert_eq!(wake.stats().accepted, 5);
    let seen = &sequencer.power().during_sleep;
    assert_eq!(seen.len(), 5);
    assert!(
        seen.iter()
            .all(|(mask, scr)| *mask == SleepEnableMask::RTC_ONLY && *scr == 0x10 | SCR_SLEEPDEEP)
    );
}

#[test]
fn mask_round_trips_even_when_nothing_changed() {
    let events = Log::default();
    let wake = WakeSourceManager::new(MockWake { log: &events }, 0);
    let mut chip = MockChip::new(&events, &wake);
    chip.sleep = SleepEnableMask::RTC_ONLY;
    chip.edges.push(1_000_000).unwrap();
    let mut sequencer = PowerSequencer::new(
        ClockController::from_boot(MockClocks { log: &events }),
        chip,
        &wake,
        WAKE_PIN,
    )
    .unwrap();
    let mut uart = MockUart::default();

    sequencer.enter_deep_sleep(TIMEOUT_MS, &mut uart).unwrap();
    sequencer.restore_full_speed(&mut uart).unwrap();

    assert_eq!(sequencer.power().sleep_enable(), SleepEnableMask::RTC_ONLY);
}

#[test]
fn oversized_timeout_is_rejected_before_any_side_effect() {
    let events = Log::default();
    let wake = WakeSourceManager::new(MockWake { log: &events }, 0);
    let chip = MockChip::new(&events, &wake);
    let mut sequencer = PowerSequencer::new(
        ClockController::from_boot(MockClocks { log: &events }),
        chip,
        &wake,
        WAKE_PIN,
    )
    .unwrap();
    let mut uart = MockUart::default();

    let error = sequencer.enter_deep_sleep(9_000, &mut uart).unwrap_err();

    assert_eq!(
        error,
        SleepError::Config(ConfigError::TimeoutTooLarge {
            requested_ms: 9_000,
            max_ms: WatchdogTimeout::MAX_MS,
        })
    );
    assert!(events.borrow().is_empty());
    assert_eq!(sequencer.state(), PowerState::FullSpeed);
    assert!(sequencer.pending_snapshot().is_none());
}

#[test]
fn deep_sleep_is_not_reentered_before_restore() {
    let events = Log::default();
    let wake = WakeSourceManager::new(MockWake { log: &events }, 0);
    let mut chip = MockChip::new(&events, &wake);
    chip.edges.push(1_000_000).unwrap();
    chip.edges.push(2_000_000).unwrap();
    let mut sequencer = PowerSequencer::new(
        ClockController::from_boot(MockClocks { log: &events }),
        chip,
        &wake,
        WAKE_PIN,
    )
    .unwrap();
    let mut uart = MockUart::default();

    sequencer.enter_deep_sleep(TIMEOUT_MS, &mut uart).unwrap();
    assert_eq!(
        sequencer.enter_deep_sleep(TIMEOUT_MS, &mut uart),
        Err(SleepError::RestorePending)
    );
    assert_eq!(
        sequencer.begin_low_power(&mut uart),
        Err(SleepError::RestorePending)
    );
    assert_eq!(sequencer.power().during_sleep.len(), 1);
}

#[test]
fn missing_edge_lets_the_watchdog_expire() {
    let events = Log::default();
    let wake = WakeSourceManager::new(MockWake { log: &events }, 0);
    let chip = MockChip::new(&events, &wake);
    let mut sequencer = PowerSequencer::new(
        ClockController::from_boot(MockClocks { log: &events }),
        chip,
        &wake,
        WAKE_PIN,
    )
    .unwrap();
    let mut uart = MockUart::default();

    let reason = sequencer.enter_deep_sleep(1_000, &mut uart).unwrap();

    assert_eq!(reason, WakeReason::Watchdog);
    assert_eq!(sequencer.power().now_micros(), 1_000_000);
    assert_eq!(wake.stats().accepted, 0);
}

#[test]
fn transitions_are_recorded_in_telemetry() {
    let events = Log::default();
    let wake = WakeSourceManager::new(MockWake { log: &events }, 0);
    let mut chip = MockChip::new(&events, &wake);
    chip.edges.push(2_000_000).unwrap();
    let mut sequencer = PowerSequencer::new(
        ClockController::from_boot(MockClocks { log: &events }),
        chip,
        &wake,
        WAKE_PIN,
    )
    .unwrap();
    let mut uart = MockUart::default();

    sequencer.enter_deep_sleep(TIMEOUT_MS, &mut uart).unwrap();
    sequencer.restore_full_speed(&mut uart).unwrap();

    let kinds: HeaplessVec<TelemetryEventKind, 16> = sequencer
        .telemetry()
        .oldest_first()
        .map(|record| record.event)
        .collect();
    assert_eq!(
        kinds.as_slice(),
        &[
            TelemetryEventKind::PlanStarted(power_core::clocks::OperatingPoint::ReducedSpeed),
            TelemetryEventKind::PlanCompleted(power_core::clocks::OperatingPoint::ReducedSpeed),
            TelemetryEventKind::SleepEntered,
            TelemetryEventKind::Woke(WakeReason::Edge),
            TelemetryEventKind::SnapshotRestored,
            TelemetryEventKind::PlanStarted(power_core::clocks::OperatingPoint::FullSpeed),
            TelemetryEventKind::PlanCompleted(power_core::clocks::OperatingPoint::FullSpeed),
        ]
    );
}

struct MockClocks<'a> {
    log: &'a Log,
}

impl ClockHardware for MockClocks<'_> {
    fn configure_pll(&mut self, pll: PllId, _config: &PllConfig) {
        log(self.log, Event::PllConfigured(pll));
    }

    fn pll_locked(&self, _pll: PllId) -> bool {
        true
    }

    fn stop_pll(&mut self, pll: PllId) {
        log(self.log, Event::PllStopped(pll));
    }

    fn route(&mut self, domain: ClockDomain, _source: ClockSource, _freq_hz: u32) {
        log(self.log, Event::Routed(domain));
    }

    fn stop(&mut self, domain: ClockDomain) {
        log(self.log, Event::Gated(domain));
    }
}

struct MockWake<'a> {
    log: &'a Log,
}

impl WakeHardware for MockWake<'_> {
    fn start_watchdog(&self, timeout: WatchdogTimeout) {
        log(self.log, Event::WatchdogStarted(timeout.as_millis()));
    }

    fn feed_watchdog(&self) {
        log(self.log, Event::WatchdogFed);
    }

    fn enable_edge_interrupt(&self, edge: EdgeConfig) {
        log(self.log, Event::EdgeEnabled(edge.pin));
    }

    fn acknowledge_edge(&self, edge: EdgeConfig) {
        log(self.log, Event::EdgeAcknowledged(edge.pin));
    }
}

/// Sleep registers plus a scripted interrupt source.
struct MockChip<'a> {
    log: &'a Log,
    isr: &'a WakeSourceManager<MockWake<'a>>,
    sleep: SleepEnableMask,
    scr: u32,
    now_us: u64,
    /// Future edge timestamps, delivered one per wait-for-interrupt.
    edges: HeaplessVec<u64, 8>,
    edge_outcomes: HeaplessVec<EdgeOutcome, 8>,
    during_sleep: HeaplessVec<(SleepEnableMask, u32), 8>,
}

impl<'a> MockChip<'a> {
    fn new(log: &'a Log, isr: &'a WakeSourceManager<MockWake<'a>>) -> Self {
        Self {
            log,
            isr,
            sleep: SleepEnableMask::RESET,
            scr: BOOT_SCR,
            now_us: 0,
            edges: HeaplessVec::new(),
            edge_outcomes: HeaplessVec::new(),
            during_sleep: HeaplessVec::new(),
        }
    }
}

impl PowerControl for MockChip<'_> {
    fn sleep_enable(&self) -> SleepEnableMask {
        self.sleep
    }

    fn set_sleep_enable(&mut self, mask: SleepEnableMask) {
        log(self.log, Event::MaskWritten(mask));
        self.sleep = mask;
    }

    fn sleep_control(&self) -> u32 {
        self.scr
    }

    fn set_sleep_control(&mut self, scr: u32) {
        log(self.log, Event::ScrWritten(scr));
        self.scr = scr;
    }

    fn wait_for_interrupt(&mut self) -> WakeReason {
        log(self.log, Event::Wfi);
        self.during_sleep.push((self.sleep, self.scr)).unwrap();

        if self.edges.is_empty() {
            // Nothing feeds the watchdog, so it runs out.
            let timeout = WatchdogTimeout::MAX.as_millis().min(self.watchdog_ms());
            self.now_us += u64::from(timeout) * 1_000;
            return WakeReason::Watchdog;
        }

        let at = self.edges.remove(0);
        self.now_us = self.now_us.max(at);
        let outcome = self.isr.on_edge_interrupt(self.now_us);
        self.edge_outcomes.push(outcome).unwrap();
        WakeReason::Edge
    }

    fn now_micros(&self) -> u64 {
        self.now_us
    }
}

impl MockChip<'_> {
    fn watchdog_ms(&self) -> u32 {
        self.log
            .borrow()
            .iter()
            .rev()
            .find_map(|event| match event {
                Event::WatchdogStarted(ms) => Some(*ms),
                _ => None,
            })
            .unwrap_or(WatchdogTimeout::MAX_MS)
    }
}

impl RegisterProbe for MockChip<'_> {
    fn wake_enable(&self) -> WakeEnableMask {
        WakeEnableMask::RESET
    }

    fn vreg_raw(&self) -> u32 {
        // VSEL = 0b1011, EN set.
        0xB1
    }
}

#[derive(Default)]
struct MockUart {
    text: HeaplessString<4096>,
    flushes: usize,
    resumed_at: HeaplessVec<u32, 16>,
}

impl fmt::Write for MockUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.text.push_str(s).map_err(|_| fmt::Error)
    }
}

impl DiagnosticTransport for MockUart {
    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn resume(&mut self, peripheral_hz: u32) {
        self.resumed_at.push(peripheral_hz).unwrap();
    }
}
