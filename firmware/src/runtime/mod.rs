use core::fmt::Write;

use cortex_m::interrupt;
use cortex_m::peripheral::SCB;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt::Display2Format;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_rp as hal;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::uart::{self, UartTx};
use embassy_rp::watchdog::{ResetReason, Watchdog};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker, Timer};
use power_core::clocks::ClockController;
use power_core::config::DemoConfig;
use power_core::diagnostics::{ResetCause, write_boot_banner};
use power_core::sequencer::{PowerSequencer, SleepError};
use power_core::wake::WakeSourceManager;
use static_cell::StaticCell;

use crate::hw::{Rp2040Clocks, Rp2040Power, Rp2040Wake, UartTransport};
use crate::telemetry;

mod edge_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

type Sequencer = PowerSequencer<'static, Rp2040Clocks, Rp2040Power, Rp2040Wake>;

static WAKE: StaticCell<WakeSourceManager<Rp2040Wake>> = StaticCell::new();

/// Timestamp of each edge that made it through the debounce filter.
pub(super) static EDGE_SIGNAL: Signal<CriticalSectionRawMutex, u64> = Signal::new();

fn to_embassy(duration: core::time::Duration) -> Duration {
    Duration::try_from(duration).unwrap_or(Duration::MAX)
}

fn say(uart: &mut UartTransport, text: &str) {
    if uart.write_str(text).is_err() {
        defmt::warn!("uart write failed");
    }
}

fn report(sequencer: &Sequencer, uart: &mut UartTransport, heading: &str) {
    say(uart, heading);
    say(uart, "\n");
    if let Err(error) = sequencer.report(uart) {
        defmt::warn!("frequency report failed: {}", Display2Format(&error));
    }
}

fn settle(uart: &mut UartTransport, config: &DemoConfig) {
    say(uart, "Wait for 5 seconds to allow to measure current.\n");
    embassy_time::block_for(to_embassy(config.settle_time));
}

/// A clock tree left half-switched cannot be trusted; start over.
fn fatal(error: SleepError) -> ! {
    defmt::error!("{}", Display2Format(&error));
    SCB::sys_reset()
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = DemoConfig::new();
    let p = hal::init(hal::config::Config::default());

    let mut led = Output::new(p.PIN_25, Level::Low);
    let button = Input::new(p.PIN_18, Pull::Up);

    let mut uart_config = uart::Config::default();
    uart_config.baudrate = config.baud_rate;
    let mut uart = UartTransport::new(
        UartTx::new_blocking(p.UART0, p.PIN_0, uart_config),
        config.baud_rate,
    );

    let mut watchdog = Watchdog::new(p.WATCHDOG);
    watchdog.pause_on_debug(true);
    let cause = ResetCause::from_watchdog_flag(matches!(
        watchdog.reset_reason(),
        Some(ResetReason::TimedOut)
    ));

    let wake = WAKE.init(WakeSourceManager::with_filter(
        Rp2040Wake::new(watchdog),
        config.debounce_filter(Instant::now().as_micros()),
    ));

    spawner
        .spawn(edge_task::run(button, wake))
        .expect("failed to spawn edge task");

    let mut sequencer = Sequencer::new(
        ClockController::from_boot(Rp2040Clocks::new()),
        Rp2040Power::new(config.wake_pin),
        wake,
        config.wake_pin,
    )
    .expect("wake pin out of range");

    led.set_high();
    Timer::after(to_embassy(config.led_pulse)).await;
    led.set_low();

    if write_boot_banner(&mut uart, cause).is_err() {
        defmt::warn!("uart write failed");
    }
    defmt::info!("boot: watchdog reset={=bool}", cause == ResetCause::Watchdog);

    report(
        &sequencer,
        &mut uart,
        "Default frequencies the chip started up with:",
    );
    settle(&mut uart, &config);

    if let Err(error) = sequencer.begin_low_power(&mut uart) {
        fatal(error);
    }
    report(
        &sequencer,
        &mut uart,
        "The lowered frequencies just before going to sleep:",
    );

    say(&mut uart, "Going to sleep with dog and enabled interrupt...\n");
    match sequencer.enter_deep_sleep(config.watchdog_timeout_ms, &mut uart) {
        Ok(reason) => defmt::info!("woke: {}", Display2Format(&reason)),
        Err(SleepError::Config(error)) => {
            defmt::error!("deep sleep skipped: {}", Display2Format(&error));
        }
        Err(error) => fatal(error),
    }

    if let Err(error) = sequencer.restore_full_speed(&mut uart) {
        fatal(error);
    }
    // Let the edge task debounce the press that ended the sleep.
    embassy_futures::yield_now().await;

    report(
        &sequencer,
        &mut uart,
        "Woke up from interrupt and restored frequencies:",
    );
    settle(&mut uart, &config);

    telemetry::dump(sequencer.telemetry());
    telemetry::log_wake_stats(&sequencer.wake().stats());

    say(
        &mut uart,
        "Demonstrating light sleep while waiting for more interrupts to pat the dog.\n",
    );

    let mut ticker = Ticker::every(to_embassy(config.heartbeat_interval));
    loop {
        match select(ticker.next(), EDGE_SIGNAL.wait()).await {
            Either::First(()) => say(&mut uart, "."),
            Either::Second(at_us) => {
                say(&mut uart, "Interrupt!\n");
                defmt::debug!("edge accepted at {=u64}us", at_us);
            }
        }
    }
}
