use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crossterm::style::Stylize;
use power_core::clocks::ClockController;
use power_core::config::DemoConfig;
use power_core::diagnostics::{DiagnosticTransport, ResetCause, write_boot_banner};
use power_core::sequencer::{PowerSequencer, SleepError, WakeReason};
use power_core::wake::{EdgeOutcome, WakeSourceManager};

use crate::chip::{Board, SimClocks, SimPower, SimWake};

/// Default press time, measured from the moment the core halts.
pub const DEFAULT_EDGE_AT_MS: u64 = 2_000;
/// Boots to run before the emulator stops on its own.
pub const DEFAULT_BOOTS: u32 = 2;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    /// Button presses relative to deep-sleep entry. The first ends the sleep,
    /// later ones land in the heartbeat loop.
    pub edges_at_ms: Vec<u64>,
    pub transcript: Option<PathBuf>,
    pub boots: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            edges_at_ms: vec![DEFAULT_EDGE_AT_MS],
            transcript: None,
            boots: DEFAULT_BOOTS,
        }
    }
}

/// How a single boot ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootEnd {
    WatchdogReset,
    /// Nothing left that could end the heartbeat.
    Stopped,
}

/// Summary of a complete run, mostly for tests.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunReport {
    pub boots: u32,
    pub wake_reasons: Vec<WakeReason>,
    pub accepted_edges: u32,
    pub dropped_edges: u32,
    pub interrupts_announced: u32,
}

type Sequencer<'a> = PowerSequencer<'a, SimClocks, SimPower<'a>, SimWake>;

pub struct Session {
    options: Options,
    config: DemoConfig,
    board: Rc<Board>,
    console: Console,
}

impl Session {
    pub fn new(options: Options, out: Box<dyn Write>) -> io::Result<Self> {
        let board = Board::new();
        let transcript = match &options.transcript {
            Some(path) => Some(TranscriptLogger::new(path)?),
            None => None,
        };
        let console = Console::new(board.clone(), out, transcript);
        Ok(Self {
            options,
            config: DemoConfig::new(),
            board,
            console,
        })
    }

    /// Runs the demo until the configured number of watchdog resets.
    pub fn run(&mut self) -> io::Result<RunReport> {
        let mut report = RunReport::default();
        let mut cause = ResetCause::Clean;
        for boot in 1..=self.options.boots {
            report.boots = boot;
            match self.run_boot(cause, &mut report)? {
                BootEnd::WatchdogReset => {
                    self.console.note("watchdog expired, chip reset")?;
                    self.board.reset();
                    cause = ResetCause::Watchdog;
                }
                BootEnd::Stopped => break,
            }
        }
        self.console.finish()?;
        Ok(report)
    }

    fn run_boot(&mut self, cause: ResetCause, report: &mut RunReport) -> io::Result<BootEnd> {
        let config = self.config;
        let board = self.board.clone();
        let wake = WakeSourceManager::with_filter(
            SimWake::new(board.clone()),
            config.debounce_filter(board.now_us()),
        );
        let mut sequencer = Sequencer::new(
            ClockController::from_boot(SimClocks::new(board.clone())),
            SimPower::new(board.clone(), &wake),
            &wake,
            config.wake_pin,
        )
        .map_err(|error| io::Error::other(error.to_string()))?;
        let mut boot = Boot {
            board: &board,
            console: &mut self.console,
            pending_signal: false,
        };

        boot.console.note(&format!(
            "led on gpio {} for {} ms",
            config.led_pin,
            config.led_pulse.as_millis()
        ))?;
        boot.idle(config.led_pulse, &wake);

        write_boot_banner(&mut *boot.console, cause).map_err(fmt_error)?;
        boot.report(&sequencer, "Default frequencies the chip started up with:")?;
        if boot.settle(config.settle_time, &wake)?.is_err() {
            return Ok(BootEnd::WatchdogReset);
        }

        sequencer
            .begin_low_power(&mut *boot.console)
            .map_err(sleep_error)?;
        boot.report(&sequencer, "The lowered frequencies just before going to sleep:")?;

        boot.say("Going to sleep with dog and enabled interrupt...\n")?;
        let halted_at = board.now_us();
        for at_ms in &self.options.edges_at_ms {
            board.press(halted_at + at_ms * 1_000);
        }
        match sequencer.enter_deep_sleep(config.watchdog_timeout_ms, &mut *boot.console) {
            Ok(WakeReason::Watchdog) => {
                report.wake_reasons.push(WakeReason::Watchdog);
                collect_stats(&wake, report);
                return Ok(BootEnd::WatchdogReset);
            }
            Ok(reason) => {
                report.wake_reasons.push(reason);
                // Edges before arming are ignored, so any accepted edge is the wake press.
                boot.pending_signal = wake.stats().accepted > 0;
                boot.console.note(&format!(
                    "core resumed ({reason}) after {} ms",
                    (board.now_us() - halted_at) / 1_000
                ))?;
            }
            Err(SleepError::Config(error)) => {
                boot.console.note(&format!("deep sleep skipped: {error}"))?;
            }
            Err(error) => return Err(sleep_error(error)),
        }

        sequencer
            .restore_full_speed(&mut *boot.console)
            .map_err(sleep_error)?;
        boot.console.note(&format!(
            "uart back on clk_peri={} Hz",
            board.peripheral_hz()
        ))?;
        boot.report(&sequencer, "Woke up from interrupt and restored frequencies:")?;
        if boot.settle(config.settle_time, &wake)?.is_err() {
            collect_stats(&wake, report);
            return Ok(BootEnd::WatchdogReset);
        }

        for record in sequencer.telemetry().oldest_first() {
            boot.console.note(&format!("telemetry {record}"))?;
        }

        boot.say("Demonstrating light sleep while waiting for more interrupts to pat the dog.\n")?;
        if board.watchdog_deadline().is_none() {
            boot.console.note("watchdog never started, stopping")?;
            collect_stats(&wake, report);
            return Ok(BootEnd::Stopped);
        }
        loop {
            let tick_at = board.now_us() + duration_us(config.heartbeat_interval);
            if boot.run_until(tick_at, &wake).is_err() {
                break;
            }
            if boot.pending_signal {
                boot.pending_signal = false;
                report.interrupts_announced += 1;
                boot.say("Interrupt!\n")?;
            }
            boot.say(".")?;
        }
        collect_stats(&wake, report);
        Ok(BootEnd::WatchdogReset)
    }
}

/// The watchdog fired before the requested time was reached.
struct Expired;

/// Per-boot view of the world while the core is running.
struct Boot<'s> {
    board: &'s Board,
    console: &'s mut Console,
    /// Mirrors the firmware's edge signal: set by an accepted edge, consumed
    /// by the heartbeat.
    pending_signal: bool,
}

impl Boot<'_> {
    fn say(&mut self, text: &str) -> io::Result<()> {
        self.console.write_str(text).map_err(fmt_error)
    }

    fn report(&mut self, sequencer: &Sequencer<'_>, heading: &str) -> io::Result<()> {
        self.say(heading)?;
        self.say("\n")?;
        sequencer.report(&mut *self.console).map_err(fmt_error)?;
        Ok(())
    }

    fn idle(&mut self, duration: Duration, wake: &WakeSourceManager<SimWake>) {
        let until = self.board.now_us() + duration_us(duration);
        // Nothing is armed yet, so the watchdog cannot fire here.
        let _ = self.run_until(until, wake);
    }

    fn settle(
        &mut self,
        duration: Duration,
        wake: &WakeSourceManager<SimWake>,
    ) -> io::Result<Result<(), Expired>> {
        self.say("Wait for 5 seconds to allow to measure current.\n")?;
        let until = self.board.now_us() + duration_us(duration);
        Ok(self.run_until(until, wake))
    }

    /// Busy time: edges due before `until_us` reach the wake manager as they
    /// would through the interrupt handler.
    fn run_until(
        &mut self,
        until_us: u64,
        wake: &WakeSourceManager<SimWake>,
    ) -> Result<(), Expired> {
        while let Some(at) = self.board.take_edge_before(until_us) {
            if !self.board.advance_to(at) {
                return Err(Expired);
            }
            if wake.on_edge_interrupt(at) == EdgeOutcome::Accepted {
                self.pending_signal = true;
            }
        }
        if self.board.advance_to(until_us) {
            Ok(())
        } else {
            Err(Expired)
        }
    }
}

fn collect_stats(wake: &WakeSourceManager<SimWake>, report: &mut RunReport) {
    let stats = wake.stats();
    report.accepted_edges += stats.accepted;
    report.dropped_edges += stats.dropped;
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn fmt_error(_: fmt::Error) -> io::Error {
    io::Error::other("console write failed")
}

fn sleep_error(error: SleepError) -> io::Error {
    io::Error::other(error.to_string())
}

/// Stands in for UART0: text goes to the output stream and, line by line,
/// to the transcript.
struct Console {
    board: Rc<Board>,
    out: Box<dyn Write>,
    transcript: Option<TranscriptLogger>,
    line: String,
    failure: Option<io::Error>,
}

impl Console {
    fn new(board: Rc<Board>, out: Box<dyn Write>, transcript: Option<TranscriptLogger>) -> Self {
        Self {
            board,
            out,
            transcript,
            line: String::new(),
            failure: None,
        }
    }

    /// Emulator commentary, kept visually apart from the UART stream.
    fn note(&mut self, text: &str) -> io::Result<()> {
        self.finish_line()?;
        writeln!(self.out, "{}", format!("[sim] {text}").dark_grey())?;
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(self.board.now_us(), TranscriptRole::Simulator, text)?;
        }
        Ok(())
    }

    /// Ends a partially written line so commentary starts on its own row.
    fn finish_line(&mut self) -> io::Result<()> {
        if self.line.is_empty() {
            return Ok(());
        }
        writeln!(self.out)?;
        let line = std::mem::take(&mut self.line);
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(self.board.now_us(), TranscriptRole::Uart, &line)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finish_line()?;
        self.out.flush()?;
        match self.failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn push(&mut self, s: &str) -> io::Result<()> {
        self.out.write_all(s.as_bytes())?;
        for ch in s.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line);
                if let Some(transcript) = self.transcript.as_mut() {
                    transcript.append_line(self.board.now_us(), TranscriptRole::Uart, &line)?;
                }
            } else {
                self.line.push(ch);
            }
        }
        Ok(())
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s).map_err(|error| {
            self.failure.get_or_insert(error);
            fmt::Error
        })
    }
}

impl DiagnosticTransport for Console {
    fn flush(&mut self) {
        if let Err(error) = self.out.flush() {
            self.failure.get_or_insert(error);
        }
    }

    fn resume(&mut self, peripheral_hz: u32) {
        self.board.set_peripheral_hz(peripheral_hz);
        if let Some(transcript) = self.transcript.as_mut() {
            let note = format!("uart retimed for clk_peri={peripheral_hz} Hz");
            if let Err(error) =
                transcript.append_line(self.board.now_us(), TranscriptRole::Simulator, &note)
            {
                self.failure.get_or_insert(error);
            }
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# Pico low-power emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are virtual milliseconds since power-on"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, now_us: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6}.{:03} ms] {} {}",
            now_us / 1_000,
            now_us % 1_000,
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Uart,
    Simulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Uart => "UART<",
            TranscriptRole::Simulator => "SIM  ",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_quietly(options: Options) -> RunReport {
        let mut session = Session::new(options, Box::new(io::sink())).unwrap();
        session.run().unwrap()
    }

    #[test]
    fn press_ends_the_sleep_and_bounces_are_dropped() {
        let report = run_quietly(Options {
            boots: 1,
            ..Options::default()
        });

        assert_eq!(report.wake_reasons, vec![WakeReason::Edge]);
        assert_eq!(report.accepted_edges, 1);
        assert_eq!(report.dropped_edges, 3);
        // The wake press itself is announced once the heartbeat starts.
        assert_eq!(report.interrupts_announced, 1);
    }

    #[test]
    fn configured_debounce_window_reaches_the_filter() {
        let mut session = Session::new(
            Options {
                boots: 1,
                ..Options::default()
            },
            Box::new(io::sink()),
        )
        .unwrap();
        session.config.debounce_window = Duration::from_millis(1);

        let report = session.run().unwrap();

        // Only the 800 us bounce is inside a 1 ms window.
        assert_eq!(report.accepted_edges, 3);
        assert_eq!(report.dropped_edges, 1);
    }

    #[test]
    fn no_edge_means_the_watchdog_ends_every_boot() {
        let report = run_quietly(Options {
            edges_at_ms: Vec::new(),
            boots: 2,
            ..Options::default()
        });

        assert_eq!(report.boots, 2);
        assert_eq!(
            report.wake_reasons,
            vec![WakeReason::Watchdog, WakeReason::Watchdog]
        );
        assert_eq!(report.accepted_edges, 0);
    }

    #[test]
    fn late_press_loses_to_the_watchdog() {
        let report = run_quietly(Options {
            edges_at_ms: vec![9_000],
            boots: 1,
            ..Options::default()
        });

        assert_eq!(report.wake_reasons, vec![WakeReason::Watchdog]);
    }

    #[test]
    fn heartbeat_presses_are_announced() {
        let report = run_quietly(Options {
            edges_at_ms: vec![1_000, 9_000, 12_000],
            boots: 1,
            ..Options::default()
        });

        assert_eq!(report.wake_reasons, vec![WakeReason::Edge]);
        assert_eq!(report.accepted_edges, 3);
        assert!(report.interrupts_announced >= 2);
    }

    #[test]
    fn transcript_records_uart_lines_with_timestamps() {
        let path = std::env::temp_dir().join(format!(
            "power-emulator-{}-transcript.log",
            std::process::id()
        ));
        run_quietly(Options {
            boots: 1,
            transcript: Some(path.clone()),
            ..Options::default()
        });

        let text = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).ok();
        assert!(text.starts_with("# Pico low-power emulator transcript"));
        assert!(text.contains("UART< Startup!"));
        assert!(text.contains("UART< clk_sys frequency: 12 MHz"));
        assert!(text.contains("uart retimed for clk_peri=12000000 Hz"));
        assert!(text.contains("UART< Woke up from interrupt and restored frequencies:"));
    }
}
