use core::fmt;

use embassy_rp::pac;
use embassy_rp::uart::{Blocking, UartTx};
use power_core::diagnostics::DiagnosticTransport;

use crate::baud::BaudDivisors;

/// Diagnostic text stream on UART0.
pub struct UartTransport {
    tx: UartTx<'static, Blocking>,
    baud: u32,
}

impl UartTransport {
    pub fn new(tx: UartTx<'static, Blocking>, baud: u32) -> Self {
        Self { tx, baud }
    }
}

impl fmt::Write for UartTransport {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.tx.blocking_write(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

impl DiagnosticTransport for UartTransport {
    fn flush(&mut self) {
        let _ = self.tx.blocking_flush();
        // The FIFO is empty once the last byte is in the shifter; wait for the wire too.
        while pac::UART0.uartfr().read().busy() {}
    }

    fn resume(&mut self, peripheral_hz: u32) {
        let divisors = BaudDivisors::for_clock(peripheral_hz, self.baud);
        let r = pac::UART0;
        r.uartibrd()
            .write_value(pac::uart::regs::Uartibrd(divisors.integer));
        r.uartfbrd()
            .write_value(pac::uart::regs::Uartfbrd(divisors.fraction));
        // The divisors latch on a line control write.
        r.uartlcr_h().modify(|_| {});
        defmt::debug!(
            "uart0 retimed for {=u32} Hz: ibrd={=u32} fbrd={=u32}",
            peripheral_hz,
            divisors.integer,
            divisors.fraction
        );
    }
}
