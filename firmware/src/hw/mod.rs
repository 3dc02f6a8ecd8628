//! RP2040 register implementations of the `power-core` hardware traits.
//!
//! The embassy HAL owns pin and peripheral setup; everything the HAL does not
//! expose (clock muxes, PLL power, sleep enables, SCR) is programmed through
//! the PAC re-exported by `embassy-rp`.

mod clocks;
mod power;
mod uart;
mod wake;

pub use clocks::Rp2040Clocks;
pub use power::Rp2040Power;
pub use uart::UartTransport;
pub use wake::Rp2040Wake;
