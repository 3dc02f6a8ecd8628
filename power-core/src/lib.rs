#![no_std]

// Shared logic for the low-power controller.
//
// Everything here programs against the narrow hardware traits declared in each
// module, so the same sequencing code runs on the RP2040 firmware and inside the
// host emulator and tests.

pub mod clocks;
pub mod config;
pub mod diagnostics;
pub mod sequencer;
pub mod telemetry;
pub mod wake;
