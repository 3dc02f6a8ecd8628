#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate panic_halt;

mod baud;

#[cfg(target_os = "none")]
mod hw;
#[cfg(target_os = "none")]
mod runtime;
#[cfg(target_os = "none")]
mod telemetry;

#[cfg(not(target_os = "none"))]
fn main() {}
