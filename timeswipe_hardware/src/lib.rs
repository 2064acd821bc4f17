//! Board backends behind the `timeswipe_traits` seams.
//!
//! - `sim`: sine/constant simulated front end with fault injection, simulated button
//! - `bus`: chunk decoding for the parallel GPIO data bus
//! - `command`: SPI text command encoding
//! - `gpio` (feature `hardware`): rppal-backed front end and button
//! - `rt` (feature `rt`): memory locking and CPU pinning

pub mod bus;
pub mod command;
pub mod error;
pub mod sim;
pub mod util;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

#[cfg(all(feature = "rt", target_os = "linux"))]
pub mod rt;

pub use sim::{ButtonHandle, SimControl, SimulatedButton, SimulatedFrontend, Waveform};
