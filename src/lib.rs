//! Motion-control firmware core for a two-axis stereolithography printer.
//!
//! The printer builds parts by curing resin one slice at a time; between
//! exposures the controller peels the cured layer off the tray by rotating
//! the tray (R axis) while lifting the build head (Z axis). This crate
//! contains everything between the host's command frames and the step pins:
//!
//! - a constant-jerk S-curve planner feeding a ring of planning blocks,
//! - a segment executor that slices the running block into millisecond-scale
//!   velocity segments using forward differences,
//! - a two-axis DDA that turns segments into step pulses from a
//!   high-priority timer interrupt,
//! - and the controller state machine that sequences it all from command
//!   frames received over the bus.
//!
//! Everything except the `driver` module is architecture-independent so the
//! whole kernel can be exercised on the host; the driver binds it to the
//! STM32F4 timers, I2C slave peripheral and GPIO.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod block;
pub mod command;
pub mod command_map;
pub mod controller;
pub mod event_queue;
pub mod machine;
pub mod motion;
pub mod planner;
pub mod priority;
pub mod settings;
pub mod stepper;
pub mod util;

mod exec;
mod fp;

/// The two independently driven axes.
///
/// Z lifts the build head (units: microns); R rotates the tray (units:
/// millidegrees).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Axis {
    Z = 0,
    R = 1,
}

pub const AXIS_COUNT: usize = 2;

pub const AXES: [Axis; AXIS_COUNT] = [Axis::Z, Axis::R];

impl Axis {
    /// Index into per-axis arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        pub mod driver;
    }
}
