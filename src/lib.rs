//! VGA viewer driver library.
//!
//! Turns a linear framebuffer in RAM into a continuously clocked analog VGA
//! signal (RGB + HSync + VSync) on an STM32F407, with EDID-based monitor
//! detection over DDC2B and SD-card content feeding the framebuffer.
//!
//! The modules at the top level are architecture-independent and can be
//! exercised on the host; the hardware driver proper lives in [`driver`] and
//! only builds for the target.

#![cfg_attr(not(test), no_std)]

pub mod arena;
pub mod clock;
pub mod console;
pub mod edid;
pub mod mode;
pub mod presence;
pub mod scanout;
pub mod screen;
pub mod sd;
pub mod state;
pub mod timing;
pub mod util;

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        pub mod driver;

        // Pick a panicking behavior. The halt flavour is the one to use
        // with a debugger attached and no ITM sink.
        cfg_if::cfg_if! {
            if #[cfg(feature = "panic-itm")] {
                use panic_itm as _;
            } else if #[cfg(feature = "panic-halt")] {
                use panic_halt as _;
            }
        }
    }
}

/// Maximum number of visible pixels in a scanline.
///
/// Timing limitations mean we can't really pull off modes above 800x600, so
/// we'll use this fact to size some data structures.
pub const MAX_PIXELS_PER_LINE: usize = 800;

/// Errors surfaced by configuration-time operations across the driver.
///
/// Runtime faults during scan-out are reported separately, through the event
/// flag the engine shares with the main task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VgaError {
    /// A parameter failed validation (e.g. a porch larger than the visible
    /// area).
    InvalidParameter,
    /// The arena cannot satisfy the framebuffer allocation.
    OutOfMemory,
    /// The request is valid but this implementation cannot produce it: clock
    /// plan infeasible, mode not advertised, or blanking too short for DMA
    /// rearm.
    Unsupported,
    /// Operation called in the wrong engine state.
    InvalidState,
    /// The scan-out engine has faulted and must be stopped.
    DmaFault,
}
