//! Millisecond time base.
//!
//! SysTick runs at the lowest interrupt priority (the engine parks it there
//! during init), so reading the counter costs one load and never perturbs
//! scan-out.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::SYST;

static MILLISECONDS: AtomicU32 = AtomicU32::new(0);

/// Starts the 1 kHz tick. `ahb_hz` must be the running AHB frequency.
pub fn start(syst: &mut SYST, ahb_hz: u32) {
    use cortex_m::peripheral::syst::SystClkSource;

    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(ahb_hz / 1_000 - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

/// Call from the `SysTick` exception handler.
pub fn isr() {
    MILLISECONDS.fetch_add(1, Ordering::Relaxed);
}

/// Milliseconds since [`start`], wrapping.
pub fn now_ms() -> u32 {
    MILLISECONDS.load(Ordering::Relaxed)
}

/// Busy-delay built on the tick, for the coarse protocol waits (SD power
/// cycling, reconnect back-off). Tasks have nothing better to do while
/// these run; interrupts keep the display alive.
pub fn delay_ms(duration: u32) {
    let start = now_ms();
    while now_ms().wrapping_sub(start) < duration {
        cortex_m::asm::wfi();
    }
}
