//! Event-flag channel between interrupt handlers and tasks.
//!
//! Each bit of the word is an independent flag with a single producer (an
//! ISR) and a single consumer (a task). Handlers post and return; tasks
//! take or wait. There is no other shared state behind a flag.

use core::sync::atomic::{AtomicU32, Ordering};

/// A set of up to 32 independent event flags.
#[derive(Debug)]
pub struct EventFlags(AtomicU32);

impl EventFlags {
    pub const fn new() -> Self {
        EventFlags(AtomicU32::new(0))
    }

    /// Raises the flags in `mask`. Safe from interrupt context.
    pub fn post(&self, mask: u32) {
        self.0.fetch_or(mask, Ordering::Release);
    }

    /// Atomically clears and returns whichever flags of `mask` were raised.
    pub fn take(&self, mask: u32) -> u32 {
        self.0.fetch_and(!mask, Ordering::Acquire) & mask
    }

    /// Currently raised flags, left in place.
    pub fn peek(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Blocks until at least one flag of `mask` is raised, then clears and
    /// returns the raised subset. This is a task-side suspension point; it
    /// must not be called from a handler.
    pub fn wait_any(&self, mask: u32) -> u32 {
        loop {
            let taken = self.take(mask);
            if taken != 0 {
                return taken;
            }
            // Idle until some interrupt delivers news.
            #[cfg(target_os = "none")]
            cortex_m::asm::wfi();
            #[cfg(not(target_os = "none"))]
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDID_RECEIVED: u32 = 1 << 0;
    const EDID_ERROR: u32 = 1 << 1;

    #[test]
    fn post_take_roundtrip() {
        let flags = EventFlags::new();
        assert_eq!(flags.take(EDID_RECEIVED | EDID_ERROR), 0);

        flags.post(EDID_RECEIVED);
        assert_eq!(flags.peek(), EDID_RECEIVED);
        assert_eq!(flags.take(EDID_RECEIVED | EDID_ERROR), EDID_RECEIVED);
        // Taking consumed it.
        assert_eq!(flags.peek(), 0);
    }

    #[test]
    fn take_only_touches_the_mask() {
        let flags = EventFlags::new();
        flags.post(EDID_RECEIVED | EDID_ERROR);
        assert_eq!(flags.take(EDID_ERROR), EDID_ERROR);
        assert_eq!(flags.peek(), EDID_RECEIVED);
    }

    #[test]
    fn wait_returns_posted_subset() {
        let flags = EventFlags::new();
        flags.post(EDID_ERROR);
        assert_eq!(flags.wait_any(EDID_RECEIVED | EDID_ERROR), EDID_ERROR);
    }
}
