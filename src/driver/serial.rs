//! UART4 console transport: 9600 8N1, blocking transmit, single-byte
//! interrupt receive.
//!
//! Received bytes land in a one-deep command slot; the main task polls it
//! between frames and re-arms the receive, mirroring the one-command-at-a-
//! time protocol of the console. Wire the vector:
//!
//! ```ignore
//! #[interrupt]
//! fn UART4() {
//!     vgaview::driver::serial::isr()
//! }
//! ```

use stm32f4::stm32f407 as device;

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::console::Console;

static RX_BYTE: AtomicU8 = AtomicU8::new(0);
static RX_READY: AtomicBool = AtomicBool::new(false);

/// The console transport, owning UART4.
pub struct SerialConsole {
    uart: device::UART4,
}

/// Configures UART4. The peripheral clock must already be enabled and the
/// pins set to their alternate function.
pub fn init(uart: device::UART4, pclk1_hz: u32, baud: u32) -> SerialConsole {
    // Oversampling by 16: BRR is the divider in sixteenths, which is just
    // the clock/baud quotient with the fraction in the low nibble.
    uart.brr.write(|w| unsafe { w.bits(pclk1_hz / baud) });
    uart.cr2.reset(); // one stop bit
    uart.cr3.reset(); // no flow control
    uart.cr1.write(|w| {
        w.ue()
            .set_bit()
            .te()
            .set_bit()
            .re()
            .set_bit()
    });

    SerialConsole { uart }
}

impl SerialConsole {
    /// Arms the single-byte receive interrupt. Each delivered byte disarms
    /// it again, so the task re-issues after consuming the slot.
    pub fn listen(&mut self) {
        RX_READY.store(false, Ordering::Relaxed);
        self.uart.cr1.modify(|_, w| w.rxneie().set_bit());
    }

    /// Aborts a pending receive, e.g. during disconnect teardown.
    pub fn abort_receive(&mut self) {
        self.uart.cr1.modify(|_, w| w.rxneie().clear_bit());
        RX_READY.store(false, Ordering::Relaxed);
    }
}

impl Console for SerialConsole {
    fn write_byte(&mut self, byte: u8) {
        // Transmit-and-wait; at 9600 baud nobody is in a hurry.
        while self.uart.sr.read().txe().bit_is_clear() {}
        self.uart.dr.write(|w| unsafe { w.bits(u32::from(byte)) });
    }

    fn poll_byte(&mut self) -> Option<u8> {
        if RX_READY.swap(false, Ordering::Acquire) {
            Some(RX_BYTE.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// UART4 ISR: captures one byte into the command slot.
pub fn isr() {
    // Safety: reads of SR/DR and the rxneie clear are atomic accesses that
    // the owning task cannot observe half-done.
    let uart = unsafe { &*device::UART4::ptr() };
    let sr = uart.sr.read();

    if sr.ore().bit_is_set() || sr.fe().bit_is_set() {
        // Reading SR then DR clears the error flags; drop the byte and let
        // the task's next listen() reissue the receive.
        let _ = uart.dr.read();
        return;
    }

    if sr.rxne().bit_is_set() {
        let byte = uart.dr.read().bits() as u8;
        uart.cr1.modify(|_, w| w.rxneie().clear_bit());
        RX_BYTE.store(byte, Ordering::Relaxed);
        RX_READY.store(true, Ordering::Release);
    }
}
