//! Per-line DMA descriptor management.
//!
//! One stream does all the work: DMA2 stream 5, channel 6, which is the
//! TIM1 update request. Memory-increment reads walk a framebuffer row;
//! the peripheral side is the low byte of GPIOE's output data register,
//! fixed. The stream is re-armed during horizontal blanking (address and
//! count) and enabled at each start-of-active; completion disables it by
//! itself when the count runs out.

use stm32f4::stm32f407 as device;

/// Low byte of GPIOE ODR, where the eight pixel pins live.
pub const PIXEL_PORT_ADDRESS: u32 = 0x4002_1014;

/// One-time stream setup: FIFO shape and the fixed peripheral address.
pub fn prime(dma: &device::DMA2) {
    dma.s5fcr.write(|w| {
        w.fth()
            .quarter()
            .dmdis()
            .enabled()
            .feie()
            .disabled()
    });
    dma.s5par.write(|w| unsafe { w.bits(PIXEL_PORT_ADDRESS) });
}

/// Points the stream at the next line's bytes. Only legal while the stream
/// is disabled, which is why rearm happens in the blanking window after
/// end-of-active.
pub fn arm_line(dma: &device::DMA2, address: usize, len: u16) {
    dma.s5cr.modify(|_, w| w.en().clear_bit());
    dma.s5m0ar.write(|w| unsafe { w.bits(address as u32) });
    dma.s5ndtr.write(|w| w.ndt().bits(len));
}

/// Starts scan-out of the armed line.
///
/// THIS PATH IS LATENCY SENSITIVE: it runs between the start-of-active
/// interrupt and the first visible pixel. Two register stores, both to
/// fixed addresses.
pub fn start_stream(dma: &device::DMA2) {
    // Stream 5 flags are write-1-to-clear in HIFCR.
    dma.hifcr.write(|w| {
        w.cdmeif5()
            .set_bit()
            .cteif5()
            .set_bit()
            .chtif5()
            .set_bit()
            .ctcif5()
            .set_bit()
    });

    dma.s5cr.write(|w| {
        w.chsel()
            .bits(6)
            .pl()
            .very_high()
            .dir()
            .memory_to_peripheral()
            .minc()
            .set_bit()
            .pinc()
            .clear_bit()
            .msize()
            .byte()
            .psize()
            .byte()
            .pburst()
            .single()
            .mburst()
            .single()
            .teie()
            .set_bit()
            .en()
            .enabled()
    });
}

/// Forces the stream off, e.g. on suspend, stop or fault.
pub fn disable_stream(dma: &device::DMA2) {
    dma.s5cr.modify(|_, w| w.en().clear_bit());
}

/// True while a transfer is still in flight.
pub fn stream_busy(dma: &device::DMA2) -> bool {
    dma.s5cr.read().en().bit_is_set() && dma.s5ndtr.read().bits() != 0
}

/// Whether the stream has latched a transfer error.
pub fn take_error(dma: &device::DMA2) -> bool {
    let failed = dma.hisr.read().teif5().bit_is_set();
    if failed {
        dma.hifcr.write(|w| w.cteif5().set_bit());
    }
    failed
}
