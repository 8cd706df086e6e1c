//! Interrupt handlers for the horizontal state machine and the DMA fault
//! path.
//!
//! The application must wire these to the vector table:
//!
//! ```ignore
//! #[interrupt]
//! fn TIM4() {
//!     vgaview::driver::vga::isr::hstate_isr()
//! }
//!
//! #[interrupt]
//! fn DMA2_STREAM5() {
//!     vgaview::driver::vga::isr::dma_isr()
//! }
//! ```

use stm32f4::stm32f407 as device;

use core::sync::atomic::Ordering;

use super::{dma, HstateHw, ScanState, DISPLAY_ACTIVE, EVENTS, EVT_FAULT,
            EVT_VBLANK, HSTATE_HW, SCAN};
use crate::driver::measurement;
use crate::state::{EngineState, LineEvent};

/// Horizontal state machine ISR: call this from `TIM4`.
pub fn hstate_isr() {
    measurement::hstate_enter();

    let hw = HSTATE_HW.claim();

    let sr = hw.tim4.sr.read();
    // SR flags are cleared by writing zero; writing the read value back
    // with the handled bits cleared leaves the rest alone.
    hw.tim4.sr.write(|w| {
        unsafe { w.bits(sr.bits()) }
            .cc2if()
            .clear_bit()
            .cc3if()
            .clear_bit()
    });

    // CC2 is start-of-active video.
    //
    // THIS PATH IS LATENCY SENSITIVE.
    if sr.cc2if().bit_is_set() && DISPLAY_ACTIVE.load(Ordering::Relaxed) {
        dma::start_stream(&hw.dma2);
    }

    // CC3 is end-of-active video: the line state machine. Not latency
    // sensitive, but it owns the whole blanking window. The scan loan is
    // present whenever this interrupt is unmasked.
    if sr.cc3if().bit_is_set() {
        let mut scan = SCAN.claim();
        end_of_active_video(&hw, &mut scan);
    }

    measurement::hstate_exit();
}

/// Advances the vertical state machine by one line and re-arms the stream
/// for the next visible row.
fn end_of_active_video(hw: &HstateHw, scan: &mut ScanState) {
    // A stream still mid-transfer at end-of-active means scan-out starved:
    // the line on the wire was incomplete.
    if DISPLAY_ACTIVE.load(Ordering::Relaxed) && dma::stream_busy(&hw.dma2) {
        raise_fault(&hw.dma2, scan);
        return;
    }

    let (next, event) = scan.layout.advance(scan.line);
    scan.line = next;

    // The FSM transitions are gated on the running substates so that a
    // suspended engine keeps walking lines without fighting the task side.
    match event {
        LineEvent::EnterActive => {
            if scan.fsm.state() == EngineState::RunningVsync {
                let _ = scan.fsm.enter_active();
            }
        }
        LineEvent::EnterVsync => {
            if scan.fsm.state() == EngineState::RunningActive {
                let _ = scan.fsm.enter_vsync();
            }
            // Guarantee analogue black through the blanking region, then
            // let the tasks know the frame ended.
            force_pixels_black();
            EVENTS.post(EVT_VBLANK);
        }
        LineEvent::None => {}
    }

    let displayed = scan.fsm.state() == EngineState::RunningActive;
    DISPLAY_ACTIVE.store(displayed, Ordering::Relaxed);

    // Point the stream at the row the upcoming line displays. The back
    // porch is the slack window for this; the plan already refused any
    // timing that makes it too short.
    if displayed {
        if let Some(row) = scan.layout.fb_row(next) {
            let address = scan.base + usize::from(row) * scan.stride;
            dma::arm_line(&hw.dma2, address, scan.transfer_len);
        }
    }
}

/// DMA stream fault ISR: call this from `DMA2_STREAM5`.
pub fn dma_isr() {
    measurement::fault_enter();

    let hw = HSTATE_HW.claim();
    if dma::take_error(&hw.dma2) {
        let mut scan = SCAN.claim();
        raise_fault(&hw.dma2, &mut scan);
    }

    measurement::fault_exit();
}

fn raise_fault(dma2: &device::DMA2, scan: &mut ScanState) {
    dma::disable_stream(dma2);
    force_pixels_black();
    scan.fsm.fault();
    DISPLAY_ACTIVE.store(false, Ordering::Relaxed);
    EVENTS.post(EVT_FAULT);
}

/// Drives the eight pixel pins low. BSRR writes are atomic, so this is safe
/// from any context regardless of who owns GPIOE.
fn force_pixels_black() {
    let gpioe = unsafe { &*device::GPIOE::ptr() };
    gpioe.bsrr.write(|w| {
        w.br0()
            .set_bit()
            .br1()
            .set_bit()
            .br2()
            .set_bit()
            .br3()
            .set_bit()
            .br4()
            .set_bit()
            .br5()
            .set_bit()
            .br6()
            .set_bit()
            .br7()
            .set_bit()
    });
}
