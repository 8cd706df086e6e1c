//! The scan-out engine.
//!
//! An [`Engine`] value owns every peripheral handle involved in video
//! generation; the constructor takes them by move and there are no hidden
//! globals besides the loan statics the interrupt handlers borrow hardware
//! through. The lifecycle follows the state machine in [`crate::state`]:
//! configure allocates the framebuffer and programs the timer chain, start
//! begins scan-out in vertical blanking, suspend/resume gate the outputs,
//! stop halts the chain and lets the framebuffer go back to the arena.

pub mod dma;
pub mod isr;
pub mod sync;

use stm32f4::stm32f407 as device;

use core::sync::atomic::{AtomicBool, Ordering};
use cortex_m::peripheral as cm;
use cortex_m::peripheral::scb::SystemHandler;

use crate::arena::Arena;
use crate::mode::ModePlan;
use crate::scanout::ScanoutFrequencies;
use crate::screen::FrameBuffer;
use crate::state::{EngineFsm, EngineState, VerticalLayout};
use crate::util::event::EventFlags;
use crate::util::loan::Loan;
use crate::VgaError;

/// Posted at each transition into vertical blanking.
pub const EVT_VBLANK: u32 = 1 << 0;
/// Posted when the engine faults; the owning task must stop it.
pub const EVT_FAULT: u32 = 1 << 1;

/// Engine-to-task event channel.
pub static EVENTS: EventFlags = EventFlags::new();

/// Records when a driver instance has been initialized; there is exactly
/// one video pipeline in the part.
static DRIVER_INIT_FLAG: AtomicBool = AtomicBool::new(false);

/// Latency-critical mirror of "the current line carries pixels", read by
/// the start-of-active path without taking any lock.
static DISPLAY_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Hardware loaned to the horizontal state machine ISR for the life of the
/// driver.
pub(crate) struct HstateHw {
    pub tim1: device::TIM1,
    pub tim4: device::TIM4,
    pub dma2: device::DMA2,
}

pub(crate) static HSTATE_HW: Loan<HstateHw> = Loan::empty();

/// Scan-out bookkeeping loaned to the end-of-active handler for the life
/// of one mode: present between configure and stop, absent otherwise.
pub(crate) struct ScanState {
    pub fsm: EngineFsm,
    pub layout: VerticalLayout,
    /// Current scanline, counter-zero = start of vertical sync.
    pub line: u16,
    /// Base address of the half being scanned out.
    pub base: usize,
    pub stride: usize,
    pub transfer_len: u16,
}

pub(crate) static SCAN: Loan<ScanState> = Loan::empty();

/// Masks the two scan-out interrupts before the engine attends its loans.
/// The trailing barriers make the mask architecturally complete on return;
/// a bare NVIC write can lag by several instructions, long enough for a
/// handler to land in the middle of a loan change.
fn mask_scanout_irqs(nvic: &mut cm::NVIC) {
    nvic.disable(device::Interrupt::TIM4);
    nvic.disable(device::Interrupt::DMA2_STREAM5);
    cortex_m::asm::dmb();
    cortex_m::asm::isb();
}

/// Counterpart of [`mask_scanout_irqs`]; anything that pended while masked
/// is taken immediately after the barriers.
fn unmask_scanout_irqs(nvic: &mut cm::NVIC) {
    nvic.enable(device::Interrupt::TIM4);
    nvic.enable(device::Interrupt::DMA2_STREAM5);
    cortex_m::asm::dmb();
    cortex_m::asm::isb();
}

/// The scan-out engine. See the module docs for the lifecycle.
pub struct Engine {
    rcc: device::RCC,
    gpiob: device::GPIOB,
    gpioe: device::GPIOE,
    tim3: device::TIM3,
    nvic: cm::NVIC,

    framebuffer: Option<FrameBuffer>,
    mode: Option<ModePlan>,
}

/// Brings up the video hardware and returns the engine value that owns it.
///
/// # Panics
///
/// If called twice; teardown of the static loans is not supported.
pub fn init(
    mut nvic: cm::NVIC,
    scb: &mut cm::SCB,
    dbg: &device::DBG,
    flash: &device::FLASH,
    rcc: device::RCC,
    gpiob: device::GPIOB,
    gpioe: device::GPIOE,
    tim1: device::TIM1,
    tim3: device::TIM3,
    tim4: device::TIM4,
    dma2: device::DMA2,
) -> Engine {
    let previous_instance = DRIVER_INIT_FLAG.swap(true, Ordering::SeqCst);
    assert!(!previous_instance);

    // Power up everything the pipeline touches.
    rcc.ahb1enr.modify(|_, w| {
        w.gpioben().enabled().gpioeen().enabled().dma2en().enabled()
    });
    rcc.apb2enr.modify(|_, w| w.tim1en().enabled());
    rcc.apb1enr
        .modify(|_, w| w.tim3en().enabled().tim4en().enabled());

    dma::prime(&dma2);

    // Interrupt priorities: the horizontal state machine outranks
    // everything; the DMA fault path comes next; SysTick scavenges what's
    // left. Safe because no interrupt is enabled yet.
    unsafe {
        nvic.set_priority(device::Interrupt::TIM4, 0x00);
        nvic.set_priority(device::Interrupt::DMA2_STREAM5, 0x20);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }

    // Enable Flash cache and prefetching to reduce jitter.
    flash
        .acr
        .modify(|_, w| w.dcen().enabled().icen().enabled().prften().enabled());

    // Stop all video-related timers on debug halt, which makes debugging
    // waaaaay easier.
    dbg.dbgmcu_apb1_fz
        .modify(|_, w| w.dbg_tim4_stop().set_bit().dbg_tim3_stop().set_bit());
    dbg.dbgmcu_apb2_fz.modify(|_, w| w.dbg_tim1_stop().set_bit());

    HSTATE_HW.attend(|slot| *slot = Some(HstateHw { tim1, tim4, dma2 }));

    let engine = Engine {
        rcc,
        gpiob,
        gpioe,
        tim3,
        nvic,
        framebuffer: None,
        mode: None,
    };
    engine.sync_off();
    engine.video_off();
    engine
}

impl Engine {
    /// Runs `body` with the scan-out interrupts held off, so the task side
    /// can attend the loans without a handler claiming them mid-change.
    /// Only the start-of-active path is latency sensitive, and that path
    /// is a no-op during blanking, which is when the engine uses this.
    fn with_hstate_masked<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> R,
    ) -> R {
        mask_scanout_irqs(&mut self.nvic);
        let result = body(self);
        unmask_scanout_irqs(&mut self.nvic);
        result
    }

    /// Allocates the framebuffer and programs the timer chain for `plan`.
    /// The engine ends up `Configured`, timers stopped.
    pub fn configure(
        &mut self,
        plan: &ModePlan,
        arena: &Arena,
    ) -> Result<(), VgaError> {
        if self.mode.is_some() {
            return Err(VgaError::InvalidState);
        }

        // Allocate first: cheaper to fail before touching the hardware.
        let framebuffer = FrameBuffer::allocate(
            arena,
            plan.request.bits_per_pixel,
            plan.scaled.horizontal.visible,
            plan.scaled.vertical.visible,
            plan.request.double_buffered,
        )?;

        self.video_off();
        self.sync_off();

        {
            // The scan-out interrupts are off in every state that allows
            // configure, so claiming from task code is race-free here.
            let hw = HSTATE_HW.claim();

            // Busy-wait for any straggling transfer before reprogramming.
            dma::disable_stream(&hw.dma2);
            while hw.dma2.s5cr.read().en().bit_is_set() {}

            // Pulse the counters through reset so no state from a previous
            // mode leaks into this one.
            self.rcc
                .apb1rstr
                .modify(|_, w| w.tim3rst().set_bit().tim4rst().set_bit());
            self.rcc.apb2rstr.modify(|_, w| w.tim1rst().set_bit());
            cortex_m::asm::dsb();
            self.rcc
                .apb1rstr
                .modify(|_, w| w.tim3rst().clear_bit().tim4rst().clear_bit());
            self.rcc.apb2rstr.modify(|_, w| w.tim1rst().clear_bit());

            sync::configure_timers(
                &plan.scanout,
                &hw.tim1,
                &hw.tim4,
                &self.tim3,
            );
        }

        DISPLAY_ACTIVE.store(false, Ordering::Relaxed);
        SCAN.attend(|slot| {
            *slot = Some(ScanState {
                fsm: EngineFsm::new(),
                layout: VerticalLayout::from_plan(&plan.scanout),
                line: 0,
                base: framebuffer.scan_base() as usize,
                stride: framebuffer.stride(),
                transfer_len: plan.scanout.transfer_len,
            })
        });

        self.framebuffer = Some(framebuffer);
        self.mode = Some(*plan);
        Ok(())
    }

    /// Starts scan-out. The first frame begins at the top of vertical
    /// blanking so the first visible line is armed like every other one.
    pub fn start(&mut self) -> Result<(), VgaError> {
        SCAN.attend(|slot| {
            let scan = slot.as_mut().ok_or(VgaError::InvalidState)?;
            scan.fsm.start()?;
            scan.line = 0;
            Ok(())
        })?;
        DISPLAY_ACTIVE.store(false, Ordering::Relaxed);

        // Kick the chain before unmasking: the first events pend harmlessly
        // for the instant until the NVIC lets them through, and no handler
        // can contend for the hardware loan while we still hold it.
        {
            let hw = HSTATE_HW.claim();
            sync::start_chain(&hw.tim1, &hw.tim4, &self.tim3);
        }

        unmask_scanout_irqs(&mut self.nvic);

        self.sync_on();
        self.video_on();
        Ok(())
    }

    /// Disables DMA and sync outputs but leaves the counters running.
    pub fn suspend(&mut self) -> Result<(), VgaError> {
        self.with_hstate_masked(|engine| {
            SCAN.attend(|slot| {
                slot.as_mut().ok_or(VgaError::InvalidState)?.fsm.suspend()
            })?;
            DISPLAY_ACTIVE.store(false, Ordering::Relaxed);

            let hw = HSTATE_HW.claim();
            // Let the current line finish rather than tearing it mid-wire;
            // only the fault path cuts a transfer short.
            while dma::stream_busy(&hw.dma2) {}
            dma::disable_stream(&hw.dma2);
            drop(hw);

            engine.sync_off();
            engine.video_off();
            Ok(())
        })
    }

    /// Re-enables outputs after a suspend. Scan-out picks the beam position
    /// back up within a line.
    pub fn resume(&mut self) -> Result<(), VgaError> {
        self.with_hstate_masked(|engine| {
            SCAN.attend(|slot| {
                slot.as_mut().ok_or(VgaError::InvalidState)?.fsm.resume()
            })?;
            engine.sync_on();
            engine.video_on();
            Ok(())
        })
    }

    /// Halts the timer chain and releases the DMA stream. The framebuffer
    /// stays allocated until [`Engine::release_framebuffer`].
    pub fn stop(&mut self) -> Result<(), VgaError> {
        mask_scanout_irqs(&mut self.nvic);

        SCAN.attend(|slot| {
            match slot.as_mut() {
                Some(state) => state.fsm.stop()?,
                None => return Err(VgaError::InvalidState),
            }
            *slot = None;
            Ok(())
        })?;

        // Whatever pended while we masked is now about a revoked loan.
        cm::NVIC::unpend(device::Interrupt::TIM4);
        cm::NVIC::unpend(device::Interrupt::DMA2_STREAM5);

        {
            let hw = HSTATE_HW.claim();
            // Same end-of-line courtesy as suspend.
            while dma::stream_busy(&hw.dma2) {}
            dma::disable_stream(&hw.dma2);
            sync::stop_chain(&hw.tim1, &hw.tim4, &self.tim3);
        }

        DISPLAY_ACTIVE.store(false, Ordering::Relaxed);
        self.mode = None;

        self.sync_off();
        self.video_off();
        Ok(())
    }

    /// Gives the framebuffer back to the arena. Only legal once stopped.
    pub fn release_framebuffer(
        &mut self,
        arena: &Arena,
    ) -> Result<(), VgaError> {
        if self.mode.is_some() {
            return Err(VgaError::InvalidState);
        }
        match self.framebuffer.take() {
            Some(framebuffer) => framebuffer.release(arena),
            None => Err(VgaError::InvalidState),
        }
    }

    /// The drawing surface, while a mode is configured.
    pub fn framebuffer_mut(&mut self) -> Option<&mut FrameBuffer> {
        self.framebuffer.as_mut()
    }

    pub fn mode(&self) -> Option<&ModePlan> {
        self.mode.as_ref()
    }

    /// Engine state as last observed by the scan-out machinery.
    pub fn state(&mut self) -> EngineState {
        self.with_hstate_masked(|_| {
            SCAN.attend(|slot| match slot {
                Some(scan) => scan.fsm.state(),
                None => EngineState::Stopped,
            })
        })
    }

    /// Realised counter frequencies for the configuration dump.
    pub fn frequencies(&self) -> Option<ScanoutFrequencies> {
        let mode = self.mode.as_ref()?;
        Some(mode.scanout.frequencies(&mode.clock))
    }

    /// Double-buffered presentation: waits for the next vertical blanking
    /// interval, then swaps halves. A no-op when single-buffered (the
    /// writer races the beam by contract).
    pub fn present(&mut self) -> Result<(), VgaError> {
        let framebuffer = match self.framebuffer.as_mut() {
            Some(framebuffer) => framebuffer,
            None => return Err(VgaError::InvalidState),
        };
        if !framebuffer.double_buffered() {
            return Ok(());
        }

        // Drop any stale edge so we wait for a fresh one.
        EVENTS.take(EVT_VBLANK);
        EVENTS.wait_any(EVT_VBLANK);

        framebuffer.swap();
        let base = framebuffer.scan_base() as usize;
        self.with_hstate_masked(|_| {
            SCAN.attend(|slot| {
                slot.as_mut().ok_or(VgaError::InvalidState)?.base = base;
                Ok(())
            })
        })
    }

    /// Configures PB6 (HSync, TIM4_CH1) and PB4 (VSync, TIM3_CH1) for
    /// fairly sharp edges on their alternate functions.
    fn sync_on(&self) {
        self.gpiob
            .ospeedr
            .modify(|_, w| w.ospeedr4().high_speed().ospeedr6().high_speed());
        self.gpiob
            .pupdr
            .modify(|_, w| w.pupdr4().floating().pupdr6().floating());
        self.gpiob
            .afrl
            .modify(|_, w| w.afrl4().af2().afrl6().af2());
        self.gpiob
            .moder
            .modify(|_, w| w.moder4().alternate().moder6().alternate());
    }

    fn sync_off(&self) {
        self.gpiob
            .moder
            .modify(|_, w| w.moder4().input().moder6().input());
        self.gpiob
            .pupdr
            .modify(|_, w| w.pupdr4().pull_down().pupdr6().pull_down());
    }

    /// Enables the pixel output port, PE0-7.
    fn video_on(&mut self) {
        self.gpioe.pupdr.modify(|_, w| {
            w.pupdr0()
                .floating()
                .pupdr1()
                .floating()
                .pupdr2()
                .floating()
                .pupdr3()
                .floating()
                .pupdr4()
                .floating()
                .pupdr5()
                .floating()
                .pupdr6()
                .floating()
                .pupdr7()
                .floating()
        });
        // Sharp edges here too; at the pixel rate the default drive is mush.
        self.gpioe.ospeedr.modify(|_, w| {
            w.ospeedr0()
                .very_high_speed()
                .ospeedr1()
                .very_high_speed()
                .ospeedr2()
                .very_high_speed()
                .ospeedr3()
                .very_high_speed()
                .ospeedr4()
                .very_high_speed()
                .ospeedr5()
                .very_high_speed()
                .ospeedr6()
                .very_high_speed()
                .ospeedr7()
                .very_high_speed()
        });
        self.gpioe.moder.modify(|_, w| {
            w.moder0()
                .output()
                .moder1()
                .output()
                .moder2()
                .output()
                .moder3()
                .output()
                .moder4()
                .output()
                .moder5()
                .output()
                .moder6()
                .output()
                .moder7()
                .output()
        });
    }

    /// Disables video output. Not synchronized with the frame; callers who
    /// care go through suspend/stop, which are.
    fn video_off(&self) {
        self.gpioe.pupdr.modify(|_, w| {
            w.pupdr0()
                .pull_down()
                .pupdr1()
                .pull_down()
                .pupdr2()
                .pull_down()
                .pupdr3()
                .pull_down()
                .pupdr4()
                .pull_down()
                .pupdr5()
                .pull_down()
                .pupdr6()
                .pull_down()
                .pupdr7()
                .pull_down()
        });
        self.gpioe.moder.modify(|_, w| {
            w.moder0()
                .input()
                .moder1()
                .input()
                .moder2()
                .input()
                .moder3()
                .input()
                .moder4()
                .input()
                .moder5()
                .input()
                .moder6()
                .input()
                .moder7()
                .input()
        });
    }
}
