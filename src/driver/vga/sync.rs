//! Clock application and sync-generator timer programming.
//!
//! Three counters, one clock: TIM1 free-runs at the APB2 timer rate and its
//! update event is the master tick (one streamed byte, and the DMA
//! request). TIM4 counts TIM1 updates and shapes a scanline: CH1 is the
//! HSync pulse on PB6, CH2/CH3 raise the start/end-of-active interrupts.
//! TIM3 counts TIM4 updates (whole lines) and shapes the frame: CH1 is the
//! VSync pulse on PB4. Both slave counters use counter zero = start of the
//! sync pulse.

use stm32f4::stm32f407 as device;

use crate::clock::ClockConfig;
use crate::scanout::{Polarity, ScanoutPlan};

macro_rules! block_while {
    ($condition:expr) => {
        while $condition {}
    };
}

macro_rules! block_until {
    ($condition:expr) => {
        block_while!(!$condition)
    };
}

fn ahb_divisor_variant(divisor: u16) -> device::rcc::cfgr::HPREW {
    use device::rcc::cfgr::HPREW;
    match divisor {
        1 => HPREW::DIV1,
        2 => HPREW::DIV2,
        4 => HPREW::DIV4,
        8 => HPREW::DIV8,
        16 => HPREW::DIV16,
        64 => HPREW::DIV64,
        128 => HPREW::DIV128,
        256 => HPREW::DIV256,
        _ => HPREW::DIV512,
    }
}

fn apb1_divisor_variant(divisor: u8) -> device::rcc::cfgr::PPRE1W {
    use device::rcc::cfgr::PPRE1W;
    match divisor {
        1 => PPRE1W::DIV1,
        2 => PPRE1W::DIV2,
        4 => PPRE1W::DIV4,
        8 => PPRE1W::DIV8,
        _ => PPRE1W::DIV16,
    }
}

fn apb2_divisor_variant(divisor: u8) -> device::rcc::cfgr::PPRE2W {
    use device::rcc::cfgr::PPRE2W;
    match divisor {
        1 => PPRE2W::DIV1,
        2 => PPRE2W::DIV2,
        4 => PPRE2W::DIV4,
        8 => PPRE2W::DIV8,
        _ => PPRE2W::DIV16,
    }
}

fn pllp_variant(divisor: u8) -> device::rcc::pllcfgr::PLLPW {
    use device::rcc::pllcfgr::PLLPW;
    match divisor {
        2 => PLLPW::DIV2,
        4 => PLLPW::DIV4,
        6 => PLLPW::DIV6,
        _ => PLLPW::DIV8,
    }
}

fn latency_variant(wait_states: u8) -> device::flash::acr::LATENCYW {
    use device::flash::acr::LATENCYW;
    match wait_states {
        0 => LATENCYW::WS0,
        1 => LATENCYW::WS1,
        2 => LATENCYW::WS2,
        3 => LATENCYW::WS3,
        4 => LATENCYW::WS4,
        5 => LATENCYW::WS5,
        6 => LATENCYW::WS6,
        _ => LATENCYW::WS7,
    }
}

/// Applies `cfg` to the RCC and flash controller. The algorithm can move
/// between any two valid configs by parking on the internal oscillator
/// while the PLL is reprogrammed.
pub fn apply_clock_config(
    rcc: &device::RCC,
    flash: &device::FLASH,
    cfg: &ClockConfig,
) {
    // Switch to the internal 16MHz oscillator while messing with the PLL.
    rcc.cr.modify(|_, w| w.hsion().set_bit());
    block_until! { rcc.cr.read().hsirdy().bit() }
    rcc.cfgr
        .modify(|_, w| w.sw().variant(device::rcc::cfgr::SWW::HSI));
    block_until! { rcc.cfgr.read().sws() == device::rcc::cfgr::SWSR::HSI }

    // Turn off the PLL.
    rcc.cr.modify(|_, w| w.pllon().clear_bit());
    block_while! { rcc.cr.read().pllrdy().bit() }

    // Apply divisors before boosting frequency.
    rcc.cfgr.modify(|_, w| {
        w.hpre()
            .variant(ahb_divisor_variant(cfg.ahb_divisor))
            .ppre1()
            .variant(apb1_divisor_variant(cfg.apb1_divisor))
            .ppre2()
            .variant(apb2_divisor_variant(cfg.apb2_divisor))
    });

    flash
        .acr
        .modify(|_, w| w.latency().variant(latency_variant(cfg.flash_latency)));

    // Switch on the crystal oscillator.
    rcc.cr.modify(|_, w| w.hseon().set_bit());
    block_until! { rcc.cr.read().hserdy().bit() }

    // Configure and start the PLL.
    rcc.pllcfgr.modify(|_, w| {
        unsafe {
            w.pllm().bits(cfg.crystal_divisor);
            w.plln().bits(cfg.vco_multiplier);
            w.pllq().bits(cfg.pll48_divisor);
        }
        w.pllp()
            .variant(pllp_variant(cfg.general_divisor))
            .pllsrc()
            .variant(device::rcc::pllcfgr::PLLSRCW::HSE)
    });

    rcc.cr.modify(|_, w| w.pllon().set_bit());
    block_until! { rcc.cr.read().pllrdy().bit() }

    // Select the PLL as the system clock source.
    rcc.cfgr
        .modify(|_, w| w.sw().variant(device::rcc::cfgr::SWW::PLL));
    block_until! { rcc.cfgr.read().sws() == device::rcc::cfgr::SWSR::PLL }
}

/// Programs the three-counter chain from a scan-out plan. All counters are
/// left stopped, at zero.
pub fn configure_timers(
    plan: &ScanoutPlan,
    tim1: &device::TIM1,
    tim4: &device::TIM4,
    tim3: &device::TIM3,
) {
    // Master byte pacer: free-running, update = one streamed byte. URS
    // keeps slave-triggering software updates from also firing DMA.
    tim1.cr1.write(|w| w.urs().counter_only());
    tim1.psc.reset();
    tim1.arr
        .write(|w| unsafe { w.bits(u32::from(plan.master_reload) - 1) });
    tim1.cnt.write(|w| unsafe { w.bits(0) });
    // Distribute the update event as TRGO for TIM4, and as the DMA request.
    tim1.cr2.write(|w| w.mms().update());
    tim1.dier.write(|w| w.ude().set_bit());

    // HSync counter: clocked by TIM1 update (ITR0, external clock mode 1).
    tim4.cr1.write(|w| w.urs().counter_only());
    tim4.psc.reset();
    tim4.arr
        .write(|w| unsafe { w.bits(u32::from(plan.hsync_period) - 1) });
    tim4.cnt.write(|w| unsafe { w.bits(0) });
    tim4.smcr.write(|w| unsafe { w.ts().bits(0b000).sms().bits(0b111) });
    // Line boundary (update) clocks the VSync counter.
    tim4.cr2.write(|w| w.mms().update());

    // CH1: sync pulse, asserted from counter zero. PWM1 with the polarity
    // bit selecting active-low.
    tim4.ccr1
        .write(|w| unsafe { w.bits(u32::from(plan.hsync_pulse)) });
    tim4.ccmr1_output.write(|w| {
        unsafe { w.oc1m().bits(0b110) }; // PWM mode 1
        unsafe { w.cc1s().bits(0b00) }; // output
        w
    });
    tim4.ccer.write(|w| {
        w.cc1e()
            .set_bit()
            .cc1p()
            .bit(plan.hsync_polarity == Polarity::Negative)
    });

    // CH2/CH3: start / end of active video interrupts.
    tim4.ccr2
        .write(|w| unsafe { w.bits(u32::from(plan.video_start)) });
    tim4.ccr3
        .write(|w| unsafe { w.bits(u32::from(plan.video_end)) });
    tim4.dier.write(|w| w.cc2ie().set_bit().cc3ie().set_bit());

    // VSync counter: clocked by TIM4 update (ITR3), one count per line.
    tim3.cr1.write(|w| w.urs().counter_only());
    tim3.psc.reset();
    tim3.arr
        .write(|w| unsafe { w.bits(u32::from(plan.vsync_period) - 1) });
    tim3.cnt.write(|w| unsafe { w.bits(0) });
    tim3.smcr.write(|w| unsafe { w.ts().bits(0b011).sms().bits(0b111) });

    tim3.ccr1
        .write(|w| unsafe { w.bits(u32::from(plan.vsync_pulse)) });
    tim3.ccmr1_output.write(|w| {
        unsafe { w.oc1m().bits(0b110) };
        unsafe { w.cc1s().bits(0b00) };
        w
    });
    tim3.ccer.write(|w| {
        w.cc1e()
            .set_bit()
            .cc1p()
            .bit(plan.vsync_polarity == Polarity::Negative)
    });
}

/// Starts the counter chain: slaves armed first, then the master clock.
pub fn start_chain(
    tim1: &device::TIM1,
    tim4: &device::TIM4,
    tim3: &device::TIM3,
) {
    tim3.cr1.modify(|_, w| w.cen().set_bit());
    tim4.cr1.modify(|_, w| w.cen().set_bit());
    tim1.cr1.modify(|_, w| w.cen().set_bit());
}

/// Halts the chain, master first so the slaves stop advancing, and rewinds
/// every counter.
pub fn stop_chain(
    tim1: &device::TIM1,
    tim4: &device::TIM4,
    tim3: &device::TIM3,
) {
    tim1.cr1.modify(|_, w| w.cen().clear_bit());
    tim4.cr1.modify(|_, w| w.cen().clear_bit());
    tim3.cr1.modify(|_, w| w.cen().clear_bit());

    tim1.cnt.write(|w| unsafe { w.bits(0) });
    tim4.cnt.write(|w| unsafe { w.bits(0) });
    tim3.cnt.write(|w| unsafe { w.bits(0) });
    tim4.sr.reset();
    tim3.sr.reset();
}
