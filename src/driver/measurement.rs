//! Diagnostic timing waveforms, compiled out unless the `measurement`
//! feature is set.
//!
//! Two windows are traced: PC8 is high while the horizontal state machine
//! ISR runs, PC9 while the DMA fault ISR runs. Next to HSync on a scope,
//! the pair shows how much of each blanking window the handlers eat.
//! This circumvents hardware ownership: if the application drives PC8 or
//! PC9 itself, weird stuff ensues.

#[cfg(feature = "measurement")]
use stm32f4::stm32f407 as device;

/// Powers GPIOC and claims PC8/PC9 as outputs when the feature is on.
///
/// # Safety
///
/// Safe as long as it's not preempted by anything that configures RCC or
/// GPIOC. Call it early in `main` and you're good.
pub unsafe fn init() {
    #[cfg(feature = "measurement")]
    {
        let rcc = &*device::RCC::ptr();
        let gpioc = &*device::GPIOC::ptr();

        rcc.ahb1enr.modify(|_, w| w.gpiocen().set_bit());
        gpioc
            .pupdr
            .modify(|_, w| w.pupdr8().floating().pupdr9().floating());
        gpioc
            .moder
            .modify(|_, w| w.moder8().output().moder9().output());
    }
}

/// Marks entry into the horizontal state machine ISR.
pub fn hstate_enter() {
    // Safety (here and below): BSRR writes are atomic and idempotent.
    #[cfg(feature = "measurement")]
    unsafe { &*device::GPIOC::ptr() }
        .bsrr
        .write(|w| w.bs8().set_bit());
}

/// Marks exit from the horizontal state machine ISR.
pub fn hstate_exit() {
    #[cfg(feature = "measurement")]
    unsafe { &*device::GPIOC::ptr() }
        .bsrr
        .write(|w| w.br8().set_bit());
}

/// Marks entry into the DMA fault ISR.
pub fn fault_enter() {
    #[cfg(feature = "measurement")]
    unsafe { &*device::GPIOC::ptr() }
        .bsrr
        .write(|w| w.bs9().set_bit());
}

/// Marks exit from the DMA fault ISR.
pub fn fault_exit() {
    #[cfg(feature = "measurement")]
    unsafe { &*device::GPIOC::ptr() }
        .bsrr
        .write(|w| w.br9().set_bit());
}
