use cortex_m::asm;
use cortex_m_rt::pre_init;

use stm32f4::stm32f407 as device;

#[pre_init]
unsafe fn pre_init() {
    // This function runs before .data and .bss are initialized. Any access
    // to a `static` here is undefined behavior.

    // Turn on power to the SYSCFG peripheral, which is a prerequisite to
    // what we actually want to do.
    let rcc = &*device::RCC::ptr();
    rcc.apb2enr.modify(|_, w| w.syscfgen().enabled());

    asm::dsb(); // ensure power's up before we try to write to it

    // Remap SRAM112 to address 0.
    let syscfg = &*device::SYSCFG::ptr();
    syscfg.memrm.write(|w| w.mem_mode().bits(0b11));

    // Now, please.
    asm::dsb();
    asm::isb();
}
