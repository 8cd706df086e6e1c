//! VGA viewer firmware: board bring-up, interrupt wiring, and the task
//! harness.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

// The firmware proper only builds for the target; an empty `main` keeps
// host builds and `cargo test` happy.
#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
mod firmware {
    use core::fmt::Write;

    use cortex_m_rt::{entry, exception};
    use stm32f4::stm32f407 as device;
    use stm32f4::stm32f407::interrupt;

    use vgaview::arena::Arena;
    use vgaview::clock;
    use vgaview::console::{ansi, ConsoleWriter};
    use vgaview::driver::tasks::Harness;
    use vgaview::driver::vga::{self, sync};
    use vgaview::driver::{ddc, sdspi, serial, ticks};
    use vgaview::mode::VisualizationRequest;

    const CONSOLE_BAUD: u32 = 9_600;

    /// Backing store for the framebuffer arena: the bulk of SRAM1/2.
    /// Everything else the firmware needs lives in the remainder and CCM.
    static mut ARENA_REGION: [u8; 120 * 1024] = [0; 120 * 1024];

    #[entry]
    fn main() -> ! {
        let mut cp = cortex_m::peripheral::Peripherals::take().unwrap();

        {
            // Enable usage/bus/mem faults so they don't immediately
            // escalate to HardFault.
            let shcsr = cp.SCB.shcrs.read();
            unsafe { cp.SCB.shcrs.write(shcsr | (0b111 << 16)) }
        }

        unsafe {
            // Lazy FP context stacking: interrupts may use the FPU without
            // always paying for a context save.
            cp.FPU.fpccr.write(
                (1 << 31)  // automatic save
                | (1 << 30), // lazy save
            );
        }

        let p = device::Peripherals::take().unwrap();

        // Safety: nothing else is configuring RCC or GPIOC yet.
        unsafe { vgaview::driver::measurement::init() }

        // The 40 MHz baseline fixes the whole clock tree; everything that
        // derives a divider from a bus clock comes after this.
        let request = VisualizationRequest::default();
        let clock =
            clock::plan(request.frame.pixel_mhz).expect("baseline clock");
        sync::apply_clock_config(&p.RCC, &p.FLASH, &clock.config);
        ticks::start(&mut cp.SYST, clock.config.ahb_hz());

        // Clocks and pin muxing for the non-video peripherals. The engine
        // enables its own.
        p.RCC.ahb1enr.modify(|_, w| {
            w.gpioaen()
                .enabled()
                .gpioben()
                .enabled()
                .gpiocen()
                .enabled()
                .gpioden()
                .enabled()
        });
        p.RCC.apb1enr.modify(|_, w| {
            w.i2c2en()
                .enabled()
                .spi2en()
                .enabled()
                .uart4en()
                .enabled()
        });

        configure_pins(&p);

        let mut console = serial::init(p.UART4, clock.config.apb1_hz(), CONSOLE_BAUD);
        let _ = write!(
            ConsoleWriter(&mut console),
            "{}{}Starting VGA viewer {}\r\n",
            ansi::CLEAR,
            ansi::RESET,
            env!("CARGO_PKG_VERSION"),
        );

        ddc::init(p.I2C2, clock.config.apb1_hz());

        // The slow peripherals sit well below the scan-out interrupts so a
        // DDC or console byte can never delay a line. Plain enables are
        // fine here: nothing can be pending before the first transfer is
        // issued.
        unsafe {
            cp.NVIC.set_priority(device::Interrupt::I2C2_EV, 0x60);
            cp.NVIC.set_priority(device::Interrupt::I2C2_ER, 0x60);
            cp.NVIC.set_priority(device::Interrupt::UART4, 0x70);
        }
        cp.NVIC.enable(device::Interrupt::I2C2_EV);
        cp.NVIC.enable(device::Interrupt::I2C2_ER);
        cp.NVIC.enable(device::Interrupt::UART4);

        match sdspi::init(p.SPI2, p.GPIOC) {
            Ok(card) => {
                let d = card.description();
                let _ = write!(
                    ConsoleWriter(&mut console),
                    "SD card ready: {:?}, {:?} addressing\r\n",
                    d.version,
                    d.addressing,
                );
            }
            Err(status) => {
                let _ = write!(
                    ConsoleWriter(&mut console),
                    "{}No usable SD card: {:?}{}\r\n",
                    ansi::BOLD_YELLOW,
                    status,
                    ansi::RESET,
                );
            }
        }

        let engine = vga::init(
            cp.NVIC,
            &mut cp.SCB,
            &p.DBG,
            &p.FLASH,
            p.RCC,
            p.GPIOB,
            p.GPIOE,
            p.TIM1,
            p.TIM3,
            p.TIM4,
            p.DMA2,
        );

        // Safety: the only reference ever taken to the region.
        let arena = Arena::new(unsafe { &mut ARENA_REGION });

        // Power LED on: board is up.
        p.GPIOD.bsrr.write(|w| w.bs13().set_bit());

        Harness::new(engine, console, arena, request).run()
    }

    /// Muxes the non-video pins: UART4 on PA0/PA1, DDC on PB10/PB11
    /// (open drain), SD SPI on PB12-PB15, card power on PC1, status LED
    /// on PD13.
    fn configure_pins(p: &device::Peripherals) {
        p.GPIOA
            .afrl
            .modify(|_, w| w.afrl0().af8().afrl1().af8());
        p.GPIOA
            .moder
            .modify(|_, w| w.moder0().alternate().moder1().alternate());

        p.GPIOB
            .otyper
            .modify(|_, w| w.ot10().set_bit().ot11().set_bit());
        p.GPIOB.afrh.modify(|_, w| {
            w.afrh10()
                .af4()
                .afrh11()
                .af4()
                .afrh13()
                .af5()
                .afrh14()
                .af5()
                .afrh15()
                .af5()
        });
        // Chip select idles high before the card ever sees a clock.
        p.GPIOB.bsrr.write(|w| w.bs12().set_bit());
        p.GPIOB.moder.modify(|_, w| {
            w.moder10()
                .alternate()
                .moder11()
                .alternate()
                .moder12()
                .output()
                .moder13()
                .alternate()
                .moder14()
                .alternate()
                .moder15()
                .alternate()
        });

        p.GPIOC.moder.modify(|_, w| w.moder1().output());

        p.GPIOD.moder.modify(|_, w| w.moder13().output());
    }

    #[exception]
    fn SysTick() {
        ticks::isr()
    }

    #[interrupt]
    fn TIM4() {
        vga::isr::hstate_isr()
    }

    #[interrupt]
    fn DMA2_STREAM5() {
        vga::isr::dma_isr()
    }

    #[interrupt]
    fn I2C2_EV() {
        ddc::event_isr()
    }

    #[interrupt]
    fn I2C2_ER() {
        ddc::error_isr()
    }

    #[interrupt]
    fn UART4() {
        serial::isr()
    }
}
