//! SPI-mode SD card transport over SPI2.
//!
//! Covers the initialization contract (power cycle, version and voltage
//! negotiation, CSD/CID fetch) and single-block reads with CRC checking.
//! The card's power rail hangs off PC1 so a real power cycle is possible
//! after a reset the card itself did not see; chip select is PB12, driven
//! as a plain GPIO because SPI-mode cards want CS framing whole command
//! exchanges, not the NSS hardware behaviour.

use stm32f4::stm32f407 as device;

use crate::driver::ticks;
use crate::sd::{
    AddressingMode, BlockRead, Cid, Csd, Ocr, SdDescription, SdError,
    BLOCK_SIZE,
};

/// R1 idle bit: set while the card is still initializing.
const R1_IDLE: u8 = 0x01;
/// R1 illegal-command bit: how a v1 card answers CMD8.
const R1_ILLEGAL: u8 = 0x04;

/// Start token preceding a read data block.
const DATA_TOKEN: u8 = 0xFE;

/// ACMD41 argument requesting high-capacity support.
const HCS: u32 = 1 << 30;

/// How long the card may take to leave idle after power-up.
const INIT_TIMEOUT_MS: u32 = 1_000;
/// How long a data block may take to start arriving.
const READ_TIMEOUT_MS: u32 = 300;

/// An initialized card, ready for block reads.
pub struct SdCard {
    spi: device::SPI2,
    gpioc: device::GPIOC,
    description: SdDescription,
    cid: Cid,
}

impl SdCard {
    pub fn description(&self) -> &SdDescription {
        &self.description
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// Drops power to the card. [`init`] is the only way back.
    pub fn shutdown(self) {
        // Drain the bus before killing the clock [RM0090, SPI section]:
        // wait out the last transfer, then disable the interface.
        while self.spi.sr.read().txe().bit_is_clear() {}
        while self.spi.sr.read().bsy().bit_is_set() {}
        self.spi.cr1.modify(|_, w| w.spe().clear_bit());

        self.gpioc.bsrr.write(|w| w.br1().set_bit());
    }
}

/// Powers the card, runs the negotiation sequence and returns the ready
/// transport. The SPI2 clock must already be enabled and the pins muxed.
pub fn init(
    spi: device::SPI2,
    gpioc: device::GPIOC,
) -> Result<SdCard, SdError> {
    power_cycle(&gpioc);

    // Negotiation runs at a crawl: 30 MHz APB1 / 256 is well inside the
    // 100-400 kHz window the standard wants for initialization.
    configure_spi(&spi, 0b111);

    // The card needs at least 74 clocks with CS high to wake its SPI
    // interface.
    cs_high();
    for _ in 0..10 {
        transfer(&spi, 0xFF);
    }

    // CMD0: software reset into SPI mode.
    let r1 = with_card(&spi, |spi| command(spi, 0, 0))?;
    if r1 != R1_IDLE {
        return Err(SdError::NotSdCard);
    }

    // CMD8: voltage check with the standard pattern. Illegal command means
    // a v1.x card; anything else must echo our argument back.
    let high_capacity_possible = with_card(&spi, |spi| {
        let r1 = command(spi, 8, 0x1AA)?;
        if r1 & R1_ILLEGAL != 0 {
            return Ok(false);
        }
        if response_u32(spi) & 0xFFF != 0x1AA {
            return Err(SdError::VoltageNotSupported);
        }
        Ok(true)
    })?;

    // ACMD41 until the card reports ready.
    let deadline = ticks::now_ms().wrapping_add(INIT_TIMEOUT_MS);
    loop {
        let arg = if high_capacity_possible { HCS } else { 0 };
        with_card(&spi, |spi| command(spi, 55, 0))?;
        let r1 = with_card(&spi, |spi| command(spi, 41, arg))?;
        if r1 == 0 {
            break;
        }
        if ticks::now_ms().wrapping_sub(deadline) as i32 >= 0 {
            return Err(SdError::InitializationTimeout);
        }
        ticks::delay_ms(1);
    }

    // CMD58: read the OCR for the capacity bit and the voltage window.
    let ocr = with_card(&spi, |spi| {
        let r1 = command(spi, 58, 0)?;
        let ocr = Ocr(response_u32(spi));
        if r1 != 0 || !ocr.powered_up() {
            return Err(SdError::NotSdCard);
        }
        Ok(ocr)
    })?;
    if !ocr.supports_3v3() {
        return Err(SdError::VoltageNotSupported);
    }

    // CMD9/CMD10: the CSD and CID arrive in data-block framing.
    let mut register = [0u8; 16];
    with_card(&spi, |spi| {
        if command(spi, 9, 0)? != 0 {
            return Err(SdError::NotSdCard);
        }
        receive_payload(spi, &mut register)
    })?;
    let csd = Csd::from_bytes(register).map_err(SdError::InvalidCsd)?;

    with_card(&spi, |spi| {
        if command(spi, 10, 0)? != 0 {
            return Err(SdError::NotSdCard);
        }
        receive_payload(spi, &mut register)
    })?;
    let cid = Cid::from_bytes(register).map_err(SdError::InvalidCid)?;

    // Negotiated; shift the bus up to 15 MHz, under the 25 MHz TRAN_SPEED
    // floor the CSD validation guaranteed.
    configure_spi(&spi, 0b000);

    let description = SdDescription {
        version: csd.sd_version(),
        addressing: csd.addressing(ocr.ccs()),
        max_transfer_hz: csd.max_transfer_hz(),
    };

    Ok(SdCard {
        spi,
        gpioc,
        description,
        cid,
    })
}

impl BlockRead for SdCard {
    fn read_block(
        &mut self,
        sector: u32,
        out: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), SdError> {
        let address = match self.description.addressing {
            AddressingMode::Sector => sector,
            AddressingMode::Byte => sector * BLOCK_SIZE as u32,
        };

        with_card(&self.spi, |spi| {
            if command(spi, 17, address)? != 0 {
                return Err(SdError::NotSdCard);
            }
            receive_payload(spi, out)
        })
    }
}

/// The published power-cycle sequence: VDD below threshold for at least
/// 1 ms with the bus idle, then back up for at least 1 ms before the
/// first clock. Generous margins cost nothing here.
fn power_cycle(gpioc: &device::GPIOC) {
    gpioc.bsrr.write(|w| w.br1().set_bit());
    ticks::delay_ms(10);

    // CS stays high across power-up per the initialization contract.
    cs_high();
    gpioc.bsrr.write(|w| w.bs1().set_bit());
    ticks::delay_ms(10);
}

fn configure_spi(spi: &device::SPI2, baud_bits: u8) {
    spi.cr1.modify(|_, w| w.spe().clear_bit());
    spi.cr1.write(|w| {
        unsafe { w.br().bits(baud_bits) };
        w.mstr()
            .set_bit()
            .cpol()
            .clear_bit()
            .cpha()
            .clear_bit()
            .ssm()
            .set_bit()
            .ssi()
            .set_bit()
            .spe()
            .set_bit()
    });
}

fn cs_low() {
    // Safety: BSRR writes are atomic; PB12 belongs to this driver.
    unsafe { &*device::GPIOB::ptr() }
        .bsrr
        .write(|w| w.br12().set_bit());
}

fn cs_high() {
    unsafe { &*device::GPIOB::ptr() }
        .bsrr
        .write(|w| w.bs12().set_bit());
}

/// Runs one selected exchange. CS is dropped for the duration of `body`
/// and released on every exit path, with the trailing idle byte the card
/// needs to finish its internal work.
fn with_card<R>(
    spi: &device::SPI2,
    body: impl FnOnce(&device::SPI2) -> Result<R, SdError>,
) -> Result<R, SdError> {
    cs_low();
    transfer(spi, 0xFF);

    let spi = scopeguard::guard(spi, |spi| {
        cs_high();
        transfer(spi, 0xFF);
    });
    body(*spi)
}

/// Full-duplex byte exchange.
fn transfer(spi: &device::SPI2, byte: u8) -> u8 {
    while spi.sr.read().txe().bit_is_clear() {}
    spi.dr.write(|w| unsafe { w.bits(u32::from(byte)) });
    while spi.sr.read().rxne().bit_is_clear() {}
    spi.dr.read().bits() as u8
}

/// Sends a command frame and waits for its R1 response.
fn command(spi: &device::SPI2, index: u8, argument: u32) -> Result<u8, SdError> {
    let frame = [
        0x40 | index,
        (argument >> 24) as u8,
        (argument >> 16) as u8,
        (argument >> 8) as u8,
        argument as u8,
    ];
    for &byte in &frame {
        transfer(spi, byte);
    }
    transfer(spi, (crc::crc7(&frame) << 1) | 1);

    // The response shows up within eight byte times, MSB clear.
    for _ in 0..8 {
        let byte = transfer(spi, 0xFF);
        if byte & 0x80 == 0 {
            return Ok(byte);
        }
    }
    Err(SdError::Timeout)
}

/// The four bytes trailing an R3/R7 response.
fn response_u32(spi: &device::SPI2) -> u32 {
    let mut value = 0u32;
    for _ in 0..4 {
        value = (value << 8) | u32::from(transfer(spi, 0xFF));
    }
    value
}

/// Waits for the data token, then pulls the payload and verifies its
/// CRC-16.
fn receive_payload(spi: &device::SPI2, out: &mut [u8]) -> Result<(), SdError> {
    let deadline = ticks::now_ms().wrapping_add(READ_TIMEOUT_MS);
    loop {
        let byte = transfer(spi, 0xFF);
        if byte == DATA_TOKEN {
            break;
        }
        if byte != 0xFF {
            // An error token instead of data.
            return Err(SdError::Corrupt);
        }
        if ticks::now_ms().wrapping_sub(deadline) as i32 >= 0 {
            return Err(SdError::Timeout);
        }
    }

    for slot in out.iter_mut() {
        *slot = transfer(spi, 0xFF);
    }

    let expected = (u16::from(transfer(spi, 0xFF)) << 8)
        | u16::from(transfer(spi, 0xFF));
    if crc::crc16(out) != expected {
        return Err(SdError::Corrupt);
    }
    Ok(())
}
