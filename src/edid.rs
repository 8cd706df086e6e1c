//! EDID block parsing and validation.
//!
//! The monitor's EDID arrives as a raw 128-byte block over DDC2B. Rather
//! than overlaying a packed struct on the bytes, [`Edid`] keeps the block
//! as-is and exposes typed accessors for each field, so the layout lives in
//! exactly one place per field and can be checked against a captured
//! reference block.

use arrayvec::ArrayVec;
use core::convert::TryInto;
use core::fmt;

/// 7-bit I2C address monitors answer EDID reads on.
pub const DDC_DEVICE_ADDRESS: u8 = 0x50;

/// Size of the base EDID block.
pub const BLOCK_SIZE: usize = 128;

/// Fixed pattern opening every EDID block.
pub const HEADER_PATTERN: [u8; 8] =
    [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

/// Parse-time failures. Transport failures (bus errors and friends) are
/// reported by the DDC driver, not here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdidError {
    HeaderInvalid,
    ChecksumInvalid,
}

/// Checks the end-of-block checksum: all 128 bytes must sum to zero
/// modulo 256.
pub fn checksum_valid(block: &[u8; BLOCK_SIZE]) -> bool {
    block
        .iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
        == 0
}

/// Video white and sync levels, relative to blank. Values map directly to
/// the EDID encoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AnalogVoltage {
    /// +0.7/-0.3 V
    V0p7M0p3 = 0,
    /// +0.714/-0.286 V
    V0p714M0p286 = 1,
    /// +1.0/-0.4 V
    V1p0M0p4 = 2,
    /// +0.7/0 V (EVC)
    V0p7To0p0 = 3,
}

impl fmt::Display for AnalogVoltage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AnalogVoltage::V0p7M0p3 => "+0.7/-0.3 V",
            AnalogVoltage::V0p714M0p286 => "+0.714/-0.286 V",
            AnalogVoltage::V1p0M0p4 => "+1.0/-0.4 V",
            AnalogVoltage::V0p7To0p0 => "+0.7/0 V",
        })
    }
}

/// Basic video input parameters, discriminated by the MSB of the first
/// parameter byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VideoInput {
    Analog {
        voltage: AnalogVoltage,
        blank_to_black: bool,
        separate_sync: bool,
        composite_sync: bool,
        sync_on_green: bool,
        serrated_vsync: bool,
    },
    Digital {
        bit_depth: u8,
        video_interface: u8,
    },
}

/// Formerly-very-common modes advertised in the established-timing bitmap.
/// The discriminant is the bit index into the three-byte bitmap.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EstablishedTiming {
    X800x600At60 = 0,
    X800x600At56 = 1,
    X640x480At75 = 2,
    X640x480At72 = 3,
    X640x480At67 = 4,
    X640x480At60 = 5,
    X720x400At88 = 6,
    X720x400At70 = 7,
    X1024x768At60 = 11,
}

/// One filled standard-timing slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StandardTiming {
    /// Horizontal resolution in pixels.
    pub x_resolution: u16,
    /// Aspect ratio code: 0 = 16:10, 1 = 4:3, 2 = 5:4, 3 = 16:9.
    pub aspect_ratio: u8,
    /// Vertical refresh in hertz.
    pub refresh_hz: u8,
}

/// An 18-byte descriptor slot.
#[derive(Copy, Clone, Debug)]
pub enum Descriptor<'a> {
    /// First two bytes non-zero: a detailed timing.
    DetailedTiming(DetailedTiming<'a>),
    /// Monitor name, serial, range limits and the like; opaque to us.
    Other(&'a [u8; 18]),
}

/// Accessors over a detailed-timing descriptor. Multi-byte fields are split
/// into LSB bytes and packed MSB nibbles; each accessor performs its own
/// merge.
#[derive(Copy, Clone, Debug)]
pub struct DetailedTiming<'a>(&'a [u8; 18]);

impl<'a> DetailedTiming<'a> {
    /// Pixel clock in kHz (stored in units of 10 kHz, little-endian).
    pub fn pixel_clock_khz(&self) -> u32 {
        u32::from(u16::from_le_bytes([self.0[0], self.0[1]])) * 10
    }

    pub fn h_active(&self) -> u16 {
        (u16::from(self.0[4] & 0xF0) << 4) | u16::from(self.0[2])
    }

    pub fn h_blanking(&self) -> u16 {
        (u16::from(self.0[4] & 0x0F) << 8) | u16::from(self.0[3])
    }

    pub fn v_active(&self) -> u16 {
        (u16::from(self.0[7] & 0xF0) << 4) | u16::from(self.0[5])
    }

    pub fn v_blanking(&self) -> u16 {
        (u16::from(self.0[7] & 0x0F) << 8) | u16::from(self.0[6])
    }

    /// Horizontal front porch, from active end to sync start.
    pub fn h_front_porch(&self) -> u16 {
        (u16::from(self.0[11] & 0xC0) << 2) | u16::from(self.0[8])
    }

    pub fn h_sync_width(&self) -> u16 {
        (u16::from(self.0[11] & 0x30) << 4) | u16::from(self.0[9])
    }

    pub fn v_front_porch(&self) -> u16 {
        (u16::from(self.0[11] & 0x0C) << 2) | u16::from(self.0[10] >> 4)
    }

    pub fn v_sync_width(&self) -> u16 {
        (u16::from(self.0[11] & 0x03) << 4) | u16::from(self.0[10] & 0x0F)
    }

    pub fn h_image_size_mm(&self) -> u16 {
        (u16::from(self.0[14] & 0xF0) << 4) | u16::from(self.0[12])
    }

    pub fn v_image_size_mm(&self) -> u16 {
        (u16::from(self.0[14] & 0x0F) << 8) | u16::from(self.0[13])
    }

    pub fn interlaced(&self) -> bool {
        self.0[17] & 0x80 != 0
    }
}

/// A validated 128-byte EDID block.
#[derive(Copy, Clone)]
pub struct Edid([u8; BLOCK_SIZE]);

impl Edid {
    /// Validates the fixed header pattern and the checksum, taking ownership
    /// of the block.
    pub fn from_bytes(block: [u8; BLOCK_SIZE]) -> Result<Edid, EdidError> {
        if block[..8] != HEADER_PATTERN {
            return Err(EdidError::HeaderInvalid);
        }
        if !checksum_valid(&block) {
            return Err(EdidError::ChecksumInvalid);
        }
        Ok(Edid(block))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }

    /// The manufacturer's three-letter plug-and-play ID.
    ///
    /// Three 5-bit letters packed big-endian into bytes 8-9; `A` is stored
    /// as 1, so adding `'@'` recovers ASCII.
    pub fn manufacturer(&self) -> [u8; 3] {
        let value = u16::from_be_bytes([self.0[8], self.0[9]]);
        [
            ((value >> 10) & 0x1F) as u8 + b'@',
            ((value >> 5) & 0x1F) as u8 + b'@',
            (value & 0x1F) as u8 + b'@',
        ]
    }

    pub fn product_code(&self) -> u16 {
        u16::from_le_bytes([self.0[10], self.0[11]])
    }

    pub fn serial(&self) -> u32 {
        u32::from_le_bytes([self.0[12], self.0[13], self.0[14], self.0[15]])
    }

    pub fn manufacture_week(&self) -> u8 {
        self.0[16]
    }

    /// Year of manufacture; stored as an offset from 1990.
    pub fn manufacture_year(&self) -> u16 {
        1990 + u16::from(self.0[17])
    }

    /// `(version, revision)`.
    pub fn version(&self) -> (u8, u8) {
        (self.0[18], self.0[19])
    }

    pub fn input(&self) -> VideoInput {
        let b = self.0[20];
        if b & 0x80 != 0 {
            VideoInput::Digital {
                bit_depth: (b >> 4) & 0x7,
                video_interface: b & 0x0F,
            }
        } else {
            VideoInput::Analog {
                voltage: match (b >> 5) & 0x3 {
                    0 => AnalogVoltage::V0p7M0p3,
                    1 => AnalogVoltage::V0p714M0p286,
                    2 => AnalogVoltage::V1p0M0p4,
                    _ => AnalogVoltage::V0p7To0p0,
                },
                blank_to_black: b & 0x10 != 0,
                separate_sync: b & 0x08 != 0,
                composite_sync: b & 0x04 != 0,
                sync_on_green: b & 0x02 != 0,
                serrated_vsync: b & 0x01 != 0,
            }
        }
    }

    /// Display gamma: stored as `(gamma - 1) * 100`.
    pub fn gamma(&self) -> f32 {
        1.0 + f32::from(self.0[23]) / 100.0
    }

    /// The 10-byte chromaticity block, opaque.
    pub fn chromaticity(&self) -> &[u8] {
        &self.0[25..35]
    }

    /// Whether `timing` is advertised in the established-timing bitmap.
    pub fn supports(&self, timing: EstablishedTiming) -> bool {
        let bit = timing as usize;
        self.0[35 + bit / 8] & (1 << (bit % 8)) != 0
    }

    /// The filled standard-timing slots, in order. `{0x01, 0x01}` marks an
    /// empty slot.
    pub fn standard_timings(&self) -> ArrayVec<[StandardTiming; 8]> {
        let mut timings = ArrayVec::new();
        for slot in self.0[38..54].chunks_exact(2) {
            if slot == [0x01, 0x01] {
                continue;
            }
            timings.push(StandardTiming {
                x_resolution: (u16::from(slot[0]) + 31) * 8,
                aspect_ratio: slot[1] >> 6,
                refresh_hz: (slot[1] & 0x3F) + 60,
            });
        }
        timings
    }

    /// One of the four 18-byte descriptors, tagged as a detailed timing when
    /// its first two bytes are non-zero.
    pub fn descriptor(&self, index: usize) -> Descriptor {
        assert!(index < 4);
        let start = 54 + index * 18;
        let raw: &[u8; 18] =
            self.0[start..start + 18].try_into().unwrap();
        if raw[0] == 0 && raw[1] == 0 {
            Descriptor::Other(raw)
        } else {
            Descriptor::DetailedTiming(DetailedTiming(raw))
        }
    }

    /// Number of extension blocks following the base block.
    pub fn extension_count(&self) -> u8 {
        self.0[126]
    }

    /// Console dump adapter mirroring what the firmware prints on connect.
    pub fn dump(&self) -> EdidDump {
        EdidDump(self)
    }
}

impl fmt::Debug for Edid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let m = self.manufacturer();
        f.debug_struct("Edid")
            .field("manufacturer", &core::str::from_utf8(&m).unwrap_or("???"))
            .field("product_code", &self.product_code())
            .field("version", &self.version())
            .finish()
    }
}

/// Multi-line human-readable EDID summary.
pub struct EdidDump<'a>(&'a Edid);

impl<'a> fmt::Display for EdidDump<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let edid = self.0;
        let (version, revision) = edid.version();
        let m = edid.manufacturer();

        write!(f, "Dumping EDID ...\r\n")?;
        write!(f, "\tVersion: {}.{}\r\n", version, revision)?;
        write!(
            f,
            "\tManufacturer: {}{}{}\r\n",
            m[0] as char, m[1] as char, m[2] as char
        )?;
        write!(f, "\tProduct code: {}\r\n", edid.product_code())?;
        write!(f, "\tWeek: {}\r\n", edid.manufacture_week())?;
        write!(f, "\tYear: {}\r\n", edid.manufacture_year())?;

        match edid.input() {
            VideoInput::Digital { .. } => write!(f, "\tDigital input\r\n")?,
            VideoInput::Analog {
                voltage,
                separate_sync,
                ..
            } => {
                write!(f, "\tAnalog input\r\n")?;
                write!(f, "\t\tVoltage levels: {}\r\n", voltage)?;
                if separate_sync {
                    write!(f, "\t\tSeparate sync supported\r\n")?;
                } else {
                    write!(f, "\t\tSeparate sync NOT supported\r\n")?;
                }
            }
        }

        write!(f, "\tBasic timings\r\n")?;
        if edid.supports(EstablishedTiming::X640x480At60) {
            write!(f, "\t\t640x480 @ 60Hz supported\r\n")?;
        }
        if edid.supports(EstablishedTiming::X800x600At60) {
            write!(f, "\t\t800x600 @ 60Hz supported\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(f: impl FnOnce(&mut [u8; BLOCK_SIZE])) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[..8].copy_from_slice(&HEADER_PATTERN);
        f(&mut block);
        // Fix up the checksum last.
        let sum = block[..127]
            .iter()
            .fold(0u8, |sum, &b| sum.wrapping_add(b));
        block[127] = sum.wrapping_neg();
        block
    }

    #[test]
    fn checksum_law() {
        let block = block_with(|b| b[16] = 37);
        assert!(checksum_valid(&block));
        assert_eq!(
            block.iter().fold(0u32, |sum, &b| sum + u32::from(b)) % 256,
            0
        );

        // Perturbing any byte (here so the sum comes to 0x05) breaks it.
        let mut bad = block;
        bad[40] = bad[40].wrapping_add(0x5);
        assert!(!checksum_valid(&bad));
        assert!(matches!(
            Edid::from_bytes(bad),
            Err(EdidError::ChecksumInvalid)
        ));
    }

    #[test]
    fn header_checked_before_checksum() {
        let mut block = block_with(|_| ());
        block[0] = 0xFF;
        block[127] = block[127].wrapping_sub(0xFF);
        assert!(matches!(
            Edid::from_bytes(block),
            Err(EdidError::HeaderInvalid)
        ));
    }

    #[test]
    fn manufacturer_unpacking() {
        // Standard big-endian 3x5-bit packing: 'A' = 1. "ABA" packs as
        // (1 << 10) | (2 << 5) | 1 = 0x0441.
        let edid = Edid::from_bytes(block_with(|b| {
            b[8] = 0x04;
            b[9] = 0x41;
        }))
        .unwrap();
        assert_eq!(&edid.manufacturer(), b"ABA");

        // All three letter fields equal to 1 decode to "AAA".
        let edid = Edid::from_bytes(block_with(|b| {
            b[8] = 0x04;
            b[9] = 0x21;
        }))
        .unwrap();
        assert_eq!(&edid.manufacturer(), b"AAA");
    }

    #[test]
    fn established_timing_bit_positions() {
        // 640x480@60Hz lives at byte 0, bit 5 of the bitmap.
        let edid =
            Edid::from_bytes(block_with(|b| b[35] = 1 << 5)).unwrap();
        assert!(edid.supports(EstablishedTiming::X640x480At60));
        assert!(!edid.supports(EstablishedTiming::X800x600At60));

        let edid =
            Edid::from_bytes(block_with(|b| b[35] = 1 << 0)).unwrap();
        assert!(edid.supports(EstablishedTiming::X800x600At60));
        assert!(!edid.supports(EstablishedTiming::X1024x768At60));
    }

    #[test]
    fn year_is_offset_from_1990() {
        let edid = Edid::from_bytes(block_with(|b| b[17] = 31)).unwrap();
        assert_eq!(edid.manufacture_year(), 2021);
    }

    #[test]
    fn gamma_formula() {
        let edid = Edid::from_bytes(block_with(|b| b[23] = 120)).unwrap();
        assert!((edid.gamma() - 2.2).abs() < 1e-6);
    }

    #[test]
    fn standard_timing_slots() {
        let edid = Edid::from_bytes(block_with(|b| {
            for slot in b[38..54].chunks_exact_mut(2) {
                slot.copy_from_slice(&[0x01, 0x01]);
            }
            // 800x600@60: (800/8 - 31, 4:3 | 60Hz)
            b[38] = 69;
            b[39] = 0x40;
        }))
        .unwrap();

        let timings = edid.standard_timings();
        assert_eq!(timings.len(), 1);
        assert_eq!(
            timings[0],
            StandardTiming {
                x_resolution: 800,
                aspect_ratio: 1,
                refresh_hz: 60,
            }
        );
    }

    #[test]
    fn descriptors_tagged_by_pixel_clock() {
        let edid = Edid::from_bytes(block_with(|b| {
            // Descriptor 0: pixel clock 4000 (40.00 MHz) => detailed timing.
            b[54] = 0xA0;
            b[55] = 0x0F;
        }))
        .unwrap();

        match edid.descriptor(0) {
            Descriptor::DetailedTiming(dt) => {
                assert_eq!(dt.pixel_clock_khz(), 40_000);
            }
            Descriptor::Other(_) => panic!("descriptor 0 should be a DTD"),
        }
        assert!(matches!(edid.descriptor(1), Descriptor::Other(_)));
    }
}
