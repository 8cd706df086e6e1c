//! Operating conditions register, as returned in an R3 response.

/// The 32-bit OCR. Constructed from the four response bytes, MSB first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ocr(pub u32);

impl Ocr {
    pub fn from_be_bytes(bytes: [u8; 4]) -> Ocr {
        Ocr(u32::from_be_bytes(bytes))
    }

    /// Power-up status: low while the card is still busy initializing.
    pub fn powered_up(&self) -> bool {
        self.0 & (1 << 31) != 0
    }

    /// Card capacity status. Only valid once [`Ocr::powered_up`] reads
    /// true; set on high-capacity (sector addressed) cards.
    pub fn ccs(&self) -> bool {
        self.0 & (1 << 30) != 0
    }

    /// UHS-II card status.
    pub fn uhs2(&self) -> bool {
        self.0 & (1 << 29) != 0
    }

    /// Over-2TB support (SDUC cards only).
    pub fn co2t(&self) -> bool {
        self.0 & (1 << 27) != 0
    }

    /// Whether the card accepted switching to 1.8 V signalling.
    pub fn switching_to_1v8_accepted(&self) -> bool {
        self.0 & (1 << 24) != 0
    }

    /// VDD voltage window bit for the 100 mV range starting at
    /// `2.7 + tenth/10` volts, `tenth` in `0..=8` (bits 15..=23).
    pub fn supports_voltage_tenth(&self, tenth: u8) -> bool {
        debug_assert!(tenth <= 8);
        self.0 & (1 << (15 + u32::from(tenth))) != 0
    }

    /// Whether the card can run from a 3.3 V supply (3.2-3.3 and 3.3-3.4 V
    /// windows both advertised).
    pub fn supports_3v3(&self) -> bool {
        self.supports_voltage_tenth(5) && self.supports_voltage_tenth(6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typical_sdhc_ocr() {
        // Busy bit set, CCS set, full 2.7-3.6V window.
        let ocr = Ocr::from_be_bytes([0xC0, 0xFF, 0x80, 0x00]);
        assert!(ocr.powered_up());
        assert!(ocr.ccs());
        assert!(!ocr.uhs2());
        assert!(ocr.supports_3v3());
        for tenth in 0..=8 {
            assert!(ocr.supports_voltage_tenth(tenth));
        }
    }

    #[test]
    fn still_busy_card() {
        let ocr = Ocr::from_be_bytes([0x00, 0xFF, 0x80, 0x00]);
        assert!(!ocr.powered_up());
        assert!(!ocr.ccs());
    }
}
