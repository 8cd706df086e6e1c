//! SD card block-reader contract and register parsing.
//!
//! The filesystem living on top of the card is out of scope; this module
//! fixes the interface the rest of the system sees (512-byte sector reads)
//! and owns the card-register plumbing the transport needs to negotiate a
//! card: CSD, CID and OCR.

pub mod cid;
pub mod csd;
pub mod ocr;

pub use cid::Cid;
pub use csd::Csd;
pub use ocr::Ocr;

/// SD transfer block size. Larger READ_BL_LEN values exist on v1 cards, but
/// every card supports 512 and the transport always configures it.
pub const BLOCK_SIZE: usize = 512;

/// Failures of the SD transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SdError {
    /// No response within the protocol's timeout budget.
    Timeout,
    /// Something answered, but not like an SD card.
    NotSdCard,
    /// The card does not accept our supply voltage.
    VoltageNotSupported,
    /// The card never left the idle state.
    InitializationTimeout,
    /// A data block arrived with a bad CRC-16.
    Corrupt,
    /// The card's CSD failed validation.
    InvalidCsd(csd::CsdError),
    /// The card's CID failed validation.
    InvalidCid(cid::CidError),
}

/// Declared version class of an attached card.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SdVersion {
    V1X,
    V2OrLater,
}

/// How read commands address the medium.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AddressingMode {
    /// v1 cards: commands take byte offsets.
    Byte,
    /// v2+ high-capacity cards (CCS set): commands take sector numbers.
    Sector,
}

/// Everything learned about a card during negotiation.
#[derive(Copy, Clone, Debug)]
pub struct SdDescription {
    pub version: SdVersion,
    pub addressing: AddressingMode,
    /// From the CSD's TRAN_SPEED field.
    pub max_transfer_hz: u32,
}

/// Sector-indexed block read. The VGA side consumes image content through
/// this trait and never sees bus details.
pub trait BlockRead {
    /// Reads the 512-byte block at `sector` into `out`.
    fn read_block(
        &mut self,
        sector: u32,
        out: &mut [u8; BLOCK_SIZE],
    ) -> Result<(), SdError>;
}
