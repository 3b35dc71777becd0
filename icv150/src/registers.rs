//! Register map for the ADAS ICV150 multiplexed ADC.
//!
//! Every card answers in its own 4 KiB window of VME A24 space and all registers are 16 bits
//! wide. Command registers are edge triggered: writing (any value, we always write `0`) *is* the
//! command. A few registers carry data in their low bits, those are modeled as packed structs so
//! the bit layout is written down exactly once.
//!
//! Bit layouts are numbered msb0 over the word as it sits on the bus, so word bit 0 is layout
//! bit 15.
//!
//! Note that several offsets are shared between a read-side and a write-side register (e.g.
//! `0x300` is "stop" when written and "scanning state" when read, `2*n` is the ADC data of
//! signal `n` when read and its gain RAM when written).

use icv150_derive::{address, RegisterSerde};
use packed_struct::prelude::*;
use packed_struct::PackingResult;

/// Size in bytes of one card's window
pub const REGION_SIZE: u32 = 0x1000;
/// Number of differential signals a fully extended card can scan (32 + 48 + 48)
pub const MAX_SIGNALS: usize = 128;
/// Base offset of the gain code readback area
pub const READ_GAIN_BASE: u16 = 0xE00;

/// Registers that live at a fixed byte offset within a card's window
pub trait Address {
    /// The byte offset from the start of the card's window
    const OFFSET: u16;
}

/// Marker for edge triggered command registers
pub trait Command: Address {}

/// Types that implement this trait can be packed into a register word
pub trait Serialize {
    /// Pack into the 16-bit word as it appears on the bus
    /// # Errors
    /// Returns an error if a field doesn't fit its bitfield
    fn to_word(&self) -> PackingResult<u16>;
}

/// Types that implement this trait can be unpacked from a register word
pub trait Deserialize: Sized {
    /// Unpack from the 16-bit word as read off the bus
    /// # Errors
    /// Returns an error if the word doesn't decode
    fn from_word(word: u16) -> PackingResult<Self>;
}

impl Serialize for u16 {
    fn to_word(&self) -> PackingResult<u16> {
        Ok(*self)
    }
}

impl Deserialize for u16 {
    fn from_word(word: u16) -> PackingResult<Self> {
        Ok(word)
    }
}

/// (WR) Start automatic scanning
#[address(0x200)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Start;
impl Command for Start {}

/// (WR) Stop scanning
#[address(0x300)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Stop;
impl Command for Stop {}

/// (RD) Scanning state, shares its offset with [`Stop`]
#[address(0x300)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScanningState;

/// (WR) Software trigger, only meaningful with the external trigger enabled
#[address(0x400)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SoftTrigger;
impl Command for SoftTrigger {}

/// (WR) Scan once per trigger on J3 and interrupt at the end of conversion
#[address(0x500)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExternalTrigger;
impl Command for ExternalTrigger {}

/// (WR) Copy the gain RAM into NOVRAM
///
/// The NOVRAM is only good for about 10000 writes
#[address(0x700)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StoreGains;
impl Command for StoreGains {}

/// (RD) End of conversion state. The read itself releases the interrupt.
#[address(0x800)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EndOfConversion;

/// (WR) Interrupt configuration
#[address(0x800)]
#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "2")]
pub struct InterruptConfig {
    #[packed_field(bits = "0..=7")]
    /// Vector the card presents on interrupt acknowledge
    pub vector: u8,
    #[packed_field(bits = "8..=14")]
    /// Bus request level, stored inverted
    pub inverted_level: Integer<u8, packed_bits::Bits<7>>,
    #[packed_field(bits = "15")]
    /// Board interrupt enable
    pub enable: bool,
}

impl InterruptConfig {
    /// An enabled configuration raising `vector` on bus level `level`
    #[must_use]
    pub fn new(vector: u8, level: u8) -> Self {
        Self {
            vector,
            inverted_level: (!level & 0x7F).into(),
            enable: true,
        }
    }
}

/// (WR) Oversampling mode, hardware revision J and later, 16 bit boards only
#[address(0xA00)]
#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "2")]
pub struct Oversampling {
    #[packed_field(bits = "15")]
    pub enabled: bool,
}

/// (WR) Number of the last signal to scan. Supersedes the ST3 straps.
#[address(0xC00)]
#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "2")]
pub struct ScanCount {
    #[packed_field(bits = "9..=15")]
    pub last_channel: Integer<u8, packed_bits::Bits<7>>,
}

impl ScanCount {
    #[must_use]
    pub fn new(last_channel: u8) -> Self {
        Self {
            last_channel: (last_channel & 0x7F).into(),
        }
    }
}

/// Per-signal gain code, written to the gain RAM and read back from [`READ_GAIN_BASE`]
#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "2")]
pub struct GainCode {
    #[packed_field(bits = "12..=15")]
    pub code: Integer<u8, packed_bits::Bits<4>>,
}

impl GainCode {
    /// Keeps the low four bits of `code`, exactly like the hardware does
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn truncated(code: u32) -> Self {
        Self {
            code: ((code & 0x0F) as u8).into(),
        }
    }

    #[must_use]
    pub fn value(&self) -> u8 {
        self.code.into()
    }
}

/// (RD) Offset of the conversion result of `signal`
#[must_use]
pub fn data_offset(signal: u8) -> u16 {
    2 * u16::from(signal)
}

/// (WR) Offset of the gain RAM cell of `signal`
#[must_use]
pub fn gain_write_offset(signal: u8) -> u16 {
    data_offset(signal)
}

/// (RD) Offset of the gain readback of `signal`
#[must_use]
pub fn gain_read_offset(signal: u8) -> u16 {
    READ_GAIN_BASE + 2 * u16::from(signal)
}
