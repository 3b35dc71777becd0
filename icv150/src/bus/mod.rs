//! Defines the bus capabilities the controller core needs from its host: mapping a card's
//! window into our address space and connecting interrupt vectors.

pub mod mock;

use crate::registers::{
    Address,
    Command,
    Serialize,
};
use packed_struct::PackingError;
use thiserror::Error;

/// Errors raised by bus implementations
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Unable to map bus address {0:#08x}")]
    Unmapped(u32),
    #[error("Bus error at offset {offset:#05x} of the window at {base:#08x}")]
    Access { base: u32, offset: u16 },
    #[error("Unable to connect interrupt vector {vector:#04x} - {reason}")]
    Interrupt { vector: u8, reason: String },
    #[error("Unable to enable bus interrupt level {0}")]
    Level(u8),
    #[error("Register packing error")]
    Packing(#[from] PackingError),
}

pub type BusResult<T> = std::result::Result<T, Error>;

/// The routine the bus calls when an interrupt arrives on a connected vector
pub type InterruptHandler = Box<dyn Fn() + Send + Sync + 'static>;

/// A mapped card window. All accesses are 16-bit words at byte offsets into the window.
pub trait Region: Send + 'static {
    /// Base bus address of this window
    fn base(&self) -> u32;

    /// Attempt a readback at the start of the window, returning if anything answered
    fn probe(&mut self) -> bool;

    /// Read the word at byte offset `offset`
    fn read_word(&mut self, offset: u16) -> BusResult<u16>;

    /// Write `word` at byte offset `offset`
    fn write_word(&mut self, offset: u16, word: u16) -> BusResult<()>;

    /// Read the raw word at the address of `T`, for status registers where the read is the point
    fn read_raw<T>(&mut self) -> BusResult<u16>
    where
        T: Address,
    {
        self.read_word(T::OFFSET)
    }

    /// Generically write a register type `T` to its address
    fn write<T>(&mut self, reg: &T) -> BusResult<()>
    where
        T: Address + Serialize,
    {
        self.write_word(T::OFFSET, reg.to_word()?)
    }

    /// Fire the command register `T`
    fn strobe<T>(&mut self) -> BusResult<()>
    where
        T: Command,
    {
        self.write_word(T::OFFSET, 0)
    }
}

/// The trait implemented by host bus facilities.
pub trait Bus: Send + Sync + 'static {
    type Region: Region;

    /// Map the card window starting at bus address `address`
    /// # Errors
    /// Returns an error if the host can't map the address at all, which is different from nothing
    /// answering there (see [`Region::probe`])
    fn map_region(&self, address: u32) -> BusResult<Self::Region>;

    /// Connect `handler` to interrupt vector `vector`
    /// # Errors
    /// Returns an error if the vector can't be connected
    fn register_interrupt(&self, vector: u8, handler: InterruptHandler) -> BusResult<()>;

    /// Enable the bus interrupt request level `level`. Enabling an enabled level is harmless.
    /// # Errors
    /// Returns an error if the level can't be enabled
    fn enable_interrupt_level(&self, level: u8) -> BusResult<()>;
}
