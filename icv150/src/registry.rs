//! The per-card state table.
//!
//! The registry is a fixed array of four slots, one per card the board can hold. Each slot owns
//! the card's mapped window together with everything the controller remembers about it, behind a
//! single per-card lock. Every path that touches a card (configuration, reads, interrupt service)
//! goes through that lock, and cards never share one.

use crate::{
    board::{
        Board,
        EventSink,
    },
    bus::{
        Bus,
        Region,
    },
    config::BoardConfig,
    error::{
        Error,
        Result,
    },
};
use parking_lot::{
    Condvar,
    Mutex,
    MutexGuard,
};
use std::{
    fmt::Display,
    sync::Arc,
};
use tracing::{
    info,
    warn,
};

/// Number of cards a board can hold
pub const MAX_CARDS: usize = 4;

/// Last scanned signal of a card that has never been configured (32 signals, the base card)
pub const DEFAULT_LAST_CHANNEL: u8 = 31;

/// ADC bit depth of a card, which sets the mask applied to every conversion result
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Resolution {
    Bits12,
    Bits14,
    #[default]
    Bits16,
}

impl Resolution {
    /// The mask isolating the valid bits of a conversion result
    #[must_use]
    pub fn mask(&self) -> u16 {
        match self {
            Resolution::Bits12 => 0x0FFF,
            Resolution::Bits14 => 0x3FFF,
            Resolution::Bits16 => 0xFFFF,
        }
    }

    #[must_use]
    pub fn bits(&self) -> u32 {
        match self {
            Resolution::Bits12 => 12,
            Resolution::Bits14 => 14,
            Resolution::Bits16 => 16,
        }
    }

    /// The resolution with `bits` bits, if the card comes in that flavor
    #[must_use]
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            12 => Some(Resolution::Bits12),
            14 => Some(Resolution::Bits14),
            16 => Some(Resolution::Bits16),
            _ => None,
        }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bit ADC", self.bits())
    }
}

/// How a card acquires
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Not converting. Only ever seen between a quiesce and the matching resume.
    #[default]
    Stopped,
    /// Continuously converting every scanned signal
    AutoScanning,
    /// One scan per trigger, interrupting at the end of conversion
    ExternalTrigger,
}

impl Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Stopped => write!(f, "stopped"),
            ScanMode::AutoScanning => write!(f, "automatic scanning"),
            ScanMode::ExternalTrigger => write!(f, "scanning on external trigger"),
        }
    }
}

/// Everything the controller knows about one card
#[derive(Debug)]
pub struct CardState<R> {
    pub(crate) card: usize,
    /// Mapped window, only present once discovery found the card
    pub(crate) region: Option<R>,
    /// Bus address of the window
    pub(crate) address: u32,
    pub(crate) resolution: Resolution,
    pub(crate) scan_mode: ScanMode,
    pub(crate) last_channel: u8,
    /// Event posted on every serviced interrupt, 0 for none
    pub(crate) trigger_event: u8,
    /// Interrupts serviced since the last scan mode change
    pub(crate) trigger_count: u64,
}

impl<R: Region> CardState<R> {
    fn new(card: usize, address: u32, resolution: Resolution) -> Self {
        Self {
            card,
            region: None,
            address,
            resolution,
            scan_mode: ScanMode::Stopped,
            last_channel: DEFAULT_LAST_CHANNEL,
            trigger_event: 0,
            trigger_count: 0,
        }
    }

    /// The card's mapped window
    /// # Errors
    /// Returns [`Error::CardNotPresent`] if the card was never discovered
    pub(crate) fn region(&mut self) -> Result<&mut R> {
        let card = self.card;
        self.region.as_mut().ok_or(Error::CardNotPresent { card })
    }

    pub(crate) fn is_present(&self) -> bool {
        self.region.is_some()
    }

    /// Checks `signal` against the scanned range
    pub(crate) fn check_signal(&self, signal: usize) -> Result<u8> {
        match u8::try_from(signal) {
            Ok(s) if s <= self.last_channel => Ok(s),
            _ => Err(Error::SignalOutOfRange {
                card: self.card,
                signal,
                last_channel: self.last_channel,
            }),
        }
    }

    pub(crate) fn view(&self) -> CardView {
        CardView {
            card: self.card,
            address: self.address,
            resolution: self.resolution,
            scan_mode: self.scan_mode,
            last_channel: self.last_channel,
            trigger_event: self.trigger_event,
            trigger_count: self.trigger_count,
        }
    }
}

/// One card's state and the condition interrupt service signals on
#[derive(Debug)]
pub struct CardSlot<R> {
    pub(crate) state: Mutex<CardState<R>>,
    pub(crate) triggered: Condvar,
}

impl<R> CardSlot<R> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, CardState<R>> {
        self.state.lock()
    }
}

/// The four card slots of a board
#[derive(Debug)]
pub struct Registry<R> {
    slots: [Arc<CardSlot<R>>; MAX_CARDS],
}

impl<R: Region> Registry<R> {
    /// An empty registry laid out by `config`
    #[must_use]
    pub fn new(config: &BoardConfig) -> Self {
        Self {
            slots: std::array::from_fn(|card| {
                Arc::new(CardSlot {
                    state: Mutex::new(CardState::new(
                        card,
                        config.card_address(card),
                        config.resolution(card),
                    )),
                    triggered: Condvar::new(),
                })
            }),
        }
    }

    /// The slot for `card`
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the index is past the last slot
    pub(crate) fn slot(&self, card: usize) -> Result<&Arc<CardSlot<R>>> {
        self.slots.get(card).ok_or(Error::InvalidArgument {
            card,
            param: "card",
            value: card as u64,
        })
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = &Arc<CardSlot<R>>> {
        self.slots.iter()
    }
}

/// A snapshot of one card's state
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardView {
    pub card: usize,
    pub address: u32,
    pub resolution: Resolution,
    pub scan_mode: ScanMode,
    pub last_channel: u8,
    pub trigger_event: u8,
    pub trigger_count: u64,
}

impl CardView {
    /// Number of signals scanned
    #[must_use]
    pub fn signal_count(&self) -> usize {
        usize::from(self.last_channel) + 1
    }

    #[must_use]
    pub fn mask(&self) -> u16 {
        self.resolution.mask()
    }
}

impl Display for CardView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Report ICV150 card {}:", self.card)?;
        writeln!(f, "- VME address = {:#x}", self.address)?;
        writeln!(f, "- {}", self.resolution)?;
        writeln!(f, "- {}", self.scan_mode)?;
        if self.scan_mode == ScanMode::ExternalTrigger {
            writeln!(f, "- number of trigs = {}", self.trigger_count)?;
        }
        write!(f, "- number of scanned signals = {}", self.signal_count())
    }
}

impl<B, S> Board<B, S>
where
    B: Bus,
    S: EventSink,
{
    /// Set the ADC bit depth of `card` to `bits` (12, 14 or 16).
    ///
    /// This is meant to be called before [`Board::discover`], the bit depth is a property of the
    /// board revision and isn't expected to change under a live card. The slot address is probed
    /// directly, so this works before discovery has registered the card.
    /// # Errors
    /// Returns an error on an unknown bit depth or if nothing answers at the card's address
    pub fn set_resolution(&self, card: usize, bits: u32) -> Result<()> {
        let mut state = self.registry.slot(card)?.lock();
        if !state.is_present() && !self.answers(state.address) {
            warn!(card, operation = "set_resolution", "Card missing");
            return Err(Error::CardNotPresent { card });
        }
        state.resolution = Resolution::from_bits(bits).ok_or(Error::InvalidArgument {
            card,
            param: "resolution",
            value: bits.into(),
        })?;
        info!(card, bits, "Resolution set");
        Ok(())
    }

    /// A snapshot of the state of `card`
    /// # Errors
    /// Returns an error if the card isn't present
    pub fn get(&self, card: usize) -> Result<CardView> {
        let state = self.registry.slot(card)?.lock();
        if state.is_present() {
            Ok(state.view())
        } else {
            Err(Error::CardNotPresent { card })
        }
    }

    /// Snapshots of every present card, in slot order
    #[must_use]
    pub fn report(&self) -> Vec<CardView> {
        self.registry
            .slots()
            .filter_map(|slot| {
                let state = slot.lock();
                state.is_present().then(|| state.view())
            })
            .collect()
    }

    /// Whether anything answers a probe at `address`
    fn answers(&self, address: u32) -> bool {
        self.bus
            .map_region(address)
            .map(|mut region| region.probe())
            .unwrap_or(false)
    }
}
