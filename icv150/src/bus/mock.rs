//! Mock bus implementation used in testing the controller

use super::{
    Bus,
    BusResult,
    Error,
    InterruptHandler,
    Region,
};
use crate::registers::{
    data_offset,
    Address,
    EndOfConversion,
    ExternalTrigger,
    InterruptConfig,
    Oversampling,
    ScanCount,
    ScanningState,
    SoftTrigger,
    Start,
    Stop,
    StoreGains,
    MAX_SIGNALS,
    READ_GAIN_BASE,
    REGION_SIZE,
};
use parking_lot::Mutex;
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::Arc,
};

/// One bus access as seen by the mock
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    Read { address: u32 },
    Write { address: u32, word: u16 },
}

/// Simulated state of one card
#[derive(Debug, Default)]
struct Card {
    /// Words returned by reads of the data area, by offset
    inputs: HashMap<u16, u16>,
    /// Gain RAM, by signal data offset
    gain_ram: HashMap<u16, u16>,
    /// Gain codes committed to NOVRAM
    novram: HashMap<u16, u16>,
    novram_commits: usize,
    /// Last word written at each offset
    written: HashMap<u16, u16>,
    scanning: bool,
    soft_triggers: usize,
    acknowledgments: usize,
    /// Configuration writes that landed while the card was scanning
    writes_while_scanning: usize,
}

#[derive(Debug, Default)]
struct State {
    cards: HashMap<u32, Card>,
    log: Vec<Access>,
    unmappable: HashSet<u32>,
    failing_vectors: HashSet<u8>,
    failing_levels: HashSet<u8>,
    /// (card address, offset) pairs whose writes are rejected
    failing_writes: HashSet<(u32, u16)>,
    levels: Vec<u8>,
}

/// A bus that simulates ICV150 cards in memory, useful for testing.
///
/// Clones share the same simulated hardware, so a test can keep one while handing another to
/// the controller.
#[derive(Clone, Default)]
pub struct Mock {
    state: Arc<Mutex<State>>,
    handlers: Arc<Mutex<HashMap<u8, Arc<InterruptHandler>>>>,
}

impl std::fmt::Debug for Mock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mock")
            .field("state", &self.state)
            .field("vectors", &self.vectors())
            .finish()
    }
}

impl Mock {
    /// Construct a new mock bus with no cards plugged in
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a card in at `address`. Cards power up scanning automatically.
    #[must_use]
    pub fn with_card(self, address: u32) -> Self {
        self.state.lock().cards.insert(
            address,
            Card {
                scanning: true,
                ..Default::default()
            },
        );
        self
    }

    /// Make mapping `address` fail
    #[must_use]
    pub fn with_unmappable(self, address: u32) -> Self {
        self.state.lock().unmappable.insert(address);
        self
    }

    /// Make connecting `vector` fail
    #[must_use]
    pub fn with_failing_vector(self, vector: u8) -> Self {
        self.state.lock().failing_vectors.insert(vector);
        self
    }

    /// Make enabling interrupt level `level` fail
    #[must_use]
    pub fn with_failing_level(self, level: u8) -> Self {
        self.state.lock().failing_levels.insert(level);
        self
    }

    /// Make every write to `offset` of the card at `address` a bus error
    #[must_use]
    pub fn with_failing_write(self, address: u32, offset: u16) -> Self {
        self.state.lock().failing_writes.insert((address, offset));
        self
    }

    /// Pull the card at `address`, every further access to it is a bus error
    pub fn unplug(&self, address: u32) {
        self.state.lock().cards.remove(&address);
    }

    /// Set the conversion result of `signal` on the card at `address`
    pub fn set_sample(&self, address: u32, signal: usize, word: u16) {
        let offset = signal_offset(signal);
        let mut state = self.state.lock();
        let card = state.cards.get_mut(&address).expect("No card at address");
        card.inputs.insert(offset, word);
    }

    /// The last word written at `offset` of the card at `address`
    #[must_use]
    pub fn last_written(&self, address: u32, offset: u16) -> Option<u16> {
        self.with_card_state(address, |c| c.written.get(&offset).copied())
    }

    /// The gain code committed to NOVRAM for `signal`
    #[must_use]
    pub fn novram_gain(&self, address: u32, signal: usize) -> Option<u16> {
        let offset = signal_offset(signal);
        self.with_card_state(address, |c| c.novram.get(&offset).copied())
    }

    #[must_use]
    pub fn novram_commits(&self, address: u32) -> usize {
        self.with_card_state(address, |c| c.novram_commits)
    }

    #[must_use]
    pub fn is_scanning(&self, address: u32) -> bool {
        self.with_card_state(address, |c| c.scanning)
    }

    #[must_use]
    pub fn soft_triggers(&self, address: u32) -> usize {
        self.with_card_state(address, |c| c.soft_triggers)
    }

    #[must_use]
    pub fn acknowledgments(&self, address: u32) -> usize {
        self.with_card_state(address, |c| c.acknowledgments)
    }

    /// Number of configuration register writes that landed while scanning was live
    #[must_use]
    pub fn writes_while_scanning(&self, address: u32) -> usize {
        self.with_card_state(address, |c| c.writes_while_scanning)
    }

    /// Every access made so far, in order
    #[must_use]
    pub fn log(&self) -> Vec<Access> {
        self.state.lock().log.clone()
    }

    /// Just the writes made so far, as (address, word)
    #[must_use]
    pub fn writes(&self) -> Vec<(u32, u16)> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|a| match a {
                Access::Write { address, word } => Some((*address, *word)),
                Access::Read { .. } => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Interrupt levels that were enabled, in call order
    #[must_use]
    pub fn enabled_levels(&self) -> Vec<u8> {
        self.state.lock().levels.clone()
    }

    /// Connected interrupt vectors, sorted
    #[must_use]
    pub fn vectors(&self) -> Vec<u8> {
        let mut vectors: Vec<_> = self.handlers.lock().keys().copied().collect();
        vectors.sort_unstable();
        vectors
    }

    /// Raise an interrupt on `vector`, calling its handler from this thread.
    /// Returns false if nothing is connected to it.
    pub fn raise(&self, vector: u8) -> bool {
        // Don't hold our lock while the handler runs, it will come back to us for the ack
        let handler = self.handlers.lock().get(&vector).cloned();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    fn with_card_state<F, T>(&self, address: u32, f: F) -> T
    where
        F: FnOnce(&Card) -> T,
    {
        let state = self.state.lock();
        f(state.cards.get(&address).expect("No card at address"))
    }
}

fn signal_offset(signal: usize) -> u16 {
    assert!(signal < MAX_SIGNALS, "The card only has 128 signals");
    data_offset(u8::try_from(signal).expect("Checked above"))
}

impl Bus for Mock {
    type Region = MockRegion;

    fn map_region(&self, address: u32) -> BusResult<Self::Region> {
        if self.state.lock().unmappable.contains(&address) {
            return Err(Error::Unmapped(address));
        }
        Ok(MockRegion {
            base: address,
            state: Arc::clone(&self.state),
        })
    }

    fn register_interrupt(&self, vector: u8, handler: InterruptHandler) -> BusResult<()> {
        if self.state.lock().failing_vectors.contains(&vector) {
            return Err(Error::Interrupt {
                vector,
                reason: "vector refused by mock".to_owned(),
            });
        }
        self.handlers.lock().insert(vector, Arc::new(handler));
        Ok(())
    }

    fn enable_interrupt_level(&self, level: u8) -> BusResult<()> {
        let mut state = self.state.lock();
        if state.failing_levels.contains(&level) {
            return Err(Error::Level(level));
        }
        state.levels.push(level);
        Ok(())
    }
}

/// A mapped window onto the mock bus
#[derive(Debug)]
pub struct MockRegion {
    base: u32,
    state: Arc<Mutex<State>>,
}

impl Region for MockRegion {
    fn base(&self) -> u32 {
        self.base
    }

    fn probe(&mut self) -> bool {
        self.state.lock().cards.contains_key(&self.base)
    }

    fn read_word(&mut self, offset: u16) -> BusResult<u16> {
        let base = self.base;
        let mut state = self.state.lock();
        if u32::from(offset) >= REGION_SIZE {
            return Err(Error::Access { base, offset });
        }
        state.log.push(Access::Read {
            address: base + u32::from(offset),
        });
        let card = state
            .cards
            .get_mut(&base)
            .ok_or(Error::Access { base, offset })?;
        Ok(match offset {
            o if o == EndOfConversion::OFFSET => {
                card.acknowledgments += 1;
                0
            }
            o if o == ScanningState::OFFSET => u16::from(card.scanning),
            o if (READ_GAIN_BASE..READ_GAIN_BASE + 0x100).contains(&o) => card
                .gain_ram
                .get(&(o - READ_GAIN_BASE))
                .copied()
                .unwrap_or_default(),
            o => card.inputs.get(&o).copied().unwrap_or_default(),
        })
    }

    fn write_word(&mut self, offset: u16, word: u16) -> BusResult<()> {
        let base = self.base;
        let mut state = self.state.lock();
        if u32::from(offset) >= REGION_SIZE || state.failing_writes.contains(&(base, offset)) {
            return Err(Error::Access { base, offset });
        }
        state.log.push(Access::Write {
            address: base + u32::from(offset),
            word,
        });
        let card = state
            .cards
            .get_mut(&base)
            .ok_or(Error::Access { base, offset })?;
        card.written.insert(offset, word);
        match offset {
            o if o == Stop::OFFSET => card.scanning = false,
            o if o == Start::OFFSET || o == ExternalTrigger::OFFSET => card.scanning = true,
            o if o == SoftTrigger::OFFSET => card.soft_triggers += 1,
            o if o == InterruptConfig::OFFSET => {}
            o if o == StoreGains::OFFSET => {
                if card.scanning {
                    card.writes_while_scanning += 1;
                }
                card.novram = card.gain_ram.clone();
                card.novram_commits += 1;
            }
            o if o == ScanCount::OFFSET || o == Oversampling::OFFSET => {
                if card.scanning {
                    card.writes_while_scanning += 1;
                }
            }
            o if o < Start::OFFSET => {
                if card.scanning {
                    card.writes_while_scanning += 1;
                }
                card.gain_ram.insert(o, word);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: u32 = 0x50_0000;

    #[test]
    fn test_probe() {
        let bus = Mock::new().with_card(CARD);
        assert!(bus.map_region(CARD).unwrap().probe());
        assert!(!bus.map_region(CARD + REGION_SIZE).unwrap().probe());
    }

    #[test]
    fn test_unmappable() {
        let bus = Mock::new().with_unmappable(CARD);
        assert!(matches!(bus.map_region(CARD), Err(Error::Unmapped(CARD))));
    }

    #[test]
    fn test_read_sample() {
        let bus = Mock::new().with_card(CARD);
        bus.set_sample(CARD, 3, 0x1234);
        let mut region = bus.map_region(CARD).unwrap();
        assert_eq!(region.read_word(6).unwrap(), 0x1234);
        assert_eq!(region.read_word(8).unwrap(), 0);
    }

    #[test]
    fn test_gain_ram_readback() {
        let bus = Mock::new().with_card(CARD);
        let mut region = bus.map_region(CARD).unwrap();
        region.strobe::<Stop>().unwrap();
        region.write_word(4, 9).unwrap();
        assert_eq!(region.read_word(READ_GAIN_BASE + 4).unwrap(), 9);
        // The data side of the same offset is untouched
        assert_eq!(region.read_word(4).unwrap(), 0);
        assert_eq!(bus.writes_while_scanning(CARD), 0);
    }

    #[test]
    fn test_scanning_state() {
        let bus = Mock::new().with_card(CARD);
        let mut region = bus.map_region(CARD).unwrap();
        assert!(bus.is_scanning(CARD));
        region.strobe::<Stop>().unwrap();
        assert!(!bus.is_scanning(CARD));
        assert_eq!(region.read_raw::<ScanningState>().unwrap(), 0);
        region.strobe::<ExternalTrigger>().unwrap();
        assert!(bus.is_scanning(CARD));
    }

    #[test]
    fn test_detects_writes_while_scanning() {
        let bus = Mock::new().with_card(CARD);
        let mut region = bus.map_region(CARD).unwrap();
        region.write(&ScanCount::new(7)).unwrap();
        assert_eq!(bus.writes_while_scanning(CARD), 1);
        assert_eq!(bus.last_written(CARD, ScanCount::OFFSET), Some(7));
    }

    #[test]
    fn test_unplugged_card_errors() {
        let bus = Mock::new().with_card(CARD);
        let mut region = bus.map_region(CARD).unwrap();
        bus.unplug(CARD);
        assert!(matches!(
            region.read_raw::<EndOfConversion>(),
            Err(Error::Access { base: CARD, offset: 0x800 })
        ));
    }

    #[test]
    fn test_out_of_window() {
        let bus = Mock::new().with_card(CARD);
        let mut region = bus.map_region(CARD).unwrap();
        assert!(region.write_word(0x1000, 0).is_err());
    }

    #[test]
    fn test_failing_write() {
        let bus = Mock::new()
            .with_card(CARD)
            .with_failing_write(CARD, InterruptConfig::OFFSET);
        let mut region = bus.map_region(CARD).unwrap();
        assert!(matches!(
            region.write_word(0x800, 1),
            Err(Error::Access { base: CARD, offset: 0x800 })
        ));
        assert_eq!(bus.last_written(CARD, 0x800), None);
        // Reads of the same offset still work
        region.read_raw::<EndOfConversion>().unwrap();
        region.strobe::<Stop>().unwrap();
    }

    #[test]
    fn test_raise() {
        let bus = Mock::new();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        bus.register_interrupt(0xC0, Box::new(move || *counter.lock() += 1))
            .unwrap();
        assert!(bus.raise(0xC0));
        assert!(!bus.raise(0xC1));
        assert_eq!(*hits.lock(), 1);
        assert_eq!(bus.vectors(), vec![0xC0]);
    }

    #[test]
    fn test_failing_wiring() {
        let bus = Mock::new().with_failing_vector(0xC1).with_failing_level(3);
        assert!(bus.register_interrupt(0xC1, Box::new(|| ())).is_err());
        assert!(bus.enable_interrupt_level(3).is_err());
        bus.enable_interrupt_level(2).unwrap();
        assert_eq!(bus.enabled_levels(), vec![2]);
    }
}
