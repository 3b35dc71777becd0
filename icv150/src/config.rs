//! Board configuration, usually loaded from the startup TOML.
//!
//! ```toml
//! base_address = 0x500000
//! vector_base = 0xC0
//! interrupt_level = 2
//! settle_delay = "17ms"
//!
//! [[card]]
//! slot = 1
//! resolution = 12
//! ```
//!
//! Every key is optional and falls back to the factory jumper settings of the board.

use crate::registry::{
    Resolution,
    MAX_CARDS,
};
use crate::registers::REGION_SIZE;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to parse board configuration")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid resolution {bits} for card {slot} - valid values are 12, 14 and 16")]
    Resolution { slot: usize, bits: u32 },
    #[error("Invalid card slot {0} - valid slots are [0, 3]")]
    Slot(usize),
    #[error("Card {0} is configured more than once")]
    DuplicateSlot(usize),
    #[error("Invalid interrupt level {0} - valid levels are [1, 7]")]
    Level(u8),
    #[error("Vector base {0:#04x} leaves no room for four card vectors")]
    VectorBase(u8),
    #[error("Invalid region size {0:#x} - cards need at least 0x1000 bytes")]
    RegionSize(u32),
    #[error("Board at {0:#08x} runs past the end of the bus address space")]
    BaseAddress(u32),
}

/// Per-card settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CardConfig {
    pub slot: usize,
    /// ADC bit depth
    pub resolution: u32,
}

/// Bus layout and timing of one board
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    /// Bus address of card 0
    pub base_address: u32,
    /// Address stride between cards
    pub region_size: u32,
    /// Interrupt vector of card 0, card `n` uses `vector_base + n`
    pub vector_base: u8,
    /// Interrupt request level shared by all cards
    pub interrupt_level: u8,
    /// How long to let an in-flight conversion finish after stopping a card
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Extra wait after committing gains to NOVRAM
    #[serde(with = "humantime_serde")]
    pub store_delay: Duration,
    #[serde(rename = "card")]
    pub cards: Vec<CardConfig>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            base_address: 0x50_0000,
            region_size: REGION_SIZE,
            vector_base: 0xC0,
            interrupt_level: 2,
            // One tick of a 60 Hz system clock
            settle_delay: Duration::from_millis(17),
            store_delay: Duration::from_millis(17),
            cards: vec![],
        }
    }
}

impl BoardConfig {
    /// Parse and validate a TOML document
    /// # Errors
    /// Returns an error if the document doesn't parse or describes an invalid board
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration describes a board that can exist
    /// # Errors
    /// Returns the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=7).contains(&self.interrupt_level) {
            return Err(ConfigError::Level(self.interrupt_level));
        }
        if self.vector_base.checked_add(MAX_CARDS as u8 - 1).is_none() {
            return Err(ConfigError::VectorBase(self.vector_base));
        }
        if self.region_size < REGION_SIZE {
            return Err(ConfigError::RegionSize(self.region_size));
        }
        self.region_size
            .checked_mul(MAX_CARDS as u32)
            .and_then(|span| self.base_address.checked_add(span - 1))
            .ok_or(ConfigError::BaseAddress(self.base_address))?;
        let mut seen = [false; MAX_CARDS];
        for card in &self.cards {
            let slot = seen.get_mut(card.slot).ok_or(ConfigError::Slot(card.slot))?;
            if *slot {
                return Err(ConfigError::DuplicateSlot(card.slot));
            }
            *slot = true;
            if Resolution::from_bits(card.resolution).is_none() {
                return Err(ConfigError::Resolution {
                    slot: card.slot,
                    bits: card.resolution,
                });
            }
        }
        Ok(())
    }

    /// Bus address of the window of `card`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn card_address(&self, card: usize) -> u32 {
        self.base_address + self.region_size * card as u32
    }

    /// Interrupt vector of `card`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn vector(&self, card: usize) -> u8 {
        self.vector_base.wrapping_add(card as u8)
    }

    /// Configured resolution of `card`, the 16 bit default if it isn't listed
    #[must_use]
    pub fn resolution(&self, card: usize) -> Resolution {
        self.cards
            .iter()
            .find(|c| c.slot == card)
            .and_then(|c| Resolution::from_bits(c.resolution))
            .unwrap_or_default()
    }

    /// Default layout without the settle delays, so tests don't sleep
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            store_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
