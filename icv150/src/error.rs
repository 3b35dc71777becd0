//! Error types for the controller core.
//!
//! Every variant names the card and, where there is one, the offending parameter, so a rejected
//! configuration call can be reported as-is to whoever issued it.

use crate::{
    bus,
    registry::ScanMode,
};
use thiserror::Error;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Nothing answered at the card's address, or discovery never registered it
    #[error("Card {card} is not present")]
    CardNotPresent { card: usize },

    /// A malformed parameter
    #[error("Invalid {param} `{value}` for card {card}")]
    InvalidArgument {
        card: usize,
        param: &'static str,
        value: u64,
    },

    /// A parameter outside its documented bounds
    #[error("Invalid {param} `{value}` for card {card} - valid range is [{min}, {max}]")]
    OutOfRange {
        card: usize,
        param: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// A signal index past the configured last channel
    #[error("Invalid signal {signal} for card {card} - last scanned signal is {last_channel}")]
    SignalOutOfRange {
        card: usize,
        signal: usize,
        last_channel: u8,
    },

    /// A block of signals running past the configured last channel
    #[error(
        "Invalid signals count {count} from signal {first} for card {card} - last scanned signal \
         is {last_channel}"
    )]
    RangeExceeded {
        card: usize,
        first: usize,
        count: usize,
        last_channel: u8,
    },

    /// The operation isn't valid in the card's current scan mode
    #[error("Card {card} is {mode}, enable the external trigger first")]
    WrongMode { card: usize, mode: ScanMode },

    #[error("Unsupported sample format `{0}`")]
    UnsupportedFormat(String),

    /// The board's base address couldn't be mapped, so no card can be probed
    #[error("Unable to map the board base address {address:#08x}")]
    MapFailed {
        address: u32,
        #[source]
        source: bus::Error,
    },

    /// Interrupt wiring failed for a present card, it can't be serviced
    #[error("Card {card} interrupt wiring failed")]
    Fatal {
        card: usize,
        #[source]
        source: bus::Error,
    },

    /// A register access was rejected by the bus
    #[error("Bus error on card {card}")]
    Bus {
        card: usize,
        #[source]
        source: bus::Error,
    },
}

impl Error {
    /// The card this error is about, if any
    #[must_use]
    pub fn card(&self) -> Option<usize> {
        match self {
            Error::CardNotPresent { card }
            | Error::InvalidArgument { card, .. }
            | Error::OutOfRange { card, .. }
            | Error::SignalOutOfRange { card, .. }
            | Error::RangeExceeded { card, .. }
            | Error::WrongMode { card, .. }
            | Error::Fatal { card, .. }
            | Error::Bus { card, .. } => Some(*card),
            Error::UnsupportedFormat(_) | Error::MapFailed { .. } => None,
        }
    }
}

/// Tags a bus error with the card it happened on, for use with `map_err`
pub(crate) fn on_card(card: usize) -> impl FnOnce(bus::Error) -> Error {
    move |source| Error::Bus { card, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_card_and_parameter() {
        let e = Error::OutOfRange {
            card: 2,
            param: "event",
            value: 300,
            min: 0,
            max: 255,
        };
        let msg = e.to_string();
        assert!(msg.contains("card 2"));
        assert!(msg.contains("event"));
        assert!(msg.contains("300"));
        assert_eq!(e.card(), Some(2));
    }

    #[test]
    fn test_wrong_mode_message() {
        let e = Error::WrongMode {
            card: 1,
            mode: ScanMode::AutoScanning,
        };
        assert_eq!(
            e.to_string(),
            "Card 1 is automatic scanning, enable the external trigger first"
        );
    }

    #[test]
    fn test_bus_source_is_kept() {
        use std::error::Error as _;
        let e = on_card(3)(bus::Error::Level(2));
        assert_eq!(e.card(), Some(3));
        assert_eq!(
            e.source().map(ToString::to_string),
            Some("Unable to enable bus interrupt level 2".to_owned())
        );
    }
}
