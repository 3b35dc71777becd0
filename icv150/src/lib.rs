//! Controller core for ADAS ICV150 multiplexed VME ADC boards.
//!
//! A board holds up to four cards in consecutive 4 KiB windows of A24 space, each digitizing up
//! to 128 differential signals. [`board::Board`] owns the cards of one board: discover them
//! once at startup, configure scanning and gains, then read conversion results singly or in
//! blocks. Cards in external trigger mode interrupt at the end of every scan and post an event
//! to the board's [`board::EventSink`].
//!
//! ```
//! use icv150::prelude::*;
//!
//! let bus = Mock::new().with_card(0x50_0000);
//! let config = BoardConfig {
//!     settle_delay: std::time::Duration::ZERO,
//!     ..BoardConfig::default()
//! };
//! let board = Board::new(bus.clone(), config, NoEvents).unwrap();
//! board.discover().unwrap();
//! board.configure_scan_count(0, 8).unwrap();
//! bus.set_sample(0x50_0000, 3, 0x1234);
//! assert_eq!(board.read_one(0, 3).unwrap(), 0x1234);
//! ```
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod board;
pub mod bus;
pub mod config;
pub mod discovery;
pub mod error;
pub mod interrupt;
pub mod prelude;
pub mod reader;
pub mod registers;
pub mod registry;
pub mod scan;
