//! In this example, we bring up a board of two simulated cards from a startup configuration,
//! switch one to external trigger and read a triggered scan in engineering units.
//!
//! Run with `RUST_LOG=icv150=debug` to see every step.

use icv150::prelude::*;
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::Duration,
};
use tracing_subscriber::EnvFilter;

const STARTUP: &str = r#"
base_address = 0x500000
vector_base = 0xC0
interrupt_level = 2
settle_delay = "17ms"

[[card]]
slot = 1
resolution = 14
"#;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = BoardConfig::from_toml_str(STARTUP)?;
    let card1 = config.card_address(1);
    let bus = Mock::new()
        .with_card(config.card_address(0))
        .with_card(card1);

    // Collect the posted trigger events
    let events = Arc::new(Mutex::new(vec![]));
    let sink = {
        let events = Arc::clone(&events);
        move |event: u8| events.lock().push(event)
    };

    let board = Board::new(bus.clone(), config, sink)?;
    let found = board.discover()?;
    println!("Cards present - {:?}", found.present);

    // Card 0 scans its first 8 signals continuously at unity gain
    board.configure_scan_count(0, 8)?;
    for signal in 0..8 {
        board.set_gain(0, signal, 0)?;
    }

    // Card 1 scans 16 signals once per trigger
    board.configure_scan_count(1, 16)?;
    board.enable_external_trigger(1, 42)?;

    // Fake some conversions, then trigger card 1 and play the end of conversion interrupt
    for signal in 0..16 {
        bus.set_sample(card1, signal, 1024 * signal as u16);
    }
    board.soft_trigger(1)?;
    bus.raise(board.config().vector(1));
    let count = board.wait_for_trigger(1, 0, Duration::from_secs(1))?;
    println!("Card 1 triggers - {count}, events - {:?}", events.lock());

    let Samples::F64(volts) = board.read_batch(
        1,
        0,
        16,
        "DOUBLE".parse()?,
        DisplayRange::new(-10.0, 10.0),
    )?
    else {
        anyhow::bail!("Asked for doubles");
    };
    println!("Card 1 volts - {volts:.3?}");

    for card in board.report() {
        println!("{card}");
    }
    Ok(())
}
