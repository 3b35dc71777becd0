//! Finding the cards of a board and wiring their interrupts.

use crate::{
    board::{
        Board,
        EventSink,
    },
    bus::{
        Bus,
        Region,
    },
    error::{
        on_card,
        Error,
        Result,
    },
    interrupt,
    registers::InterruptConfig,
    registry::{
        CardSlot,
        ScanMode,
    },
};
use std::sync::Arc;
use tracing::{
    debug,
    error,
    info,
    warn,
};

/// The outcome of a successful discovery
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryReport {
    /// Slots with a working card, ascending
    pub present: Vec<usize>,
}

impl<B, S> Board<B, S>
where
    B: Bus,
    S: EventSink,
{
    /// Probe every slot of the board, register the cards that answer and connect their
    /// interrupts.
    ///
    /// Discovery only ever runs once, later calls return the first outcome without touching the
    /// bus. Empty slots are expected and aren't an error.
    /// # Errors
    /// Returns [`Error::MapFailed`] if the board's base address can't be mapped. If a present card
    /// can't have its interrupt handler connected or the interrupt level can't be enabled, the
    /// other slots are still probed and the [`Error::Fatal`] of the first such card is returned,
    /// that card stays unregistered. A card whose interrupt configuration write fails is logged
    /// and registered anyway.
    pub fn discover(&self) -> Result<DiscoveryReport> {
        let mut ran = false;
        let outcome = self.discovery.get_or_init(|| {
            ran = true;
            self.probe_slots()
        });
        if !ran {
            debug!("Discovery already ran");
        }
        outcome.clone()
    }

    fn probe_slots(&self) -> Result<DiscoveryReport> {
        let base = self.config.base_address;
        let mut base_region = Some(self.bus.map_region(base).map_err(|source| {
            error!(error = %source, "Unable to map the board base address {base:#08x}");
            Error::MapFailed {
                address: base,
                source,
            }
        })?);
        let mut present = vec![];
        let mut failure = None;
        let mut level_enabled = false;
        for (card, slot) in self.registry.slots().enumerate() {
            let address = self.config.card_address(card);
            // The first card sits at the base address, we already have its window
            let region = if address == base {
                base_region.take()
            } else {
                self.bus
                    .map_region(address)
                    .map_err(|e| debug!(card, error = %e, "Unable to map card window"))
                    .ok()
            };
            let Some(mut region) = region else {
                continue;
            };
            if !region.probe() {
                debug!(card, "No card at {address:#08x}");
                continue;
            }
            info!(card, "Card present at {address:#08x}");
            match self.attach(card, slot, region, &mut level_enabled) {
                Ok(()) => present.push(card),
                Err(e) => {
                    error!(card, error = %e, "Card left unregistered");
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(DiscoveryReport { present }),
        }
    }

    /// Connect the interrupt of a present card, program it and register the card.
    ///
    /// The bus has no way to disconnect a vector, so a card that fails after its handler is
    /// connected keeps it. Interrupts on that vector find no region and log an acknowledgment
    /// failure.
    fn attach(
        &self,
        card: usize,
        slot: &Arc<CardSlot<B::Region>>,
        mut region: B::Region,
        level_enabled: &mut bool,
    ) -> Result<()> {
        let vector = self.config.vector(card);
        let level = self.config.interrupt_level;
        self.bus
            .register_interrupt(
                vector,
                interrupt::handler(Arc::clone(slot), Arc::clone(&self.sink)),
            )
            .map_err(|source| Error::Fatal { card, source })?;
        debug!(card, vector, "Interrupt handler connected");
        if !*level_enabled {
            self.bus
                .enable_interrupt_level(level)
                .map_err(|source| Error::Fatal { card, source })?;
            *level_enabled = true;
            debug!(card, level, "Interrupt level enabled");
        }
        if let Err(e) = region.write(&InterruptConfig::new(vector, level)) {
            let e = on_card(card)(e);
            warn!(card, error = %e, "Unable to program the interrupt configuration");
        }
        let base = region.base();
        let mut state = slot.lock();
        state.region = Some(region);
        // Cards power up scanning
        state.scan_mode = ScanMode::AutoScanning;
        state.trigger_count = 0;
        info!(card, vector, level, "Card registered at {base:#08x}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::NoEvents,
        bus::mock::Mock,
        config::BoardConfig,
        registers::Address,
    };
    use tracing_test::traced_test;

    const BASE: u32 = 0x50_0000;

    fn board(bus: &Mock) -> Board<Mock, NoEvents> {
        Board::new(bus.clone(), BoardConfig::fast(), NoEvents).unwrap()
    }

    #[test]
    fn test_discovers_present_cards() {
        let bus = Mock::new().with_card(BASE).with_card(BASE + 0x2000);
        let board = board(&bus);
        let report = board.discover().unwrap();
        assert_eq!(report.present, vec![0, 2]);
        assert_eq!(bus.vectors(), vec![0xC0, 0xC2]);
        assert_eq!(bus.enabled_levels(), vec![2]);
        assert_eq!(bus.last_written(BASE, InterruptConfig::OFFSET), Some(0xC0FB));
        assert_eq!(
            bus.last_written(BASE + 0x2000, InterruptConfig::OFFSET),
            Some(0xC2FB)
        );
        assert!(board.get(0).is_ok());
        assert!(board.get(1).is_err());
        assert!(board.get(2).is_ok());
        assert!(board.get(3).is_err());
    }

    #[test]
    fn test_no_cards_is_fine() {
        let bus = Mock::new();
        let board = board(&bus);
        assert_eq!(board.discover().unwrap(), DiscoveryReport::default());
        assert!(bus.vectors().is_empty());
        assert!(bus.enabled_levels().is_empty());
        assert!(board.report().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_runs_once() {
        let bus = Mock::new().with_card(BASE);
        let board = board(&bus);
        let first = board.discover().unwrap();
        let accesses = bus.log().len();
        bus.clear_log();
        let second = board.discover().unwrap();
        assert_eq!(first, second);
        assert!(accesses > 0);
        assert!(bus.log().is_empty());
        assert_eq!(bus.enabled_levels(), vec![2]);
        assert!(logs_contain("Discovery already ran"));
    }

    #[test]
    fn test_base_map_failure() {
        let bus = Mock::new().with_card(BASE).with_unmappable(BASE);
        let board = board(&bus);
        assert!(matches!(
            board.discover(),
            Err(Error::MapFailed { address: BASE, .. })
        ));
        assert!(bus.log().is_empty());
        assert!(bus.vectors().is_empty());
        // Repeats the first outcome
        assert!(matches!(board.discover(), Err(Error::MapFailed { .. })));
    }

    #[test]
    fn test_unmappable_slot_is_absent() {
        let bus = Mock::new()
            .with_card(BASE)
            .with_card(BASE + 0x1000)
            .with_unmappable(BASE + 0x1000);
        let board = board(&bus);
        assert_eq!(board.discover().unwrap().present, vec![0]);
    }

    #[test]
    fn test_vector_failure_spares_other_cards() {
        let bus = Mock::new()
            .with_card(BASE)
            .with_card(BASE + 0x1000)
            .with_card(BASE + 0x2000)
            .with_failing_vector(0xC1);
        let board = board(&bus);
        assert!(matches!(
            board.discover(),
            Err(Error::Fatal { card: 1, .. })
        ));
        assert!(board.get(0).is_ok());
        assert!(matches!(board.get(1), Err(Error::CardNotPresent { card: 1 })));
        assert!(board.get(2).is_ok());
        assert_eq!(bus.vectors(), vec![0xC0, 0xC2]);
        // The failed card was never told to interrupt
        assert_eq!(bus.last_written(BASE + 0x1000, InterruptConfig::OFFSET), None);
    }

    #[test]
    fn test_level_failure_is_fatal() {
        let bus = Mock::new()
            .with_card(BASE + 0x1000)
            .with_card(BASE + 0x3000)
            .with_failing_level(2);
        let board = board(&bus);
        assert!(matches!(
            board.discover(),
            Err(Error::Fatal { card: 1, .. })
        ));
        assert!(board.report().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_interrupt_config_write_failure_keeps_card() {
        let bus = Mock::new()
            .with_card(BASE)
            .with_card(BASE + 0x1000)
            .with_failing_write(BASE, InterruptConfig::OFFSET);
        let board = board(&bus);
        assert_eq!(board.discover().unwrap().present, vec![0, 1]);
        assert!(logs_contain("Unable to program the interrupt configuration"));
        assert_eq!(bus.last_written(BASE, InterruptConfig::OFFSET), None);
        assert_eq!(
            bus.last_written(BASE + 0x1000, InterruptConfig::OFFSET),
            Some(0xC1FB)
        );
        // The card is registered and usable
        bus.set_sample(BASE, 3, 0x0042);
        assert_eq!(board.read_one(0, 3).unwrap(), 0x0042);
        board.enable_external_trigger(0, 4).unwrap();
        assert!(bus.raise(0xC0));
        assert_eq!(board.get(0).unwrap().trigger_count, 1);
    }

    #[traced_test]
    #[test]
    fn test_failed_card_keeps_spurious_handler() {
        let bus = Mock::new().with_card(BASE).with_failing_level(2);
        let board = board(&bus);
        assert!(matches!(board.discover(), Err(Error::Fatal { card: 0, .. })));
        // The handler was connected before the level failed and stays connected
        assert_eq!(bus.vectors(), vec![0xC0]);
        assert!(bus.raise(0xC0));
        assert_eq!(bus.acknowledgments(BASE), 0);
        assert!(logs_contain("Interrupt acknowledgment failed"));
    }

    #[test]
    fn test_custom_layout() {
        let config = BoardConfig {
            base_address: 0x60_0000,
            vector_base: 0xD0,
            interrupt_level: 5,
            ..BoardConfig::fast()
        };
        let bus = Mock::new().with_card(0x60_3000);
        let board = Board::new(bus.clone(), config, NoEvents).unwrap();
        assert_eq!(board.discover().unwrap().present, vec![3]);
        assert_eq!(bus.vectors(), vec![0xD3]);
        assert_eq!(bus.enabled_levels(), vec![5]);
        assert_eq!(
            bus.last_written(0x60_3000, InterruptConfig::OFFSET),
            Some(0xD3F5)
        );
    }

    #[test]
    fn test_configured_resolution_applies() {
        let config = BoardConfig::from_toml_str(
            "settle_delay = \"0s\"\n[[card]]\nslot = 0\nresolution = 14\n",
        )
        .unwrap();
        let bus = Mock::new().with_card(BASE);
        let board = Board::new(bus.clone(), config, NoEvents).unwrap();
        board.discover().unwrap();
        bus.set_sample(BASE, 0, 0xFFFF);
        assert_eq!(board.read_one(0, 0).unwrap(), 0x3FFF);
    }
}
