//! End of conversion interrupt service.
//!
//! Each present card gets its own handler, bound at discovery to that card's slot and to the
//! board's event sink. Service takes the card lock, so it waits for any reconfiguration of the
//! same card to finish and never touches other cards.

use crate::{
    board::{
        Board,
        EventSink,
    },
    bus::{
        Bus,
        InterruptHandler,
        Region,
    },
    error::{
        on_card,
        Error,
        Result,
    },
    registers::EndOfConversion,
    registry::CardSlot,
};
use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};
use tracing::{
    trace,
    warn,
};

/// Service one end of conversion interrupt of the card in `slot`
pub(crate) fn service<R, S>(slot: &CardSlot<R>, sink: &S)
where
    R: Region,
    S: EventSink + ?Sized,
{
    let mut state = slot.lock();
    let card = state.card;
    // Reading the register is what releases the interrupt
    let ack = state
        .region()
        .and_then(|region| region.read_raw::<EndOfConversion>().map_err(on_card(card)));
    if let Err(e) = ack {
        // Also reached by a card left unregistered after its vector was connected
        warn!(card, error = %e, "Interrupt acknowledgment failed");
        return;
    }
    state.trigger_count += 1;
    let count = state.trigger_count;
    let event = state.trigger_event;
    drop(state);
    slot.triggered.notify_all();
    // Outside the lock, the sink is free to come back and read the card
    if event != 0 {
        sink.post_event(event);
    }
    trace!(card, count, event, "Interrupt serviced");
}

/// The handler to connect to the interrupt vector of the card in `slot`
pub(crate) fn handler<R, S>(slot: Arc<CardSlot<R>>, sink: Arc<S>) -> InterruptHandler
where
    R: Region,
    S: EventSink,
{
    Box::new(move || service(&slot, sink.as_ref()))
}

impl<B, S> Board<B, S>
where
    B: Bus,
    S: EventSink,
{
    /// Block until `card` has serviced more than `seen` interrupts or `timeout` runs out.
    /// Returns the trigger count at wake up, which is still `seen` (or lower, if the scan mode
    /// changed) on timeout.
    /// # Errors
    /// Returns an error if the card isn't present
    pub fn wait_for_trigger(&self, card: usize, seen: u64, timeout: Duration) -> Result<u64> {
        let slot = self.registry.slot(card)?;
        let deadline = Instant::now() + timeout;
        let mut state = slot.lock();
        if !state.is_present() {
            return Err(Error::CardNotPresent { card });
        }
        while state.trigger_count <= seen {
            if slot.triggered.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Ok(state.trigger_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::mock::Mock,
        config::BoardConfig,
    };
    use parking_lot::Mutex;
    use std::thread;
    use tracing_test::traced_test;

    const BASE: u32 = 0x50_0000;

    type Events = Arc<Mutex<Vec<u8>>>;

    fn setup() -> (Mock, Board<Mock, impl EventSink>, Events) {
        let bus = Mock::new().with_card(BASE).with_card(BASE + 0x1000);
        let events: Events = Arc::default();
        let sink = {
            let events = Arc::clone(&events);
            move |event: u8| events.lock().push(event)
        };
        let board = Board::new(bus.clone(), BoardConfig::fast(), sink).unwrap();
        board.discover().unwrap();
        (bus, board, events)
    }

    #[test]
    fn test_service_posts_event() {
        let (bus, board, events) = setup();
        board.enable_external_trigger(0, 17).unwrap();
        assert!(bus.raise(0xC0));
        assert!(bus.raise(0xC0));
        assert_eq!(*events.lock(), vec![17, 17]);
        assert_eq!(board.get(0).unwrap().trigger_count, 2);
        assert_eq!(bus.acknowledgments(BASE), 2);
    }

    #[test]
    fn test_event_zero_posts_nothing() {
        let (bus, board, events) = setup();
        board.enable_external_trigger(0, 0).unwrap();
        assert!(bus.raise(0xC0));
        assert!(events.lock().is_empty());
        // Still acknowledged and counted
        assert_eq!(bus.acknowledgments(BASE), 1);
        assert_eq!(board.get(0).unwrap().trigger_count, 1);
    }

    #[test]
    fn test_routes_to_raising_card() {
        let (bus, board, events) = setup();
        board.enable_external_trigger(0, 1).unwrap();
        board.enable_external_trigger(1, 2).unwrap();
        assert!(bus.raise(0xC1));
        assert_eq!(*events.lock(), vec![2]);
        assert_eq!(board.get(0).unwrap().trigger_count, 0);
        assert_eq!(board.get(1).unwrap().trigger_count, 1);
        assert_eq!(bus.acknowledgments(BASE), 0);
        assert_eq!(bus.acknowledgments(BASE + 0x1000), 1);
        // Nothing is connected for the empty slots
        assert!(!bus.raise(0xC2));
    }

    #[traced_test]
    #[test]
    fn test_failed_acknowledgment_is_empty() {
        let (bus, board, events) = setup();
        board.enable_external_trigger(0, 5).unwrap();
        bus.unplug(BASE);
        assert!(bus.raise(0xC0));
        assert!(events.lock().is_empty());
        assert_eq!(board.get(0).unwrap().trigger_count, 0);
        assert!(logs_contain("Interrupt acknowledgment failed"));
    }

    #[test]
    fn test_wait_for_trigger() {
        let (bus, board, _) = setup();
        board.enable_external_trigger(0, 0).unwrap();
        let raiser = {
            let bus = bus.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                bus.raise(0xC0)
            })
        };
        let count = board
            .wait_for_trigger(0, 0, Duration::from_secs(10))
            .unwrap();
        assert_eq!(count, 1);
        assert!(raiser.join().unwrap());
    }

    #[test]
    fn test_wait_for_trigger_times_out() {
        let (_bus, board, _) = setup();
        let count = board
            .wait_for_trigger(1, 0, Duration::from_millis(10))
            .unwrap();
        assert_eq!(count, 0);
        assert!(matches!(
            board.wait_for_trigger(3, 0, Duration::ZERO),
            Err(Error::CardNotPresent { card: 3 })
        ));
    }

    #[test]
    fn test_sink_can_read_card() {
        let bus = Mock::new().with_card(BASE);
        let board: Arc<Mutex<Option<Arc<Board<Mock, Box<dyn Fn(u8) + Send + Sync>>>>>> =
            Arc::default();
        let reads = Arc::new(Mutex::new(vec![]));
        let sink: Box<dyn Fn(u8) + Send + Sync> = {
            let board = Arc::clone(&board);
            let reads = Arc::clone(&reads);
            Box::new(move |_| {
                if let Some(board) = board.lock().as_ref() {
                    reads.lock().push(board.read_one(0, 0).unwrap());
                }
            })
        };
        let b = Arc::new(Board::new(bus.clone(), BoardConfig::fast(), sink).unwrap());
        b.discover().unwrap();
        b.enable_external_trigger(0, 1).unwrap();
        bus.set_sample(BASE, 0, 0x0123);
        *board.lock() = Some(Arc::clone(&b));
        assert!(bus.raise(0xC0));
        assert_eq!(*reads.lock(), vec![0x0123]);
        // Break the cycle
        board.lock().take();
    }
}
