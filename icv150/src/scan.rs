//! Scan mode control and on-board configuration.
//!
//! A card must not be reconfigured while it is converting. Every operation here goes through
//! `Board::reconfigure`, which stops the card, lets the in-flight conversion settle, hands the
//! caller a `Quiesced` card to write to and then re-arms whichever scan mode was active. The
//! card lock is held for the whole sequence, so the interrupt handler for the card can't run in
//! the middle of it.

use crate::{
    board::{
        Board,
        EventSink,
    },
    bus::{
        self,
        Bus,
        Region,
    },
    error::{
        on_card,
        Error,
        Result,
    },
    registers::{
        gain_read_offset,
        gain_write_offset,
        Address,
        Command,
        Deserialize,
        ExternalTrigger,
        GainCode,
        Oversampling,
        ScanCount,
        ScanningState,
        Serialize,
        SoftTrigger,
        Start,
        Stop,
        StoreGains,
        MAX_SIGNALS,
    },
    registry::{
        CardState,
        ScanMode,
    },
};
use parking_lot::MutexGuard;
use std::time::Duration;
use tracing::{
    debug,
    info,
    trace,
    warn,
};

/// A stopped card, the only way to write its configuration registers
pub(crate) struct Quiesced<'a, R: Region> {
    pub(crate) state: &'a mut CardState<R>,
    /// Mode to re-arm when we're done
    resume: ScanMode,
    /// Set once the mutate step has re-armed the card itself
    switched: bool,
}

impl<'a, R: Region> Quiesced<'a, R> {
    fn card(&self) -> usize {
        self.state.card
    }

    fn region(&mut self) -> Result<&mut R> {
        self.state.region()
    }

    pub(crate) fn write<T>(&mut self, reg: &T) -> Result<()>
    where
        T: Address + Serialize,
    {
        let card = self.card();
        self.region()?.write(reg).map_err(on_card(card))
    }

    pub(crate) fn strobe<T>(&mut self) -> Result<()>
    where
        T: Command,
    {
        let card = self.card();
        self.region()?.strobe::<T>().map_err(on_card(card))
    }

    pub(crate) fn write_gain(&mut self, signal: u8, gain: GainCode) -> Result<()> {
        let card = self.card();
        let word = gain
            .to_word()
            .map_err(|e| on_card(card)(bus::Error::from(e)))?;
        self.region()?
            .write_word(gain_write_offset(signal), word)
            .map_err(on_card(card))
    }

    pub(crate) fn read_gain(&mut self, signal: u8) -> Result<GainCode> {
        let card = self.card();
        let word = self
            .region()?
            .read_word(gain_read_offset(signal))
            .map_err(on_card(card))?;
        GainCode::from_word(word).map_err(|e| on_card(card)(bus::Error::from(e)))
    }

    /// Wait out a slow on-board operation
    pub(crate) fn settle(&self, delay: Duration) {
        std::thread::sleep(delay);
    }

    /// Re-arm the card in `mode` now instead of in its previous mode. Resets the trigger count.
    pub(crate) fn switch_to(&mut self, mode: ScanMode) -> Result<()> {
        self.arm(mode)?;
        self.resume = mode;
        self.switched = true;
        self.state.trigger_count = 0;
        Ok(())
    }

    fn arm(&mut self, mode: ScanMode) -> Result<()> {
        match mode {
            ScanMode::AutoScanning => self.strobe::<Start>(),
            ScanMode::ExternalTrigger => self.strobe::<ExternalTrigger>(),
            ScanMode::Stopped => Ok(()),
        }
    }

    fn finish(mut self) -> Result<()> {
        if !self.switched {
            self.arm(self.resume)?;
        }
        self.state.scan_mode = self.resume;
        trace!(card = self.card(), mode = %self.resume, "Resumed");
        Ok(())
    }
}

impl<B, S> Board<B, S>
where
    B: Bus,
    S: EventSink,
{
    /// Lock `card`, failing if it isn't present
    pub(crate) fn lock_present(
        &self,
        card: usize,
        operation: &'static str,
    ) -> Result<MutexGuard<'_, CardState<B::Region>>> {
        let state = self.registry.slot(card)?.lock();
        if state.is_present() {
            Ok(state)
        } else {
            warn!(card, operation, "Card missing");
            Err(Error::CardNotPresent { card })
        }
    }

    /// Stop the card, run `mutate` and re-arm the card in the mode it was in.
    ///
    /// The card is re-armed even if `mutate` fails, its error is returned after.
    pub(crate) fn reconfigure<T, F>(&self, state: &mut CardState<B::Region>, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Quiesced<'_, B::Region>) -> Result<T>,
    {
        let card = state.card;
        let resume = state.scan_mode;
        state.region()?.strobe::<Stop>().map_err(on_card(card))?;
        state.scan_mode = ScanMode::Stopped;
        trace!(card, "Stopped");
        std::thread::sleep(self.config.settle_delay);
        let mut quiesced = Quiesced {
            state,
            resume,
            switched: false,
        };
        let outcome = mutate(&mut quiesced);
        let resumed = quiesced.finish();
        let value = outcome?;
        resumed?;
        Ok(value)
    }

    /// Scan the first `signal_count` signals of `card`
    /// # Errors
    /// Returns an error if the card is missing or `signal_count` is outside [1, 128]
    pub fn configure_scan_count(&self, card: usize, signal_count: usize) -> Result<()> {
        let mut state = self.lock_present(card, "configure_scan_count")?;
        if !(1..=MAX_SIGNALS).contains(&signal_count) {
            return Err(Error::OutOfRange {
                card,
                param: "signal count",
                value: signal_count as u64,
                min: 1,
                max: MAX_SIGNALS as u64,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let last_channel = (signal_count - 1) as u8;
        self.reconfigure(&mut state, |q| {
            q.write(&ScanCount::new(last_channel))?;
            q.state.last_channel = last_channel;
            Ok(())
        })?;
        info!(card, signal_count, "Scan count configured");
        Ok(())
    }

    /// Turn oversampling on or off. Only revision J and later 16 bit boards have it.
    /// # Errors
    /// Returns an error if the card is missing
    pub fn set_oversampling(&self, card: usize, enabled: bool) -> Result<()> {
        let mut state = self.lock_present(card, "set_oversampling")?;
        self.reconfigure(&mut state, |q| q.write(&Oversampling { enabled }))?;
        info!(card, enabled, "Oversampling configured");
        Ok(())
    }

    /// Set the gain code of `signal` in the card's gain RAM.
    ///
    /// Only the low four bits of `code` are kept, as the hardware does, so codes of 16 and up
    /// wrap rather than fail. The gain is lost on power down unless committed with
    /// [`Board::store_gains`].
    /// # Errors
    /// Returns an error if the card is missing or `signal` isn't scanned
    pub fn set_gain(&self, card: usize, signal: usize, code: u32) -> Result<()> {
        let mut state = self.lock_present(card, "set_gain")?;
        let signal = state.check_signal(signal)?;
        let gain = GainCode::truncated(code);
        self.reconfigure(&mut state, |q| q.write_gain(signal, gain))?;
        info!(card, signal, gain = gain.value(), "Gain set");
        Ok(())
    }

    /// Read back the gain code of `signal` from the card's gain RAM
    /// # Errors
    /// Returns an error if the card is missing or `signal` isn't scanned
    pub fn read_gain(&self, card: usize, signal: usize) -> Result<u8> {
        let mut state = self.lock_present(card, "read_gain")?;
        let signal = state.check_signal(signal)?;
        let gain = self.reconfigure(&mut state, |q| q.read_gain(signal))?;
        debug!(card, signal, gain = gain.value(), "Gain read back");
        Ok(gain.value())
    }

    /// Commit the gain RAM of `card` to its NOVRAM.
    ///
    /// The NOVRAM survives power cycles but is only good for about 10000 writes. Nothing counts
    /// them, so don't call this on every gain change.
    /// # Errors
    /// Returns an error if the card is missing
    pub fn store_gains(&self, card: usize) -> Result<()> {
        let mut state = self.lock_present(card, "store_gains")?;
        let delay = self.config.store_delay;
        self.reconfigure(&mut state, |q| {
            q.strobe::<StoreGains>()?;
            q.settle(delay);
            Ok(())
        })?;
        warn!(card, "Gains committed to NOVRAM, endurance is about 10000 writes");
        Ok(())
    }

    /// Scan once per external (or software) trigger, posting `event` at the end of each scan.
    /// Event 0 posts nothing.
    /// # Errors
    /// Returns an error if the card is missing or `event` is past 255
    pub fn enable_external_trigger(&self, card: usize, event: u32) -> Result<()> {
        let mut state = self.lock_present(card, "enable_external_trigger")?;
        let event = u8::try_from(event).map_err(|_| Error::OutOfRange {
            card,
            param: "event",
            value: event.into(),
            min: 0,
            max: u8::MAX.into(),
        })?;
        self.reconfigure(&mut state, |q| {
            q.switch_to(ScanMode::ExternalTrigger)?;
            q.state.trigger_event = event;
            Ok(())
        })?;
        info!(card, event, "External trigger enabled");
        Ok(())
    }

    /// Scan continuously
    /// # Errors
    /// Returns an error if the card is missing
    pub fn enable_auto_scan(&self, card: usize) -> Result<()> {
        let mut state = self.lock_present(card, "enable_auto_scan")?;
        self.reconfigure(&mut state, |q| q.switch_to(ScanMode::AutoScanning))?;
        info!(card, "Automatic scanning enabled");
        Ok(())
    }

    /// Trigger one scan from software. Only valid with the external trigger enabled.
    /// # Errors
    /// Returns an error if the card is missing or not in external trigger mode
    pub fn soft_trigger(&self, card: usize) -> Result<()> {
        let mut state = self.lock_present(card, "soft_trigger")?;
        if state.scan_mode != ScanMode::ExternalTrigger {
            warn!(card, mode = %state.scan_mode, "Soft trigger outside external trigger mode");
            return Err(Error::WrongMode {
                card,
                mode: state.scan_mode,
            });
        }
        state
            .region()?
            .strobe::<SoftTrigger>()
            .map_err(on_card(card))?;
        debug!(card, "Soft trigger");
        Ok(())
    }

    /// Read the raw scanning state word of `card`. Nonzero while the card converts.
    /// # Errors
    /// Returns an error if the card is missing
    pub fn scanning_state(&self, card: usize) -> Result<u16> {
        let mut state = self.lock_present(card, "scanning_state")?;
        state
            .region()?
            .read_raw::<ScanningState>()
            .map_err(on_card(card))
    }
}
