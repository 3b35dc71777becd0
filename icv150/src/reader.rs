//! Reading conversion results.
//!
//! Every read masks the raw word with the card's current resolution, read under the card lock
//! together with the data, so a read never mixes two masks.

use crate::{
    board::{
        Board,
        EventSink,
    },
    bus::{
        Bus,
        BusResult,
        Region,
    },
    error::{
        on_card,
        Error,
        Result,
    },
    registers::data_offset,
};
use num_traits::{
    Float,
    FromPrimitive,
};
use std::str::FromStr;
use tracing::{
    debug,
    trace,
};

/// Element type of a batched read
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SampleFormat {
    /// 16 bit masked codes
    RawUnsigned,
    /// Masked codes widened to `i32`
    RawSignedWide,
    /// Masked codes widened to `u32`
    RawUnsignedWide,
    /// Codes scaled into the display range as `f32`
    ScaledFloat32,
    /// Codes scaled into the display range as `f64`
    ScaledFloat64,
}

impl FromStr for SampleFormat {
    type Err = Error;

    /// Parse a waveform field type name (`USHORT`, `LONG`, `ULONG`, `FLOAT` or `DOUBLE`)
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "USHORT" => Ok(SampleFormat::RawUnsigned),
            "LONG" => Ok(SampleFormat::RawSignedWide),
            "ULONG" => Ok(SampleFormat::RawUnsignedWide),
            "FLOAT" => Ok(SampleFormat::ScaledFloat32),
            "DOUBLE" => Ok(SampleFormat::ScaledFloat64),
            other => Err(Error::UnsupportedFormat(other.to_owned())),
        }
    }
}

/// Engineering units spanned by a full scale conversion
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct DisplayRange {
    pub low: f64,
    pub high: f64,
}

impl DisplayRange {
    #[must_use]
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// An empty range means "don't scale"
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_degenerate(&self) -> bool {
        self.low == self.high
    }

    /// Engineering units per code for a card with resolution mask `mask`
    #[must_use]
    pub fn slope(&self, mask: u16) -> f64 {
        (self.high - self.low) / f64::from(mask)
    }
}

/// The result of a batched read, one element per signal
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Samples {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Samples::U16(v) => v.len(),
            Samples::I32(v) => v.len(),
            Samples::U32(v) => v.len(),
            Samples::F32(v) => v.len(),
            Samples::F64(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn format(&self) -> SampleFormat {
        match self {
            Samples::U16(_) => SampleFormat::RawUnsigned,
            Samples::I32(_) => SampleFormat::RawSignedWide,
            Samples::U32(_) => SampleFormat::RawUnsignedWide,
            Samples::F32(_) => SampleFormat::ScaledFloat32,
            Samples::F64(_) => SampleFormat::ScaledFloat64,
        }
    }
}

/// `raw * (high - low) / mask + low`, or the raw codes untouched for an empty range
fn scale<T>(raw: &[u16], range: DisplayRange, mask: u16) -> Vec<T>
where
    T: Float + FromPrimitive,
{
    let convert = |value: f64| T::from_f64(value).unwrap_or_else(T::nan);
    if range.is_degenerate() {
        raw.iter().map(|&r| convert(f64::from(r))).collect()
    } else {
        raw.iter()
            .map(|&r| convert(f64::from(r) * (range.high - range.low) / f64::from(mask) + range.low))
            .collect()
    }
}

/// A single signal read in engineering units
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnalogInput {
    card: usize,
    signal: usize,
    range: DisplayRange,
    slope: f64,
}

impl AnalogInput {
    #[must_use]
    pub fn card(&self) -> usize {
        self.card
    }

    #[must_use]
    pub fn signal(&self) -> usize {
        self.signal
    }

    #[must_use]
    pub fn range(&self) -> DisplayRange {
        self.range
    }

    /// Engineering units per code
    #[must_use]
    pub fn slope(&self) -> f64 {
        self.slope
    }
}

/// One conversion result with what's needed to put it into engineering units
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Reading {
    pub raw: u16,
    pub slope: f64,
    pub low: f64,
}

impl Reading {
    #[must_use]
    pub fn value(&self) -> f64 {
        f64::from(self.raw) * self.slope + self.low
    }
}

impl<B, S> Board<B, S>
where
    B: Bus,
    S: EventSink,
{
    /// Read the masked conversion result of `signal`. Valid in any scan mode, in external trigger
    /// mode this is the result of the last triggered scan.
    /// # Errors
    /// Returns an error if the card is missing or `signal` isn't scanned
    pub fn read_one(&self, card: usize, signal: usize) -> Result<u16> {
        let mut state = self.lock_present(card, "read_one")?;
        let signal = state.check_signal(signal)?;
        let mask = state.resolution.mask();
        let word = state
            .region()?
            .read_word(data_offset(signal))
            .map_err(on_card(card))?;
        trace!(card, signal, mask, word, "Read");
        Ok(word & mask)
    }

    /// Read `count` consecutive signals from `first` in `format`. Scaled formats map codes into
    /// `range`, unless it's empty.
    /// # Errors
    /// Returns an error if the card is missing or the block isn't within the scanned signals
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_batch(
        &self,
        card: usize,
        first: usize,
        count: usize,
        format: SampleFormat,
        range: DisplayRange,
    ) -> Result<Samples> {
        let mut state = self.lock_present(card, "read_batch")?;
        let last_channel = state.last_channel;
        // An empty block is fine as long as it starts within one past the last channel
        let fits = first
            .checked_add(count)
            .is_some_and(|end| end <= usize::from(last_channel) + 1);
        if !fits {
            return Err(Error::RangeExceeded {
                card,
                first,
                count,
                last_channel,
            });
        }
        let mask = state.resolution.mask();
        let region = state.region()?;
        // Every signal index is within the scanned range, so it fits a u8
        let raw = (first..first + count)
            .map(|signal| region.read_word(data_offset(signal as u8)).map(|w| w & mask))
            .collect::<BusResult<Vec<_>>>()
            .map_err(on_card(card))?;
        drop(state);
        trace!(card, first, count, ?format, "Batch read");
        Ok(match format {
            SampleFormat::RawUnsigned => Samples::U16(raw),
            SampleFormat::RawSignedWide => Samples::I32(raw.into_iter().map(i32::from).collect()),
            SampleFormat::RawUnsignedWide => {
                Samples::U32(raw.into_iter().map(u32::from).collect())
            }
            SampleFormat::ScaledFloat32 => Samples::F32(scale(&raw, range, mask)),
            SampleFormat::ScaledFloat64 => Samples::F64(scale(&raw, range, mask)),
        })
    }

    /// Set up single reads of `signal` in engineering units spanning `range`
    /// # Errors
    /// Returns an error if the card is missing or `signal` isn't scanned
    pub fn analog_input(
        &self,
        card: usize,
        signal: usize,
        range: DisplayRange,
    ) -> Result<AnalogInput> {
        let state = self.lock_present(card, "analog_input")?;
        state.check_signal(signal)?;
        let mask = state.resolution.mask();
        let slope = range.slope(mask);
        debug!(card, signal, mask, slope, "Analog input");
        Ok(AnalogInput {
            card,
            signal,
            range,
            slope,
        })
    }

    /// Change the display range of `input`, recomputing its slope
    /// # Errors
    /// Returns an error if the card is missing
    pub fn set_display_range(&self, input: &mut AnalogInput, range: DisplayRange) -> Result<()> {
        let mask = self
            .lock_present(input.card, "set_display_range")?
            .resolution
            .mask();
        input.range = range;
        input.slope = range.slope(mask);
        Ok(())
    }

    /// Read `input`
    /// # Errors
    /// Returns an error if the card is missing or the signal is no longer scanned
    pub fn read_analog(&self, input: &AnalogInput) -> Result<Reading> {
        Ok(Reading {
            raw: self.read_one(input.card, input.signal)?,
            slope: input.slope,
            low: input.range.low,
        })
    }
}
