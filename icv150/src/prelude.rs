//! Prelude (helpful reexports) for this package

pub use crate::{
    board::{
        Board,
        EventSink,
        NoEvents,
    },
    bus::{
        mock::Mock,
        Bus,
        Region,
    },
    config::BoardConfig,
    discovery::DiscoveryReport,
    error::{
        Error,
        Result,
    },
    reader::{
        AnalogInput,
        DisplayRange,
        Reading,
        SampleFormat,
        Samples,
    },
    registry::{
        CardView,
        Resolution,
        ScanMode,
    },
};
