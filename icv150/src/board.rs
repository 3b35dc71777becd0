//! The controller for one ICV150 board, up to four cards sharing a base address.

use crate::{
    bus::Bus,
    config::{
        BoardConfig,
        ConfigError,
    },
    discovery::DiscoveryReport,
    error::Result,
    registry::Registry,
};
use std::sync::{
    Arc,
    OnceLock,
};

/// Consumer of the trigger events cards post at the end of each externally triggered scan
pub trait EventSink: Send + Sync + 'static {
    fn post_event(&self, event: u8);
}

impl<F> EventSink for F
where
    F: Fn(u8) + Send + Sync + 'static,
{
    fn post_event(&self, event: u8) {
        self(event);
    }
}

/// An event sink that drops every event
#[derive(Debug, Default, Copy, Clone)]
pub struct NoEvents;

impl EventSink for NoEvents {
    fn post_event(&self, _event: u8) {}
}

/// A board of ICV150 cards on bus `B`, posting trigger events to `S`
pub struct Board<B: Bus, S: EventSink> {
    pub(crate) bus: B,
    pub(crate) registry: Registry<B::Region>,
    pub(crate) sink: Arc<S>,
    pub(crate) config: BoardConfig,
    pub(crate) discovery: OnceLock<Result<DiscoveryReport>>,
}

impl<B, S> Board<B, S>
where
    B: Bus,
    S: EventSink,
{
    /// Construct a board controller. No bus access happens until [`Board::discover`].
    /// # Errors
    /// Returns an error if `config` doesn't describe a valid board
    pub fn new(bus: B, config: BoardConfig, sink: S) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: Registry::new(&config),
            bus,
            sink: Arc::new(sink),
            config,
            discovery: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }
}
