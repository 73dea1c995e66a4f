//! The OpenCT reader driver
//!
//! [`OpenctDriver`] is built once from a service and a configuration and
//! passed to the host, which drives readers through [`ReaderDriver`].

use tracing::{debug, instrument};

use crate::card;
use crate::config::DriverConfig;
use crate::connection::{self, Disposition, Hotplug};
use crate::error::Result;
use crate::host::{ReaderDriver, ReaderHost};
use crate::pin::PinCommand;
use crate::reader::{CardPresence, Reader};
use crate::registry::{self, InitSummary};
use crate::service::{LockMode, TerminalService};

/// Reader driver backed by an OpenCT card-terminal service
#[derive(Debug, Clone)]
pub struct OpenctDriver<S> {
    service: S,
    config: DriverConfig,
}

impl<S: TerminalService> OpenctDriver<S> {
    /// Create a driver with the default configuration
    pub fn new(service: S) -> Self {
        Self::with_config(service, DriverConfig::default())
    }

    /// Create a driver with a custom configuration
    pub const fn with_config(service: S, config: DriverConfig) -> Self {
        Self { service, config }
    }

    /// The card-terminal service
    pub const fn service(&self) -> &S {
        &self.service
    }

    /// The driver configuration
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Register readers with the host and report what was registered
    pub fn initialize(
        &self,
        host: &mut dyn ReaderHost<Reader<S::Handle>>,
    ) -> Result<InitSummary> {
        registry::initialize(&self.service, host, &self.config)
    }

    /// Run the hot-plug check for `reader`
    pub fn reconnect_if_needed(
        &self,
        reader: &mut Reader<S::Handle>,
        slot: usize,
    ) -> Result<Hotplug> {
        connection::reconnect_if_needed(&self.service, reader, slot)
    }

    /// Take a shared lock on the card in `slot`
    pub fn lock_shared(&self, reader: &mut Reader<S::Handle>, slot: usize) -> Result<()> {
        card::lock(&self.service, reader, slot, LockMode::Shared)
    }

    /// Release the lock taken by [`OpenctDriver::lock_shared`]
    pub fn unlock_shared(&self, reader: &mut Reader<S::Handle>, slot: usize) -> Result<()> {
        card::unlock(reader, slot, LockMode::Shared)
    }
}

impl<S: TerminalService> ReaderDriver for OpenctDriver<S> {
    type Reader = Reader<S::Handle>;

    fn name(&self) -> &'static str {
        "OpenCT Reader"
    }

    fn short_name(&self) -> &'static str {
        "openct"
    }

    #[instrument(level = "debug", skip_all)]
    fn init(&self, host: &mut dyn ReaderHost<Self::Reader>) -> Result<()> {
        let summary = self.initialize(host)?;
        debug!(
            attached = summary.attached.len(),
            placeholders = summary.placeholders.len(),
            failed = summary.failed.len(),
            "Driver initialized"
        );
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(reader = reader.index()))]
    fn release(&self, reader: &mut Self::Reader) -> Result<()> {
        connection::teardown_on_release(reader)
    }

    #[instrument(level = "trace", skip(self, reader), fields(reader = reader.index()))]
    fn detect_card_presence(
        &self,
        reader: &mut Self::Reader,
        slot: usize,
    ) -> Result<CardPresence> {
        card::detect_card_presence(&self.service, reader, slot)
    }

    #[instrument(level = "debug", skip(self, reader), fields(reader = reader.index()))]
    fn connect(&self, reader: &mut Self::Reader, slot: usize) -> Result<()> {
        connection::connect(&self.service, reader, slot)
    }

    #[instrument(level = "debug", skip(self, reader), fields(reader = reader.index()))]
    fn disconnect(
        &self,
        reader: &mut Self::Reader,
        slot: usize,
        disposition: Disposition,
    ) -> Result<()> {
        connection::disconnect(reader, slot, disposition)
    }

    #[instrument(
        level = "trace",
        skip(self, reader, request, response),
        fields(reader = reader.index())
    )]
    fn transmit(
        &self,
        reader: &mut Self::Reader,
        slot: usize,
        request: &[u8],
        response: &mut [u8],
        is_control: bool,
    ) -> Result<usize> {
        card::transmit(&self.service, reader, slot, request, response, is_control)
    }

    #[instrument(level = "debug", skip(self, reader, command), fields(reader = reader.index()))]
    fn perform_verify(
        &self,
        reader: &mut Self::Reader,
        slot: usize,
        command: &mut PinCommand,
    ) -> Result<()> {
        card::perform_verify(&self.service, reader, slot, command).map(|_| ())
    }

    #[instrument(level = "debug", skip(self, reader), fields(reader = reader.index()))]
    fn lock(&self, reader: &mut Self::Reader, slot: usize) -> Result<()> {
        card::lock(&self.service, reader, slot, LockMode::Exclusive)
    }

    #[instrument(level = "debug", skip(self, reader), fields(reader = reader.index()))]
    fn unlock(&self, reader: &mut Self::Reader, slot: usize) -> Result<()> {
        card::unlock(reader, slot, LockMode::Exclusive)
    }
}
