//! Host side of the reader driver interface
//!
//! The host owns the reader table and calls into a [`ReaderDriver`]. Drivers
//! hand new readers to the host through [`ReaderHost`].

use std::fmt;

use tracing::debug;

use crate::connection::Disposition;
use crate::error::{ReaderError, Result};
use crate::pin::PinCommand;
use crate::reader::CardPresence;

/// Maximum number of readers a [`ReaderTable`] holds by default
pub const MAX_READERS: usize = 16;

/// Registration capability the host offers to drivers
pub trait ReaderHost<R> {
    /// Take ownership of a reader; returns its position in the host's table
    fn register_reader(&mut self, reader: R) -> Result<usize>;
}

/// Operations the host invokes on a driver
pub trait ReaderDriver: fmt::Debug {
    /// Reader record the driver works on
    type Reader;

    /// Human readable driver name
    fn name(&self) -> &'static str;

    /// Short driver name used in configuration
    fn short_name(&self) -> &'static str;

    /// Register the driver's readers with the host
    fn init(&self, host: &mut dyn ReaderHost<Self::Reader>) -> Result<()>;

    /// Called when the driver is unloaded
    fn finish(&self) -> Result<()>;

    /// Called before the host removes a reader
    fn release(&self, reader: &mut Self::Reader) -> Result<()>;

    /// Check whether a card is in `slot`
    fn detect_card_presence(&self, reader: &mut Self::Reader, slot: usize)
    -> Result<CardPresence>;

    /// Connect to the card in `slot`
    fn connect(&self, reader: &mut Self::Reader, slot: usize) -> Result<()>;

    /// Disconnect from the card in `slot`
    fn disconnect(
        &self,
        reader: &mut Self::Reader,
        slot: usize,
        disposition: Disposition,
    ) -> Result<()>;

    /// Send `request` to the card and read its reply into `response`
    fn transmit(
        &self,
        reader: &mut Self::Reader,
        slot: usize,
        request: &[u8],
        response: &mut [u8],
        is_control: bool,
    ) -> Result<usize>;

    /// Verify a PIN entered on the reader's keypad
    fn perform_verify(
        &self,
        reader: &mut Self::Reader,
        slot: usize,
        command: &mut PinCommand,
    ) -> Result<()>;

    /// Lock the card in `slot` for exclusive use
    fn lock(&self, reader: &mut Self::Reader, slot: usize) -> Result<()>;

    /// Release the lock taken by [`ReaderDriver::lock`]
    fn unlock(&self, reader: &mut Self::Reader, slot: usize) -> Result<()>;
}

/// Bounded in-memory reader table
#[derive(Debug)]
pub struct ReaderTable<R> {
    readers: Vec<R>,
    capacity: usize,
}

impl<R> Default for ReaderTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ReaderTable<R> {
    /// Create a table holding up to [`MAX_READERS`] readers
    pub const fn new() -> Self {
        Self::with_capacity(MAX_READERS)
    }

    /// Create a table holding up to `capacity` readers
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            readers: Vec::new(),
            capacity,
        }
    }

    /// Number of registered readers
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    /// Whether no reader is registered
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Reader at table position `pos`
    pub fn get(&self, pos: usize) -> Option<&R> {
        self.readers.get(pos)
    }

    /// Mutable reader at table position `pos`
    pub fn get_mut(&mut self, pos: usize) -> Option<&mut R> {
        self.readers.get_mut(pos)
    }

    /// Iterate over registered readers
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.readers.iter()
    }

    /// Iterate mutably over registered readers
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut R> {
        self.readers.iter_mut()
    }

    /// Release every reader through `driver` and empty the table
    pub fn release_all<D>(&mut self, driver: &D) -> Result<()>
    where
        D: ReaderDriver<Reader = R>,
    {
        for mut reader in self.readers.drain(..) {
            driver.release(&mut reader)?;
        }
        driver.finish()
    }
}

impl<R> ReaderHost<R> for ReaderTable<R> {
    fn register_reader(&mut self, reader: R) -> Result<usize> {
        if self.readers.len() >= self.capacity {
            debug!(capacity = self.capacity, "Reader table full");
            return Err(ReaderError::OutOfMemory);
        }
        self.readers.push(reader);
        Ok(self.readers.len() - 1)
    }
}
