//! OpenCT backend for the reader driver interface
//!
//! This crate adapts a card-terminal service in the style of OpenCT onto the
//! [`ReaderDriver`] operations a reader-management host invokes: reader
//! enumeration, card connect and disconnect, raw transmit, keypad PIN
//! verification and card locking.
//!
//! Terminals can be unplugged and plugged back in, and the terminal daemon
//! can restart, at any time. Each reader therefore owns at most one session
//! to the service, and every card operation starts with a hot-plug check
//! that reconnects a lost session once. A reader that cannot be reached is
//! reported as [`ReaderError::ReaderDetached`]; a reader that came back is
//! reported as [`Hotplug::Reattached`] so callers can refresh cached state.
//! Lock tokens remember the session that issued them and are never handed
//! to a later session.
//!
//! # Examples
//!
//! The example runs against the in-process service of the `sim` feature.
//!
//! ```
//! use nexum_apdu_reader_openct::prelude::*;
//! use nexum_apdu_reader_openct::sim::{SimulatedHandle, SimulatedService};
//!
//! # fn main() -> Result<(), ReaderError> {
//! let service = SimulatedService::new()
//!     .with_terminal(0, TerminalInfo::new("Simulated reader", 1));
//! service.insert_card(0, 0, [0x3B, 0x02, 0x14, 0x50]);
//!
//! let driver = OpenctDriver::new(service);
//! let mut readers: ReaderTable<Reader<SimulatedHandle>> = ReaderTable::new();
//! driver.init(&mut readers)?;
//!
//! let reader = readers.get_mut(0).expect("reader 0 registered");
//! driver.connect(reader, 0)?;
//!
//! let mut response = [0u8; 258];
//! let select = [0x00, 0xA4, 0x04, 0x00, 0x00];
//! let len = driver.transmit(reader, 0, &select, &mut response, false)?;
//! assert_eq!(&response[..len], &[0x90, 0x00]);
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod card;
pub mod config;
pub mod connection;
mod driver;
mod error;
pub mod host;
pub mod pin;
pub mod reader;
pub mod registry;
pub mod service;
#[cfg(feature = "sim")]
pub mod sim;
mod status;

pub use config::DriverConfig;
pub use connection::{Disposition, Hotplug};
pub use driver::OpenctDriver;
pub use error::{ReaderError, Result, ServiceError, translate};
pub use host::{ReaderDriver, ReaderHost, ReaderTable};
pub use pin::{PinApdu, PinCommand, PinEncoding, PinPolicy};
pub use reader::{CardPresence, Reader, Slot};
pub use registry::InitSummary;
pub use service::{LockMode, LockToken, TerminalHandle, TerminalInfo, TerminalService};
pub use status::StatusWord;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        CardPresence, Disposition, DriverConfig, Hotplug, LockMode, OpenctDriver, PinApdu,
        PinCommand, PinEncoding, PinPolicy, Reader, ReaderDriver, ReaderError, ReaderHost,
        ReaderTable, StatusWord, TerminalHandle, TerminalInfo, TerminalService,
    };
}
