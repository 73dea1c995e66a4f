//! Connection management and the hot-plug check
//!
//! A reader is either disconnected (no handle) or connected (one live
//! handle). Terminals and the daemon can go away at any time, so every card
//! operation starts with [`reconnect_if_needed`], which reopens a dropped
//! connection once and tells the caller whether it did.

use tracing::{debug, info, warn};

use crate::error::{ReaderError, Result, ServiceError};
use crate::reader::{MAX_ATR_SIZE, Reader};
use crate::service::{TerminalHandle, TerminalService};

/// Outcome of a successful hot-plug check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Hotplug {
    /// The connection was already live
    Unchanged,
    /// The connection had been lost and was re-established; ATRs and lock
    /// tokens from before are stale
    Reattached,
}

impl Hotplug {
    /// The outcome as an error code, for hosts that report a reattach as one
    pub const fn into_error(self) -> Option<ReaderError> {
        match self {
            Self::Unchanged => None,
            Self::Reattached => Some(ReaderError::ReaderReattached),
        }
    }
}

/// What to do with the card when disconnecting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Leave the card as it is
    #[default]
    LeaveCard,
    /// Reset the card
    ResetCard,
    /// Power the card down
    UnpowerCard,
    /// Eject the card
    EjectCard,
}

/// Open a session for `reader` without touching the card
///
/// Any existing session is closed first.
pub(crate) fn open<S>(
    service: &S,
    reader: &mut Reader<S::Handle>,
) -> std::result::Result<u64, ServiceError>
where
    S: TerminalService,
{
    reader.detach();
    let handle = service.open(reader.index())?;
    let generation = reader.attach(handle);
    debug!(reader = reader.index(), generation, "Opened terminal session");
    Ok(generation)
}

/// Connect to the card in `slot`
///
/// Replaces any existing session, resets the card and stores its ATR.
pub fn connect<S>(service: &S, reader: &mut Reader<S::Handle>, slot: usize) -> Result<()>
where
    S: TerminalService,
{
    reader.check_slot(slot)?;

    if let Err(err) = open(service, reader) {
        warn!(reader = reader.index(), %err, "Connecting to terminal failed");
        return Err(ReaderError::CardNotPresent);
    }

    let mut atr = [0u8; MAX_ATR_SIZE];
    let received = match reader.connection_mut() {
        Some(connection) => connection.handle_mut().reset(slot, None, &mut atr),
        None => return Err(ReaderError::CardNotPresent),
    };

    match received {
        Err(err) => {
            warn!(reader = reader.index(), slot, %err, "Card reset failed");
            Err(ReaderError::CardNotPresent)
        }
        Ok(0) => {
            warn!(reader = reader.index(), slot, "Card reset returned no data");
            Err(ReaderError::Reader(ServiceError::NoAtr))
        }
        Ok(len) => {
            let atr = &atr[..len.min(MAX_ATR_SIZE)];
            debug!(reader = reader.index(), slot, atr = %hex::encode_upper(atr), "Card connected");
            reader.slot_mut(slot)?.set_atr(atr);
            Ok(())
        }
    }
}

/// Hot-plug check run at the start of every card operation
///
/// A live connection is left alone. Otherwise a single [`connect`] is
/// attempted; if it fails the reader is reported detached, if it succeeds
/// it is reported reattached.
pub fn reconnect_if_needed<S>(
    service: &S,
    reader: &mut Reader<S::Handle>,
    slot: usize,
) -> Result<Hotplug>
where
    S: TerminalService,
{
    reader.check_slot(slot)?;
    if reader.is_connected() {
        return Ok(Hotplug::Unchanged);
    }

    match connect(service, reader, slot) {
        Ok(()) => {
            info!(reader = reader.index(), slot, "Reader reattached");
            Ok(Hotplug::Reattached)
        }
        Err(err) => {
            debug!(reader = reader.index(), slot, %err, "Reconnect failed");
            Err(ReaderError::ReaderDetached)
        }
    }
}

/// Close the session, if there is one
///
/// Disconnecting a disconnected reader is not an error.
pub fn disconnect<H: TerminalHandle>(
    reader: &mut Reader<H>,
    slot: usize,
    disposition: Disposition,
) -> Result<()> {
    if reader.detach() {
        debug!(reader = reader.index(), slot, ?disposition, "Disconnected");
    }
    Ok(())
}

/// Drop the session after the service said it is gone, and report the
/// reader detached
pub(crate) fn drop_stale<H: TerminalHandle>(reader: &mut Reader<H>) -> ReaderError {
    warn!(reader = reader.index(), "Terminal session lost");
    reader.detach();
    ReaderError::ReaderDetached
}

/// Tear down a reader the host is about to remove
///
/// Nothing about the reader's sessions, locks or cards is valid afterwards.
pub fn teardown_on_release<H: TerminalHandle>(reader: &mut Reader<H>) -> Result<()> {
    reader.detach();
    reader.clear();
    debug!(reader = reader.index(), "Reader released");
    Ok(())
}
