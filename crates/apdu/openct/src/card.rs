//! Card operations
//!
//! Every operation here runs the hot-plug check first and then works on the
//! live session. A service reply saying the session is gone drops it, so the
//! next operation reconnects.

use tracing::{debug, trace, warn};

use crate::connection;
use crate::error::{ReaderError, Result, ServiceError, translate};
use crate::pin::{MAX_VERIFY_COMMAND, PinCommand};
use crate::reader::{CardPresence, Reader, SlotLock};
use crate::service::{
    LockMode, ServicePinEncoding, TerminalHandle, TerminalService, VerifyParams,
};
use crate::status::StatusWord;

/// Run the hot-plug check; a reattach is logged and otherwise ignored
fn ensure_connected<S>(service: &S, reader: &mut Reader<S::Handle>, slot: usize) -> Result<()>
where
    S: TerminalService,
{
    if let Some(signal) = connection::reconnect_if_needed(service, reader, slot)?.into_error() {
        debug!(reader = reader.index(), slot, %signal, "Continuing on reattached reader");
    }
    Ok(())
}

/// Reject a byte count larger than the buffer the service was given
fn checked_len(len: usize, capacity: usize) -> Result<usize> {
    if len > capacity {
        return Err(ReaderError::BufferTooSmall {
            needed: len,
            capacity,
        });
    }
    Ok(len)
}

/// Live handle of a reader that just passed the hot-plug check
fn live_handle<H: TerminalHandle>(reader: &mut Reader<H>) -> Result<(&mut H, u64)> {
    reader
        .connection_mut()
        .map(|c| {
            let generation = c.generation();
            (c.handle_mut(), generation)
        })
        .ok_or(ReaderError::ReaderDetached)
}

/// Query whether a card is in `slot`
///
/// A reader that cannot even be reached reports no card rather than an
/// error. The result is also stored in the slot.
pub fn detect_card_presence<S>(
    service: &S,
    reader: &mut Reader<S::Handle>,
    slot: usize,
) -> Result<CardPresence>
where
    S: TerminalService,
{
    reader.check_slot(slot)?;
    reader.slot_mut(slot)?.set_presence(CardPresence::ABSENT);

    if !reader.is_connected() {
        if let Err(err) = connection::open(service, reader) {
            trace!(reader = reader.index(), %err, "Terminal unreachable, no card");
            return Ok(CardPresence::ABSENT);
        }
    }

    let (handle, _) = live_handle(reader)?;
    let status = match handle.status(slot) {
        Ok(status) => status,
        Err(err) => {
            if err.is_not_connected() {
                connection::drop_stale(reader);
            }
            return Err(ReaderError::TransmitFailed(err));
        }
    };

    let presence = CardPresence::from_status(status);
    trace!(reader = reader.index(), slot, ?presence, "Card status");
    reader.slot_mut(slot)?.set_presence(presence);
    Ok(presence)
}

/// Exchange raw bytes with the card in `slot`
///
/// `response.len()` is offered to the service as the response capacity.
/// Returns the number of response bytes, which may be zero.
pub fn transmit<S>(
    service: &S,
    reader: &mut Reader<S::Handle>,
    slot: usize,
    request: &[u8],
    response: &mut [u8],
    is_control: bool,
) -> Result<usize>
where
    S: TerminalService,
{
    ensure_connected(service, reader, slot)?;

    trace!(
        reader = reader.index(),
        slot,
        is_control,
        command = %hex::encode_upper(request),
        "Transmitting"
    );
    let (handle, _) = live_handle(reader)?;
    match handle.transact(slot, request, response) {
        Err(ServiceError::NotConnected) => Err(connection::drop_stale(reader)),
        Ok(len) => {
            let len = checked_len(len, response.len())?;
            trace!(response = %hex::encode_upper(&response[..len]), "Received");
            Ok(len)
        }
        Err(err) => {
            debug!(reader = reader.index(), slot, %err, "Transmit failed");
            translate(Err(err))
        }
    }
}

/// Verify a PIN entered on the reader's keypad
///
/// The command is checked before the service is contacted. On success the
/// card's status word is written to the command's APDU.
pub fn perform_verify<S>(
    service: &S,
    reader: &mut Reader<S::Handle>,
    slot: usize,
    command: &mut PinCommand,
) -> Result<StatusWord>
where
    S: TerminalService,
{
    reader.check_slot(slot)?;

    let apdu = command
        .apdu
        .as_mut()
        .ok_or(ReaderError::InvalidArguments("verify needs an APDU"))?;
    let buf = apdu.to_command()?;
    let pin_length = command.pin.pin_length();
    let encoding = ServicePinEncoding::try_from(command.pin.encoding)?;

    ensure_connected(service, reader, slot)?;

    let params = VerifyParams {
        timeout: None,
        prompt: command.pin.prompt.as_deref(),
        encoding,
        pin_length,
        pin_offset: command.pin.offset,
    };
    let mut response = [0u8; MAX_VERIFY_COMMAND];
    let (handle, _) = live_handle(reader)?;
    let len = match handle.verify(slot, &params, &buf, &mut response) {
        Ok(len) => len,
        Err(ServiceError::NotConnected) => return Err(connection::drop_stale(reader)),
        Err(err) => return translate(Err(err)),
    };

    if len != 2 {
        warn!(reader = reader.index(), slot, len, "Unexpected verify reply length");
        return Err(ReaderError::UnknownDataReceived(len));
    }

    let status = StatusWord::new(response[0], response[1]);
    apdu.status = status;
    debug!(reader = reader.index(), slot, %status, "Keypad verify done");
    Ok(status)
}

/// Take a lock on `slot` and keep the token in the slot
///
/// A lock already held in `mode` by the live session is kept as is.
pub fn lock<S>(
    service: &S,
    reader: &mut Reader<S::Handle>,
    slot: usize,
    mode: LockMode,
) -> Result<()>
where
    S: TerminalService,
{
    ensure_connected(service, reader, slot)?;

    let current = reader.generation();
    if let Some(held) = reader.slot(slot)?.lock(mode)
        && Some(held.generation()) == current
    {
        trace!(reader = reader.index(), slot, ?mode, token = ?held.token(), "Lock already held");
        return Ok(());
    }

    let (handle, generation) = live_handle(reader)?;
    match handle.lock(slot, mode) {
        Ok(token) => {
            debug!(reader = reader.index(), slot, ?mode, ?token, generation, "Locked");
            reader
                .slot_mut(slot)?
                .set_lock(mode, SlotLock::new(token, generation));
            Ok(())
        }
        Err(ServiceError::NotConnected) => Err(connection::drop_stale(reader)),
        Err(err) => translate(Err(err)),
    }
}

/// Release the lock held on `slot` in `mode`
///
/// Without a live session, or with a token issued by an earlier session,
/// there is nothing to release and the service is not contacted. A service
/// reporting the session gone is success as well.
pub fn unlock<H: TerminalHandle>(
    reader: &mut Reader<H>,
    slot: usize,
    mode: LockMode,
) -> Result<()> {
    let Some(lock) = reader.slot_mut(slot)?.take_lock(mode) else {
        trace!(reader = reader.index(), slot, ?mode, "No lock held");
        return Ok(());
    };

    let Some(connection) = reader.connection_mut() else {
        return Ok(());
    };
    if connection.generation() != lock.generation() {
        debug!(
            reader = reader.index(),
            slot,
            token = ?lock.token(),
            "Dropping lock token from an earlier session"
        );
        return Ok(());
    }

    match connection.handle_mut().unlock(slot, lock.token()) {
        Ok(()) | Err(ServiceError::NotConnected) => Ok(()),
        Err(err) => translate(Err(err)),
    }
}
