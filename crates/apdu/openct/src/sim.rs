//! In-process card-terminal service
//!
//! [`SimulatedService`] behaves like a terminal daemon with a configurable
//! set of terminals and cards. Terminals can be unplugged and plugged back
//! in, the whole daemon can be restarted, and individual calls can be made
//! to fail. Every call is counted so tests can check whether the service
//! was contacted at all.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::ServiceError;
use crate::service::{
    CARD_PRESENT, CARD_STATUS_CHANGED, LockMode, LockToken, ServicePinEncoding, TerminalHandle,
    TerminalInfo, TerminalService, VerifyParams,
};

/// Service calls, used to address injected faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`TerminalService::open`]
    Open,
    /// [`TerminalHandle::reset`]
    Reset,
    /// [`TerminalHandle::status`]
    Status,
    /// [`TerminalHandle::transact`]
    Transact,
    /// [`TerminalHandle::verify`]
    Verify,
    /// [`TerminalHandle::lock`]
    Lock,
    /// [`TerminalHandle::unlock`]
    Unlock,
}

/// Number of calls the service received, per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Sessions opened or attempted
    pub open: usize,
    /// Sessions closed
    pub close: usize,
    /// Card resets
    pub reset: usize,
    /// Status queries
    pub status: usize,
    /// APDU exchanges
    pub transact: usize,
    /// Keypad verifications
    pub verify: usize,
    /// Lock requests
    pub lock: usize,
    /// Unlock requests
    pub unlock: usize,
}

impl CallCounts {
    /// Calls made through a session handle
    pub const fn card_calls(&self) -> usize {
        self.reset + self.status + self.transact + self.verify + self.lock + self.unlock
    }
}

/// A keypad verification as the service received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyCall {
    /// Slot
    pub slot: usize,
    /// Timeout passed by the driver
    pub timeout: Option<Duration>,
    /// Prompt
    pub prompt: Option<String>,
    /// PIN encoding
    pub encoding: ServicePinEncoding,
    /// PIN length
    pub pin_length: usize,
    /// PIN offset
    pub pin_offset: usize,
    /// Command bytes
    pub command: Vec<u8>,
}

#[derive(Debug)]
struct HeldLock {
    token: LockToken,
    mode: LockMode,
    session: u64,
}

#[derive(Debug, Default)]
struct SimSlot {
    atr: Option<Vec<u8>>,
    changed: bool,
    responses: VecDeque<Vec<u8>>,
    commands: Vec<Vec<u8>>,
    locks: Vec<HeldLock>,
}

#[derive(Debug)]
struct SimTerminal {
    info: TerminalInfo,
    attached: bool,
    epoch: u64,
    slots: Vec<SimSlot>,
    verify_reply: Result<Vec<u8>, ServiceError>,
    verify_calls: Vec<VerifyCall>,
    open_sessions: usize,
}

impl SimTerminal {
    fn new(info: TerminalInfo) -> Self {
        let slots = (0..info.slots.max(1)).map(|_| SimSlot::default()).collect();
        Self {
            info,
            attached: true,
            epoch: 0,
            slots,
            verify_reply: Ok(vec![0x90, 0x00]),
            verify_calls: Vec::new(),
            open_sessions: 0,
        }
    }

    /// Invalidate every session and the locks they held
    fn invalidate_sessions(&mut self) {
        self.epoch += 1;
        for slot in &mut self.slots {
            slot.locks.clear();
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    terminals: BTreeMap<u32, SimTerminal>,
    faults: HashMap<(u32, Operation), VecDeque<ServiceError>>,
    calls: CallCounts,
    next_session: u64,
    next_token: u32,
}

impl SimState {
    fn take_fault(&mut self, index: u32, op: Operation) -> Result<(), ServiceError> {
        match self.faults.get_mut(&(index, op)).and_then(VecDeque::pop_front) {
            Some(err) => {
                trace!(index, ?op, %err, "Injected service fault");
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Resolve the slot a live session addresses
    fn session_slot(
        &mut self,
        index: u32,
        epoch: u64,
        slot: usize,
    ) -> Result<&mut SimSlot, ServiceError> {
        let terminal = self
            .terminals
            .get_mut(&index)
            .filter(|t| t.attached && t.epoch == epoch)
            .ok_or(ServiceError::NotConnected)?;
        terminal
            .slots
            .get_mut(slot)
            .ok_or(ServiceError::InvalidSlot)
    }
}

/// In-process card-terminal service
#[derive(Debug, Clone, Default)]
pub struct SimulatedService {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedService {
    /// Create a service without terminals
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a terminal at `index`
    pub fn with_terminal(self, index: u32, info: TerminalInfo) -> Self {
        self.plug(index, info);
        self
    }

    /// Plug a terminal in at `index`, replacing whatever was there
    pub fn plug(&self, index: u32, info: TerminalInfo) {
        let mut state = self.state.lock();
        let epoch = state.terminals.get(&index).map_or(0, |t| t.epoch + 1);
        let mut terminal = SimTerminal::new(info);
        terminal.epoch = epoch;
        state.terminals.insert(index, terminal);
    }

    /// Unplug the terminal at `index`; open sessions become invalid
    pub fn unplug(&self, index: u32) {
        if let Some(terminal) = self.state.lock().terminals.get_mut(&index) {
            terminal.attached = false;
            terminal.invalidate_sessions();
        }
    }

    /// Plug a previously unplugged terminal back in
    pub fn replug(&self, index: u32) {
        if let Some(terminal) = self.state.lock().terminals.get_mut(&index) {
            terminal.attached = true;
        }
    }

    /// Restart the daemon: every open session becomes invalid
    pub fn restart(&self) {
        for terminal in self.state.lock().terminals.values_mut() {
            terminal.invalidate_sessions();
        }
    }

    /// Insert a card with the given ATR
    pub fn insert_card(&self, index: u32, slot: usize, atr: impl Into<Vec<u8>>) {
        self.with_slot(index, slot, |s| {
            s.atr = Some(atr.into());
            s.changed = true;
        });
    }

    /// Remove the card from a slot
    pub fn remove_card(&self, index: u32, slot: usize) {
        self.with_slot(index, slot, |s| {
            s.atr = None;
            s.changed = true;
        });
    }

    /// Queue a card response; without queued responses the card answers 90 00
    pub fn push_response(&self, index: u32, slot: usize, response: impl Into<Vec<u8>>) {
        self.with_slot(index, slot, |s| s.responses.push_back(response.into()));
    }

    /// Set what keypad verification returns
    pub fn set_verify_reply(&self, index: u32, reply: Result<Vec<u8>, ServiceError>) {
        if let Some(terminal) = self.state.lock().terminals.get_mut(&index) {
            terminal.verify_reply = reply;
        }
    }

    /// Make the next `op` on terminal `index` fail with `err`
    pub fn fail_next(&self, index: u32, op: Operation, err: ServiceError) {
        self.state
            .lock()
            .faults
            .entry((index, op))
            .or_default()
            .push_back(err);
    }

    /// Calls received so far
    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// APDUs the card in a slot received
    pub fn commands(&self, index: u32, slot: usize) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .terminals
            .get(&index)
            .and_then(|t| t.slots.get(slot))
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    /// Keypad verifications the terminal received
    pub fn verify_calls(&self, index: u32) -> Vec<VerifyCall> {
        self.state
            .lock()
            .terminals
            .get(&index)
            .map(|t| t.verify_calls.clone())
            .unwrap_or_default()
    }

    /// Locks currently held on a slot
    pub fn held_locks(&self, index: u32, slot: usize) -> Vec<(LockToken, LockMode)> {
        self.state
            .lock()
            .terminals
            .get(&index)
            .and_then(|t| t.slots.get(slot))
            .map(|s| s.locks.iter().map(|l| (l.token, l.mode)).collect())
            .unwrap_or_default()
    }

    /// Sessions opened and not yet closed
    pub fn open_sessions(&self, index: u32) -> usize {
        self.state
            .lock()
            .terminals
            .get(&index)
            .map_or(0, |t| t.open_sessions)
    }

    fn with_slot(&self, index: u32, slot: usize, f: impl FnOnce(&mut SimSlot)) {
        if let Some(s) = self
            .state
            .lock()
            .terminals
            .get_mut(&index)
            .and_then(|t| t.slots.get_mut(slot))
        {
            f(s);
        }
    }
}

impl TerminalService for SimulatedService {
    type Handle = SimulatedHandle;

    fn enumerate(&self, index: u32) -> Option<TerminalInfo> {
        self.state
            .lock()
            .terminals
            .get(&index)
            .filter(|t| t.attached)
            .map(|t| t.info.clone())
    }

    fn open(&self, index: u32) -> Result<SimulatedHandle, ServiceError> {
        let mut state = self.state.lock();
        state.calls.open += 1;
        state.take_fault(index, Operation::Open)?;

        state.next_session += 1;
        let session = state.next_session;
        let terminal = state
            .terminals
            .get_mut(&index)
            .filter(|t| t.attached)
            .ok_or(ServiceError::DeviceDisconnected)?;
        terminal.open_sessions += 1;
        let epoch = terminal.epoch;

        trace!(index, session, epoch, "Session opened");
        Ok(SimulatedHandle {
            state: Arc::clone(&self.state),
            index,
            epoch,
            session,
        })
    }
}

/// Session handle of [`SimulatedService`]
#[derive(Debug)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
    index: u32,
    epoch: u64,
    session: u64,
}

impl SimulatedHandle {
    /// Session id, unique per service
    pub const fn session(&self) -> u64 {
        self.session
    }
}

fn copy_out(data: &[u8], out: &mut [u8]) -> Result<usize, ServiceError> {
    let dest = out
        .get_mut(..data.len())
        .ok_or(ServiceError::BufferTooSmall)?;
    dest.copy_from_slice(data);
    Ok(data.len())
}

impl TerminalHandle for SimulatedHandle {
    fn reset(
        &mut self,
        slot: usize,
        _timeout: Option<Duration>,
        atr: &mut [u8],
    ) -> Result<usize, ServiceError> {
        let mut state = self.state.lock();
        state.calls.reset += 1;
        state.take_fault(self.index, Operation::Reset)?;

        let s = state.session_slot(self.index, self.epoch, slot)?;
        let card_atr = s.atr.as_deref().ok_or(ServiceError::NoCard)?;
        copy_out(card_atr, atr)
    }

    fn status(&mut self, slot: usize) -> Result<u32, ServiceError> {
        let mut state = self.state.lock();
        state.calls.status += 1;
        state.take_fault(self.index, Operation::Status)?;

        let s = state.session_slot(self.index, self.epoch, slot)?;
        let mut bits = 0;
        if s.atr.is_some() {
            bits |= CARD_PRESENT;
        }
        if s.changed {
            bits |= CARD_STATUS_CHANGED;
            s.changed = false;
        }
        Ok(bits)
    }

    fn transact(
        &mut self,
        slot: usize,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ServiceError> {
        let mut state = self.state.lock();
        state.calls.transact += 1;
        state.take_fault(self.index, Operation::Transact)?;

        let s = state.session_slot(self.index, self.epoch, slot)?;
        if s.atr.is_none() {
            return Err(ServiceError::NoCard);
        }
        s.commands.push(request.to_vec());
        let reply = s.responses.pop_front().unwrap_or_else(|| vec![0x90, 0x00]);
        copy_out(&reply, response)
    }

    fn verify(
        &mut self,
        slot: usize,
        params: &VerifyParams<'_>,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ServiceError> {
        let mut state = self.state.lock();
        state.calls.verify += 1;
        state.take_fault(self.index, Operation::Verify)?;

        let s = state.session_slot(self.index, self.epoch, slot)?;
        if s.atr.is_none() {
            return Err(ServiceError::NoCard);
        }

        let terminal = state
            .terminals
            .get_mut(&self.index)
            .ok_or(ServiceError::NotConnected)?;
        terminal.verify_calls.push(VerifyCall {
            slot,
            timeout: params.timeout,
            prompt: params.prompt.map(str::to_string),
            encoding: params.encoding,
            pin_length: params.pin_length,
            pin_offset: params.pin_offset,
            command: command.to_vec(),
        });
        let reply = terminal.verify_reply.clone()?;
        copy_out(&reply, response)
    }

    fn lock(&mut self, slot: usize, mode: LockMode) -> Result<LockToken, ServiceError> {
        let mut state = self.state.lock();
        state.calls.lock += 1;
        state.take_fault(self.index, Operation::Lock)?;

        state.next_token += 1;
        let token = LockToken(state.next_token);
        let session = self.session;
        let s = state.session_slot(self.index, self.epoch, slot)?;

        let conflict = s.locks.iter().any(|l| {
            l.session != session && (mode == LockMode::Exclusive || l.mode == LockMode::Exclusive)
        });
        if conflict {
            return Err(ServiceError::Locked);
        }
        s.locks.push(HeldLock {
            token,
            mode,
            session,
        });
        Ok(token)
    }

    fn unlock(&mut self, slot: usize, token: LockToken) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        state.calls.unlock += 1;
        state.take_fault(self.index, Operation::Unlock)?;

        let session = self.session;
        let s = state.session_slot(self.index, self.epoch, slot)?;
        let pos = s
            .locks
            .iter()
            .position(|l| l.token == token && l.session == session)
            .ok_or(ServiceError::NoLock)?;
        s.locks.remove(pos);
        Ok(())
    }

    fn close(self) {
        // bookkeeping happens in Drop
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.calls.close += 1;
        if let Some(terminal) = state.terminals.get_mut(&self.index) {
            terminal.open_sessions = terminal.open_sessions.saturating_sub(1);
            for slot in &mut terminal.slots {
                slot.locks.retain(|l| l.session != self.session);
            }
        }
        trace!(index = self.index, session = self.session, "Session closed");
    }
}
