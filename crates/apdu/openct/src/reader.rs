//! Reader and slot records for OpenCT terminals

use std::fmt;

use crate::error::{ReaderError, Result};
use crate::service::{
    CARD_PRESENT, CARD_STATUS_CHANGED, LockMode, LockToken, TerminalHandle, TerminalInfo,
};

/// Name given to readers registered ahead of a terminal being plugged in
pub const DETACHED_READER_NAME: &str = "OpenCT reader (detached)";

/// Maximum number of slots the host keeps per reader
pub const MAX_SLOTS: usize = 4;

/// Maximum ATR length
pub const MAX_ATR_SIZE: usize = 33;

/// Slot capabilities, inherited from the terminal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The terminal has a display
    pub display: bool,
    /// The terminal has a PIN pad
    pub pin_pad: bool,
}

/// Card presence as last reported by the service
///
/// `changed` is kept apart from `present` so callers can tell a card that
/// stayed in the slot from one that was just (re)inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardPresence {
    /// A card is in the slot
    pub present: bool,
    /// The card was inserted or removed since the previous query
    pub changed: bool,
}

impl CardPresence {
    /// No card
    pub const ABSENT: Self = Self {
        present: false,
        changed: false,
    };

    /// Decode the service status bits
    pub const fn from_status(status: u32) -> Self {
        Self {
            present: status & CARD_PRESENT != 0,
            changed: status & CARD_STATUS_CHANGED != 0,
        }
    }
}

/// A lock token together with the connection generation that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLock {
    token: LockToken,
    generation: u64,
}

impl SlotLock {
    pub(crate) const fn new(token: LockToken, generation: u64) -> Self {
        Self { token, generation }
    }

    /// The service token
    pub const fn token(&self) -> LockToken {
        self.token
    }

    /// Generation of the connection the token belongs to
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Live session to the service
#[derive(Debug)]
pub struct Connection<H> {
    handle: H,
    generation: u64,
}

impl<H: TerminalHandle> Connection<H> {
    pub(crate) const fn new(handle: H, generation: u64) -> Self {
        Self { handle, generation }
    }

    /// Generation this connection was opened under
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The session handle
    pub const fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    pub(crate) fn close(self) {
        self.handle.close();
    }
}

/// One card slot of a reader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    id: usize,
    presence: CardPresence,
    atr: Vec<u8>,
    capabilities: Capabilities,
    exclusive_lock: Option<SlotLock>,
    shared_lock: Option<SlotLock>,
}

impl Slot {
    fn new(id: usize, capabilities: Capabilities) -> Self {
        Self {
            id,
            capabilities,
            ..Default::default()
        }
    }

    /// Slot number within the reader
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Last known card presence
    pub const fn presence(&self) -> CardPresence {
        self.presence
    }

    /// Whether a card was present at the last query
    pub const fn is_card_present(&self) -> bool {
        self.presence.present
    }

    /// ATR read by the last successful connect, empty if none
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Slot capabilities
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Lock held in `mode`, if any
    pub const fn lock(&self, mode: LockMode) -> Option<SlotLock> {
        match mode {
            LockMode::Exclusive => self.exclusive_lock,
            LockMode::Shared => self.shared_lock,
        }
    }

    pub(crate) const fn set_presence(&mut self, presence: CardPresence) {
        self.presence = presence;
    }

    pub(crate) fn set_atr(&mut self, atr: &[u8]) {
        self.atr.clear();
        self.atr.extend_from_slice(atr);
    }

    pub(crate) const fn set_lock(&mut self, mode: LockMode, lock: SlotLock) {
        match mode {
            LockMode::Exclusive => self.exclusive_lock = Some(lock),
            LockMode::Shared => self.shared_lock = Some(lock),
        }
    }

    pub(crate) const fn take_lock(&mut self, mode: LockMode) -> Option<SlotLock> {
        match mode {
            LockMode::Exclusive => self.exclusive_lock.take(),
            LockMode::Shared => self.shared_lock.take(),
        }
    }

    fn clear(&mut self) {
        self.presence = CardPresence::ABSENT;
        self.atr.clear();
        self.exclusive_lock = None;
        self.shared_lock = None;
    }
}

/// A terminal known to the host
///
/// The reader owns at most one [`Connection`]. Operations that need the
/// service go through the connection manager, which opens, replaces and
/// drops it.
pub struct Reader<H> {
    index: u32,
    name: String,
    slot_count: usize,
    capabilities: Capabilities,
    connection: Option<Connection<H>>,
    generation: u64,
    slots: Vec<Slot>,
}

impl<H> fmt::Debug for Reader<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("slot_count", &self.slot_count)
            .field("capabilities", &self.capabilities)
            .field("connected", &self.connection.is_some())
            .field("generation", &self.generation)
            .field("slots", &self.slots)
            .finish()
    }
}

impl<H: TerminalHandle> Reader<H> {
    /// Create a reader for the terminal at `index`
    ///
    /// Without a descriptor the reader is a placeholder: detached name,
    /// one slot and no capabilities.
    pub fn new(index: u32, info: Option<&TerminalInfo>) -> Self {
        let (name, slot_count, capabilities) = match info {
            Some(info) => (
                info.name.clone(),
                info.slots,
                Capabilities {
                    display: info.display,
                    pin_pad: info.keypad,
                },
            ),
            None => (DETACHED_READER_NAME.to_string(), 1, Capabilities::default()),
        };

        let slots = (0..slot_count.clamp(1, MAX_SLOTS))
            .map(|id| Slot::new(id, capabilities))
            .collect();

        Self {
            index,
            name,
            slot_count,
            capabilities,
            connection: None,
            generation: 0,
            slots,
        }
    }

    /// Terminal index at the service
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Reader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot count declared by the terminal
    pub const fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Reader capabilities
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether a session to the service is open
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Generation of the live connection
    pub fn generation(&self) -> Option<u64> {
        self.connection.as_ref().map(Connection::generation)
    }

    /// The slots of this reader
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Look up a slot
    pub fn slot(&self, slot: usize) -> Result<&Slot> {
        self.slots
            .get(slot)
            .ok_or(ReaderError::InvalidArguments("slot out of range"))
    }

    /// Check that `slot` exists
    pub(crate) fn check_slot(&self, slot: usize) -> Result<()> {
        self.slot(slot).map(|_| ())
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot> {
        self.slots
            .get_mut(slot)
            .ok_or(ReaderError::InvalidArguments("slot out of range"))
    }

    pub(crate) const fn connection_mut(&mut self) -> Option<&mut Connection<H>> {
        self.connection.as_mut()
    }

    /// Install a freshly opened handle under a new generation
    pub(crate) fn attach(&mut self, handle: H) -> u64 {
        self.generation += 1;
        self.connection = Some(Connection::new(handle, self.generation));
        self.generation
    }

    /// Close and drop the handle, if any
    pub(crate) fn detach(&mut self) -> bool {
        match self.connection.take() {
            Some(connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Forget all per-session state
    pub(crate) fn clear(&mut self) {
        self.connection = None;
        for slot in &mut self.slots {
            slot.clear();
        }
    }
}
