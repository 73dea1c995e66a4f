//! Interface to the external card-terminal service
//!
//! The service is reached through a [`TerminalService`], which enumerates
//! terminals and opens sessions to them. A session is a [`TerminalHandle`];
//! every card operation goes through one.

use std::fmt;
use std::time::Duration;

use crate::error::ServiceError;

/// Highest number of terminals the service exposes
pub const MAX_TERMINALS: usize = 16;

/// Card status bit: a card is in the slot
pub const CARD_PRESENT: u32 = 0x0001;

/// Card status bit: the card was inserted or removed since the last query
pub const CARD_STATUS_CHANGED: u32 = 0x0002;

/// Terminal descriptor returned by [`TerminalService::enumerate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInfo {
    /// Terminal name
    pub name: String,
    /// Number of card slots
    pub slots: usize,
    /// Terminal has a display
    pub display: bool,
    /// Terminal has a PIN pad
    pub keypad: bool,
}

impl TerminalInfo {
    /// Create a descriptor without display or keypad
    pub fn new(name: impl Into<String>, slots: usize) -> Self {
        Self {
            name: name.into(),
            slots,
            display: false,
            keypad: false,
        }
    }

    /// Set the display capability
    pub const fn with_display(mut self, display: bool) -> Self {
        self.display = display;
        self
    }

    /// Set the keypad capability
    pub const fn with_keypad(mut self, keypad: bool) -> Self {
        self.keypad = keypad;
        self
    }
}

/// Locking mode requested from the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Other clients may still use the card
    Shared,
    /// No other client may use the card
    Exclusive,
}

/// Opaque lock token issued by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(pub u32);

/// PIN encodings understood by the service's keypad verify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePinEncoding {
    /// Binary coded decimal
    Bcd,
    /// One ASCII character per digit
    Ascii,
}

/// Parameters for [`TerminalHandle::verify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyParams<'a> {
    /// Keypad timeout, `None` leaves it to the terminal
    pub timeout: Option<Duration>,
    /// Prompt shown on the terminal display
    pub prompt: Option<&'a str>,
    /// PIN encoding
    pub encoding: ServicePinEncoding,
    /// PIN length; zero means variable length, decided by the terminal
    pub pin_length: usize,
    /// Offset of the PIN inside the command data
    pub pin_offset: usize,
}

/// Card-terminal service
pub trait TerminalService: fmt::Debug {
    /// Session handle type
    type Handle: TerminalHandle;

    /// Describe the terminal at `index`, `None` when there is none
    fn enumerate(&self, index: u32) -> Option<TerminalInfo>;

    /// Open a session to the terminal at `index`
    fn open(&self, index: u32) -> Result<Self::Handle, ServiceError>;
}

/// Session to one terminal
///
/// Methods that fill a buffer return the number of bytes written; the
/// buffer length is the capacity offered to the service.
pub trait TerminalHandle: fmt::Debug {
    /// Reset the card in `slot` and read its ATR
    fn reset(
        &mut self,
        slot: usize,
        timeout: Option<Duration>,
        atr: &mut [u8],
    ) -> Result<usize, ServiceError>;

    /// Query the card status bits of `slot`
    fn status(&mut self, slot: usize) -> Result<u32, ServiceError>;

    /// Exchange an APDU with the card in `slot`
    fn transact(
        &mut self,
        slot: usize,
        request: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ServiceError>;

    /// Let the user enter a PIN on the terminal keypad and send `command`
    /// with the PIN filled in
    fn verify(
        &mut self,
        slot: usize,
        params: &VerifyParams<'_>,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ServiceError>;

    /// Lock `slot` against other clients
    fn lock(&mut self, slot: usize, mode: LockMode) -> Result<LockToken, ServiceError>;

    /// Release a lock taken with [`TerminalHandle::lock`]
    fn unlock(&mut self, slot: usize, token: LockToken) -> Result<(), ServiceError>;

    /// Close the session
    fn close(self)
    where
        Self: Sized;
}
