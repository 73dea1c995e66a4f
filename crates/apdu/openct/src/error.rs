//! Error types for the OpenCT reader backend
//!
//! [`ServiceError`] is what the card-terminal service reports, [`ReaderError`]
//! is what the host sees. Apart from the keypad codes, service errors
//! collapse into [`ReaderError::Reader`].

/// Result type for reader driver operations
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Status codes reported by the card-terminal service
///
/// The numeric values match OpenCT's `IFD_ERROR_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ServiceError {
    /// Unspecified failure
    #[error("generic error")]
    Generic,

    /// Operation timed out
    #[error("timed out")]
    Timeout,

    /// Slot does not exist on the terminal
    #[error("invalid slot")]
    InvalidSlot,

    /// Operation not supported by the terminal
    #[error("operation not supported")]
    NotSupported,

    /// Communication with the terminal failed
    #[error("communication error")]
    CommError,

    /// No card in the slot
    #[error("no card present")]
    NoCard,

    /// Slot is locked by another client
    #[error("reader already locked")]
    Locked,

    /// Lock token is not known to the service
    #[error("lock handle not found")]
    NoLock,

    /// Invalid argument passed to the service
    #[error("invalid argument")]
    InvalidArg,

    /// Service ran out of memory
    #[error("out of memory")]
    NoMemory,

    /// Response did not fit into the supplied buffer
    #[error("buffer too small")]
    BufferTooSmall,

    /// The user did not complete keypad entry in time
    #[error("user input timed out")]
    UserTimeout,

    /// The user cancelled keypad entry
    #[error("operation aborted by user")]
    UserAbort,

    /// The two PIN entries did not match
    #[error("PIN mismatch")]
    PinMismatch,

    /// Card did not answer the reset
    #[error("no ATR received")]
    NoAtr,

    /// Device is not compatible with the terminal driver
    #[error("incompatible device")]
    IncompatibleDevice,

    /// Device went away
    #[error("device disconnected")]
    DeviceDisconnected,

    /// Session handle is no longer valid
    #[error("not connected")]
    NotConnected,

    /// Session handle is already connected
    #[error("already connected")]
    AlreadyConnected,

    /// Code not known to this crate
    #[error("unknown service error {0}")]
    Other(i32),
}

impl ServiceError {
    /// Numeric service status code for this error
    pub const fn code(&self) -> i32 {
        match self {
            Self::Generic => -1,
            Self::Timeout => -2,
            Self::InvalidSlot => -3,
            Self::NotSupported => -4,
            Self::CommError => -5,
            Self::NoCard => -6,
            Self::Locked => -7,
            Self::NoLock => -8,
            Self::InvalidArg => -9,
            Self::NoMemory => -10,
            Self::BufferTooSmall => -11,
            Self::UserTimeout => -12,
            Self::UserAbort => -13,
            Self::PinMismatch => -14,
            Self::NoAtr => -15,
            Self::IncompatibleDevice => -16,
            Self::DeviceDisconnected => -17,
            Self::NotConnected => -100,
            Self::AlreadyConnected => -101,
            Self::Other(code) => *code,
        }
    }

    /// Decode a negative service status code
    pub const fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::Generic,
            -2 => Self::Timeout,
            -3 => Self::InvalidSlot,
            -4 => Self::NotSupported,
            -5 => Self::CommError,
            -6 => Self::NoCard,
            -7 => Self::Locked,
            -8 => Self::NoLock,
            -9 => Self::InvalidArg,
            -10 => Self::NoMemory,
            -11 => Self::BufferTooSmall,
            -12 => Self::UserTimeout,
            -13 => Self::UserAbort,
            -14 => Self::PinMismatch,
            -15 => Self::NoAtr,
            -16 => Self::IncompatibleDevice,
            -17 => Self::DeviceDisconnected,
            -100 => Self::NotConnected,
            -101 => Self::AlreadyConnected,
            other => Self::Other(other),
        }
    }

    /// Whether the service says the session handle is gone
    pub const fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }
}

/// Errors reported to the host by the reader driver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReaderError {
    /// No card in the slot, or connecting to it failed
    #[error("Card not present")]
    CardNotPresent,

    /// The reader went away; a later operation may reattach it
    #[error("Reader detached")]
    ReaderDetached,

    /// The reader came back after being detached; cached card state is stale
    #[error("Reader reattached")]
    ReaderReattached,

    /// Malformed input from the caller
    #[error("Invalid arguments: {0}")]
    InvalidArguments(&'static str),

    /// Command does not fit into the driver's buffer
    #[error("Buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available
        capacity: usize,
    },

    /// The reader returned data of an unexpected shape
    #[error("Unknown data received: {0} bytes")]
    UnknownDataReceived(usize),

    /// Keypad entry timed out
    #[error("Keypad timeout")]
    KeypadTimeout,

    /// Keypad entry was cancelled by the user
    #[error("Keypad cancelled")]
    KeypadCancelled,

    /// Querying the reader failed
    #[error("Transmit failed: {0}")]
    TransmitFailed(ServiceError),

    /// Generic reader error
    #[error("Reader error: {0}")]
    Reader(ServiceError),

    /// The host could not take another reader
    #[error("Out of memory")]
    OutOfMemory,
}

impl ReaderError {
    /// Whether the error signals a hot-plug transition rather than a failure
    /// of the requested operation
    pub const fn is_hotplug(&self) -> bool {
        matches!(self, Self::ReaderDetached | Self::ReaderReattached)
    }
}

impl From<ServiceError> for ReaderError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::UserTimeout => Self::KeypadTimeout,
            ServiceError::UserAbort => Self::KeypadCancelled,
            other => Self::Reader(other),
        }
    }
}

/// Translate a service result into a driver result
pub fn translate<T>(result: std::result::Result<T, ServiceError>) -> Result<T> {
    result.map_err(ReaderError::from)
}
