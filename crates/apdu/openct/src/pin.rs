//! PIN command data for on-reader verification

use crate::error::{ReaderError, Result};
use crate::service::ServicePinEncoding;
use crate::status::StatusWord;

/// Size of the buffer the verify command is built in
pub const MAX_VERIFY_COMMAND: usize = 254;

/// How the PIN is encoded in the command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PinEncoding {
    /// One ASCII character per digit
    #[default]
    Ascii,
    /// Binary coded decimal
    Bcd,
    /// ISO 9564 format 2 PIN block
    Glp,
}

impl TryFrom<PinEncoding> for ServicePinEncoding {
    type Error = ReaderError;

    fn try_from(encoding: PinEncoding) -> Result<Self> {
        match encoding {
            PinEncoding::Ascii => Ok(Self::Ascii),
            PinEncoding::Bcd => Ok(Self::Bcd),
            PinEncoding::Glp => Err(ReaderError::InvalidArguments(
                "PIN encoding not supported by the reader",
            )),
        }
    }
}

/// APDU carrying the PIN
///
/// The status word is filled in by a successful verify.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinApdu {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// First parameter
    pub p1: u8,
    /// Second parameter
    pub p2: u8,
    /// Command data, may be empty
    pub data: Vec<u8>,
    /// Status word of the last verify
    pub status: StatusWord,
}

impl PinApdu {
    /// Create an APDU without command data
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            status: StatusWord::new(0, 0),
        }
    }

    /// Set the command data
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Serialize header, length byte and data
    ///
    /// The length byte and data are only written when there is data.
    pub fn to_command(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(MAX_VERIFY_COMMAND);
        buf.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);

        if !self.data.is_empty() {
            let needed = buf.len() + 1 + self.data.len();
            if needed > MAX_VERIFY_COMMAND {
                return Err(ReaderError::BufferTooSmall {
                    needed,
                    capacity: MAX_VERIFY_COMMAND,
                });
            }
            // needed <= 254 so the length fits in one byte
            buf.push(self.data.len() as u8);
            buf.extend_from_slice(&self.data);
        }

        Ok(buf)
    }
}

/// PIN properties the card application imposes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinPolicy {
    /// Shortest accepted PIN
    pub min_length: usize,
    /// Longest accepted PIN
    pub max_length: usize,
    /// PIN encoding
    pub encoding: PinEncoding,
    /// Offset of the PIN inside the command data
    pub offset: usize,
    /// Prompt for the terminal display
    pub prompt: Option<String>,
}

impl PinPolicy {
    /// PIN length to request from the keypad; zero lets the keypad decide
    pub const fn pin_length(&self) -> usize {
        if self.min_length == self.max_length {
            self.min_length
        } else {
            0
        }
    }
}

/// A verify request: the APDU to send and the PIN it expects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinCommand {
    /// The APDU; verification needs one
    pub apdu: Option<PinApdu>,
    /// The PIN policy
    pub pin: PinPolicy,
}

impl PinCommand {
    /// Create a verify request
    pub const fn new(apdu: PinApdu, pin: PinPolicy) -> Self {
        Self {
            apdu: Some(apdu),
            pin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_without_data_is_header_only() {
        let apdu = PinApdu::new(0x00, 0x20, 0x00, 0x81);
        assert_eq!(apdu.to_command().unwrap(), vec![0x00, 0x20, 0x00, 0x81]);
    }

    #[test]
    fn test_command_with_data_gets_length_byte() {
        let apdu = PinApdu::new(0x00, 0x20, 0x00, 0x81).with_data([0xFF; 8]);
        let cmd = apdu.to_command().unwrap();
        assert_eq!(cmd.len(), 13);
        assert_eq!(cmd[4], 8);
        assert_eq!(&cmd[5..], &[0xFF; 8]);
    }

    #[test]
    fn test_command_size_limit() {
        let fits = PinApdu::new(0, 0x20, 0, 0).with_data(vec![0; 249]);
        assert_eq!(fits.to_command().unwrap().len(), MAX_VERIFY_COMMAND);

        let too_big = PinApdu::new(0, 0x20, 0, 0).with_data(vec![0; 250]);
        assert_eq!(
            too_big.to_command(),
            Err(ReaderError::BufferTooSmall {
                needed: 255,
                capacity: MAX_VERIFY_COMMAND
            })
        );
    }

    #[test]
    fn test_pin_length() {
        let fixed = PinPolicy {
            min_length: 6,
            max_length: 6,
            ..Default::default()
        };
        assert_eq!(fixed.pin_length(), 6);

        let variable = PinPolicy {
            min_length: 4,
            max_length: 8,
            ..Default::default()
        };
        assert_eq!(variable.pin_length(), 0);
    }

    #[test]
    fn test_encoding_conversion() {
        assert_eq!(
            ServicePinEncoding::try_from(PinEncoding::Ascii),
            Ok(ServicePinEncoding::Ascii)
        );
        assert_eq!(
            ServicePinEncoding::try_from(PinEncoding::Bcd),
            Ok(ServicePinEncoding::Bcd)
        );
        assert!(matches!(
            ServicePinEncoding::try_from(PinEncoding::Glp),
            Err(ReaderError::InvalidArguments(_))
        ));
    }
}
