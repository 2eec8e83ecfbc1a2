//! Error types for turtleprog-core
//!
//! A single no_std, `Copy` error enum shared by every layer. Content
//! mismatches found by verify and blank-check are not errors; they travel in
//! [`crate::ops::Outcome`].

use core::fmt;

/// Core error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Bus errors
    /// A device was selected while another one was still selected
    BusContention,
    /// The SPI bus is not claimed for programming
    BusNotOwned,

    // Card negotiation errors
    /// The card never acknowledged GO_IDLE_STATE
    CardNoResponse,
    /// SEND_IF_COND echoed the wrong voltage range or check pattern
    CardVoltageMismatch,
    /// The card stayed busy for the whole initialization window
    CardInitTimeout,
    /// The card did not release the bus after being selected
    CardBusy,
    /// The card rejected a command
    CardCommand {
        /// Command index (without the 0x40 start bits)
        cmd: u8,
        /// R1 response byte
        response: u8,
    },
    /// No card has been initialized
    CardNotMounted,

    // Streaming errors
    /// The data start token never arrived after READ_SINGLE_BLOCK
    DataTokenTimeout,
    /// The requested file does not exist on the card
    FileNotFound,
    /// A read was attempted without an open file
    FileNotOpen,
    /// The file layer failed to read
    ReadError,

    // Flash errors
    /// The flash kept its busy bit set past the configured bound
    FlashTimeout,

    // Address errors
    /// Address or length beyond the device
    AddressOutOfBounds,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusContention => write!(f, "SPI bus already has a device selected"),
            Self::BusNotOwned => write!(f, "SPI bus not claimed"),
            Self::CardNoResponse => write!(f, "card did not answer CMD0"),
            Self::CardVoltageMismatch => write!(f, "card cannot operate at 2.7-3.6V"),
            Self::CardInitTimeout => write!(f, "card initialization timed out"),
            Self::CardBusy => write!(f, "card did not release the bus"),
            Self::CardCommand { cmd, response } => {
                write!(f, "CMD{} returned 0x{:02X}", cmd, response)
            }
            Self::CardNotMounted => write!(f, "no card mounted"),
            Self::DataTokenTimeout => write!(f, "timed out waiting for data token"),
            Self::FileNotFound => write!(f, "file not found"),
            Self::FileNotOpen => write!(f, "no file open"),
            Self::ReadError => write!(f, "read operation failed"),
            Self::FlashTimeout => write!(f, "flash stayed busy"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
