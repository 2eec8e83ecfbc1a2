//! Error types for the board emulator

use thiserror::Error;

/// Emulator setup errors
#[derive(Debug, Error)]
pub enum SimError {
    /// An image does not fit the emulated device
    #[error("image of {size} bytes does not fit a {capacity}-byte device")]
    ImageTooLarge {
        /// Image size in bytes
        size: usize,
        /// Device size in bytes
        capacity: usize,
    },

    /// Two files were placed on the card under the same name
    #[error("duplicate file on card: {0}")]
    DuplicatePath(String),

    /// Host file access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for emulator setup
pub type Result<T> = std::result::Result<T, SimError>;
