//! Programmer configuration

use crate::flash::BoardRevision;

/// Path of the bitstream on the card
pub const DEFAULT_IMAGE_PATH: &str = "/fpga.bin";

/// Bytes between progress reports
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 10 * 1024;

/// Build-time settings of the programmer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Board revision, which fixes the flash size
    pub revision: BoardRevision,
    /// File copied and verified by the W and V commands
    pub image_path: &'static str,
    /// Progress is printed every this many bytes (0 disables it)
    pub progress_interval: u32,
    /// Upper bound in ticks for flash ready polling; `None` waits forever
    pub flash_ready_timeout: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            revision: BoardRevision::default(),
            image_path: DEFAULT_IMAGE_PATH,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            flash_ready_timeout: None,
        }
    }
}
