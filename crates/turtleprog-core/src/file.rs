//! Sequential file reader seam
//!
//! The FAT layer is a platform collaborator. The core only needs to open a
//! known path and read it forward; the reader sits on top of the card
//! through [`BlockDevice`].

use crate::error::Result;

/// Block-granular storage under the file reader
pub trait BlockDevice {
    /// Read `buf.len()` bytes starting `offset` bytes into `block`
    fn read_block(&mut self, block: u32, offset: usize, buf: &mut [u8]) -> Result<()>;
}

/// Forward-only file access
///
/// The read cursor lives in the implementation. Opening a path resets it.
pub trait FileReader {
    /// Open `path`, failing with [`Error::FileNotFound`](crate::Error::FileNotFound)
    fn open<D: BlockDevice>(&mut self, dev: &mut D, path: &str) -> Result<()>;

    /// Read up to `buf.len()` bytes
    ///
    /// A count below `buf.len()` means the end of the file was reached.
    fn read<D: BlockDevice>(&mut self, dev: &mut D, buf: &mut [u8]) -> Result<usize>;
}
