//! M25P16 serial flash opcodes
//!
//! The classic 3-byte-address instruction set shared by the M25P family
//! and most JEDEC SPI NOR parts.

// ============================================================================
// Write control
// ============================================================================

/// Write Enable - required before any program/erase operation
pub const WREN: u8 = 0x06;
/// Write Disable - clears WEL bit in status register
pub const WRDI: u8 = 0x04;

// ============================================================================
// Status register operations
// ============================================================================

/// Read Status Register
pub const RDSR: u8 = 0x05;
/// Write Status Register
pub const WRSR: u8 = 0x01;

// ============================================================================
// Identification
// ============================================================================

/// Read JEDEC ID (manufacturer + device ID)
pub const RDID: u8 = 0x9F;
/// Read Electronic Signature / Release from Deep Power Down
pub const RES: u8 = 0xAB;

// ============================================================================
// Read commands
// ============================================================================

/// Read Data
pub const READ: u8 = 0x03;
/// Fast Read (with dummy byte)
pub const FAST_READ: u8 = 0x0B;

// ============================================================================
// Program and erase
// ============================================================================

/// Page Program (up to 256 bytes, wraps within the page)
pub const PP: u8 = 0x02;
/// Sector Erase (64 KiB)
pub const SE: u8 = 0xD8;
/// Bulk Erase (whole chip)
pub const BE: u8 = 0xC7;

// ============================================================================
// Power and reset
// ============================================================================

/// Deep Power Down
pub const DP: u8 = 0xB9;
/// Reset Enable
pub const RSTEN: u8 = 0x66;
/// Reset
pub const RST: u8 = 0x99;
