//! SD/MMC SPI-mode command set
//!
//! Only the commands the programmer issues are listed. Application commands
//! carry [`ACMD_FLAG`]; the driver strips it and sends [`CMD55`] first.

use bitflags::bitflags;

// ============================================================================
// Command indices
// ============================================================================

/// GO_IDLE_STATE - software reset into SPI mode
pub const CMD0: u8 = 0;
/// SEND_OP_COND (MMC) - start initialization
pub const CMD1: u8 = 1;
/// SEND_IF_COND - voltage range check (SDv2 only)
pub const CMD8: u8 = 8;
/// SET_BLOCKLEN
pub const CMD16: u8 = 16;
/// READ_SINGLE_BLOCK
pub const CMD17: u8 = 17;
/// APP_CMD - next command is an application command
pub const CMD55: u8 = 55;
/// READ_OCR - operation condition register
pub const CMD58: u8 = 58;

/// Marks an application command in the command byte
pub const ACMD_FLAG: u8 = 0x80;
/// SD_SEND_OP_COND (SDC) - start initialization
pub const ACMD41: u8 = ACMD_FLAG | 41;

// ============================================================================
// Arguments and checksums
// ============================================================================

/// CMD8 argument: 2.7-3.6V supply, check pattern 0xAA
pub const IF_COND_ARG: u32 = 0x0000_01AA;
/// ACMD41 argument announcing high capacity support
pub const HCS_ARG: u32 = 0x4000_0000;

/// Checksum for CMD0 with a zero argument
pub const CMD0_CRC: u8 = 0x95;
/// Checksum for CMD8 with [`IF_COND_ARG`]
pub const CMD8_CRC: u8 = 0x87;
/// Checksum byte for every other command (not checked in SPI mode)
pub const DUMMY_CRC: u8 = 0xFF;

/// Start bits OR-ed into the command index
pub const START_BITS: u8 = 0x40;

// ============================================================================
// Tokens and register bits
// ============================================================================

/// Data start token for single block read
pub const TOKEN_START_BLOCK: u8 = 0xFE;
/// Card capacity status in OCR byte 0 (block addressing)
pub const OCR_CCS: u8 = 0x40;
/// Bytes per block
pub const BLOCK_SIZE: usize = 512;

bitflags! {
    /// R1 response bits
    ///
    /// Bit 7 is always clear in a valid response; a byte with bit 7 set
    /// means the card has not answered yet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R1: u8 {
        /// Card is in idle state and running initialization
        const IDLE            = 1 << 0;
        /// Erase sequence cleared before executing
        const ERASE_RESET     = 1 << 1;
        /// Illegal command code
        const ILLEGAL_COMMAND = 1 << 2;
        /// Command CRC check failed
        const CRC_ERROR       = 1 << 3;
        /// Error in the erase command sequence
        const ERASE_SEQUENCE  = 1 << 4;
        /// Misaligned address
        const ADDRESS_ERROR   = 1 << 5;
        /// Argument outside the allowed range
        const PARAMETER_ERROR = 1 << 6;
    }
}

/// Checksum byte sent with `cmd`
pub fn crc_for(cmd: u8) -> u8 {
    match cmd {
        CMD0 => CMD0_CRC,
        CMD8 => CMD8_CRC,
        _ => DUMMY_CRC,
    }
}

/// Build the 6-byte command frame for `cmd` (application flag stripped)
pub fn command_frame(cmd: u8, arg: u32) -> [u8; 6] {
    let cmd = cmd & !ACMD_FLAG;
    let [a3, a2, a1, a0] = arg.to_be_bytes();
    [START_BITS | cmd, a3, a2, a1, a0, crc_for(cmd)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_frame_carries_fixed_crc() {
        assert_eq!(command_frame(CMD0, 0), [0x40, 0, 0, 0, 0, 0x95]);
    }

    #[test]
    fn if_cond_frame() {
        assert_eq!(
            command_frame(CMD8, IF_COND_ARG),
            [0x48, 0x00, 0x00, 0x01, 0xAA, 0x87]
        );
    }

    #[test]
    fn application_flag_is_stripped() {
        assert_eq!(
            command_frame(ACMD41, HCS_ARG),
            [0x69, 0x40, 0x00, 0x00, 0x00, 0xFF]
        );
    }

    #[test]
    fn read_frame_is_big_endian() {
        assert_eq!(
            command_frame(CMD17, 0x0001_2345),
            [0x51, 0x00, 0x01, 0x23, 0x45, 0xFF]
        );
    }

    #[test]
    fn r1_idle() {
        assert_eq!(R1::from_bits_truncate(0x01), R1::IDLE);
        assert!(R1::from_bits_truncate(0x05).contains(R1::ILLEGAL_COMMAND));
    }
}
