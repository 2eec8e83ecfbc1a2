//! Hex dump of one flash page

use core::fmt::{self, Write};

use crate::bus::{SharedBus, SpiPort};
use crate::console::{Console, Transport};
use crate::error::Result;
use crate::flash::{SpiFlash, PAGE_SIZE};

/// Bytes per dump line
const LINE_LEN: usize = 16;

/// Page number selected by a single digit key
pub fn page_from_key(key: u8) -> Option<u8> {
    key.is_ascii_digit().then(|| key - b'0')
}

/// Format one line: offset, hex bytes, tab, printable ASCII
pub fn write_dump_line<W: Write>(out: &mut W, offset: u16, line: &[u8]) -> fmt::Result {
    write!(out, "{:04X}: ", offset)?;
    for byte in line {
        write!(out, "{:02X} ", byte)?;
    }
    out.write_char('\t')?;
    for &byte in line {
        let c = if byte == b' ' || byte.is_ascii_graphic() {
            byte as char
        } else {
            '.'
        };
        out.write_char(c)?;
    }
    out.write_str("\r\n")
}

/// Dump flash page `page` (address `page << 8`) to the console
pub fn dump_page<P: SpiPort, T: Transport>(
    bus: &mut SharedBus<P>,
    flash: &SpiFlash<'_>,
    console: &mut Console<T>,
    page: u8,
) -> Result<()> {
    let addr = u32::from(page) << 8;
    let mut data = [0u8; PAGE_SIZE];
    let mut read = flash.read(bus, addr)?;
    read.read_into(&mut data);
    read.finish();

    console.print(format_args!("{:08X}:\r\n", addr));
    for (i, line) in data.chunks(LINE_LEN).enumerate() {
        // Writing to the console cannot fail
        let _ = write_dump_line(console, (i * LINE_LEN) as u16, line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;

    #[test]
    fn digits_select_pages() {
        assert_eq!(page_from_key(b'0'), Some(0));
        assert_eq!(page_from_key(b'9'), Some(9));
        assert_eq!(page_from_key(b'a'), None);
        assert_eq!(page_from_key(b'\r'), None);
    }

    #[test]
    fn line_shows_hex_and_ascii() {
        let mut out = String::new();
        let line = *b"Turtle\x00\xFF board!\n";
        write_dump_line(&mut out, 0x20, &line).unwrap();
        assert_eq!(
            out,
            "0020: 54 75 72 74 6C 65 00 FF 20 62 6F 61 72 64 21 0A \tTurtle.. board!.\r\n"
        );
    }
}
