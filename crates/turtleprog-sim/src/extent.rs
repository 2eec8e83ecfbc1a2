//! Contiguous-extent file table
//!
//! A stand-in for the FAT layer: each file is one run of whole blocks on
//! the card, looked up by name. Enough to exercise the programmer's file
//! path end to end without a filesystem image.

use turtleprog_core::file::{BlockDevice, FileReader};
use turtleprog_core::sdcard::commands::BLOCK_SIZE;
use turtleprog_core::sdcard::CardType;
use turtleprog_core::Error;

use crate::card::{CardConfig, SimCard};
use crate::error::{Result, SimError};

/// First block used for file data, leaving room for a partition table
pub const FIRST_DATA_BLOCK: u32 = 64;

#[derive(Debug, Clone)]
struct Extent {
    name: String,
    first_block: u32,
    len: u32,
}

/// File table mapping names to block extents
#[derive(Debug, Default)]
pub struct ExtentFs {
    files: Vec<Extent>,
    open: Option<(usize, u32)>,
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_ascii_lowercase()
}

impl ExtentFs {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` as `len` bytes starting at `first_block`
    pub fn add(&mut self, path: &str, first_block: u32, len: u32) -> Result<()> {
        let name = normalize(path);
        if self.files.iter().any(|f| f.name == name) {
            return Err(SimError::DuplicatePath(path.to_string()));
        }
        self.files.push(Extent {
            name,
            first_block,
            len,
        });
        Ok(())
    }

    /// Byte position in the open file
    pub fn position(&self) -> Option<u32> {
        self.open.map(|(_, pos)| pos)
    }
}

impl FileReader for ExtentFs {
    fn open<D: BlockDevice>(&mut self, _dev: &mut D, path: &str) -> turtleprog_core::Result<()> {
        let name = normalize(path);
        let index = self
            .files
            .iter()
            .position(|f| f.name == name)
            .ok_or(Error::FileNotFound)?;
        log::debug!("opened {} ({} bytes)", path, self.files[index].len);
        self.open = Some((index, 0));
        Ok(())
    }

    fn read<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        buf: &mut [u8],
    ) -> turtleprog_core::Result<usize> {
        let (index, pos) = self.open.ok_or(Error::FileNotOpen)?;
        let file = &self.files[index];
        let remaining = (file.len - pos) as usize;
        let count = buf.len().min(remaining);

        let mut done = 0;
        while done < count {
            let at = pos as usize + done;
            let block = file.first_block + (at / BLOCK_SIZE) as u32;
            let offset = at % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - offset).min(count - done);
            dev.read_block(block, offset, &mut buf[done..done + chunk])
                .map_err(|e| {
                    log::warn!("read of {} block {} failed: {}", file.name, block, e);
                    Error::ReadError
                })?;
            done += chunk;
        }

        self.open = Some((index, pos + count as u32));
        Ok(count)
    }
}

/// Build a card of `card_type` holding `files`, plus the table to find them
///
/// Files are laid out back to back from [`FIRST_DATA_BLOCK`], each padded
/// to whole blocks.
pub fn build_card(card_type: CardType, files: &[(&str, &[u8])]) -> Result<(SimCard, ExtentFs)> {
    let mut fs = ExtentFs::new();
    let mut image = vec![0u8; FIRST_DATA_BLOCK as usize * BLOCK_SIZE];
    for (path, data) in files {
        let first_block = (image.len() / BLOCK_SIZE) as u32;
        fs.add(path, first_block, data.len() as u32)?;
        image.extend_from_slice(data);
        let padded = image.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        image.resize(padded, 0);
    }
    Ok((SimCard::new(CardConfig::new(card_type), image), fs))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serves blocks straight out of a byte vector
    struct Blocks(Vec<u8>);

    impl BlockDevice for Blocks {
        fn read_block(
            &mut self,
            block: u32,
            offset: usize,
            buf: &mut [u8],
        ) -> turtleprog_core::Result<()> {
            let start = block as usize * BLOCK_SIZE + offset;
            let src = self.0.get(start..start + buf.len()).ok_or(Error::ReadError)?;
            buf.copy_from_slice(src);
            Ok(())
        }
    }

    #[test]
    fn lookup_ignores_case_and_leading_slash() {
        let mut fs = ExtentFs::new();
        fs.add("/FPGA.BIN", 1, 10).unwrap();
        let mut dev = Blocks(Vec::new());
        assert!(fs.open(&mut dev, "fpga.bin").is_ok());
        assert_eq!(fs.open(&mut dev, "/other.bin"), Err(Error::FileNotFound));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut fs = ExtentFs::new();
        fs.add("/a.bin", 1, 10).unwrap();
        assert!(matches!(
            fs.add("A.BIN", 5, 10),
            Err(SimError::DuplicatePath(_))
        ));
    }

    #[test]
    fn reads_across_blocks_and_stops_at_end() {
        let data: Vec<u8> = (0..700u32).map(|i| i as u8).collect();
        let mut image = vec![0u8; BLOCK_SIZE];
        image.extend_from_slice(&data);
        image.resize(3 * BLOCK_SIZE, 0);
        let mut dev = Blocks(image);

        let mut fs = ExtentFs::new();
        fs.add("/f", 1, 700).unwrap();
        fs.open(&mut dev, "/f").unwrap();

        let mut buf = [0u8; 600];
        assert_eq!(fs.read(&mut dev, &mut buf).unwrap(), 600);
        assert_eq!(&buf[..], &data[..600]);
        assert_eq!(fs.read(&mut dev, &mut buf).unwrap(), 100);
        assert_eq!(&buf[..100], &data[600..]);
        assert_eq!(fs.read(&mut dev, &mut buf).unwrap(), 0);
    }

    #[test]
    fn read_before_open_fails() {
        let mut fs = ExtentFs::new();
        let mut buf = [0u8; 4];
        assert_eq!(
            fs.read(&mut Blocks(Vec::new()), &mut buf),
            Err(Error::FileNotOpen)
        );
    }

    #[test]
    fn block_errors_become_read_errors() {
        let mut fs = ExtentFs::new();
        fs.add("/f", 100, 16).unwrap();
        let mut dev = Blocks(Vec::new());
        fs.open(&mut dev, "/f").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(fs.read(&mut dev, &mut buf), Err(Error::ReadError));
    }

    #[test]
    fn build_card_pads_files_to_blocks() {
        let (card, _fs) =
            build_card(CardType::Sd2, &[("/a", &[1; 10][..]), ("/b", &[2; 3][..])]).unwrap();
        let base = FIRST_DATA_BLOCK as usize * BLOCK_SIZE;
        assert_eq!(card.image().len(), base + 2 * BLOCK_SIZE);
        assert_eq!(card.image()[base + BLOCK_SIZE], 2);
    }
}
