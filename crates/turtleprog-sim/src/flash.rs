//! Byte-level M25P16 emulator
//!
//! Unlike a command-level mock, this model sees the bus exactly as the chip
//! does: one byte per clock burst, framed by chip select. Program and erase
//! commands only take effect when chip select goes inactive, and leave the
//! chip busy for a configurable number of status polls.

use std::path::Path;

use turtleprog_core::flash::{opcodes, Status, ERASED};

use crate::error::{Result, SimError};

/// Configuration for the emulated flash
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// Flash size in bytes
    pub size: usize,
    /// Page size for programming
    pub page_size: usize,
    /// Bytes returned by RDID
    pub jedec_id: [u8; 3],
    /// Status polls that report busy after a page program
    pub program_busy_polls: u32,
    /// Status polls that report busy after an erase
    pub erase_busy_polls: u32,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            size: 2 * 1024 * 1024,
            page_size: 256,
            jedec_id: [0x20, 0x20, 0x15], // M25P16
            program_busy_polls: 3,
            erase_busy_polls: 50,
        }
    }
}

/// Something the chip did, in bus order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashEvent {
    /// WREN accepted
    WriteEnable,
    /// WRDI accepted
    WriteDisable,
    /// RDSR started
    ReadStatus,
    /// READ started at `addr`
    Read {
        /// Start address
        addr: u32,
    },
    /// A page program committed on deselect
    PageProgram {
        /// Address sent with PP
        addr: u32,
        /// Data bytes latched
        len: usize,
    },
    /// A sector erase committed on deselect
    SectorErase {
        /// Address sent with SE
        addr: u32,
    },
    /// A bulk erase committed on deselect
    BulkErase,
    /// Software reset performed
    Reset,
    /// RDID started
    ReadId,
    /// An instruction arrived while a program or erase was running
    IgnoredWhileBusy(u8),
    /// An instruction was refused (unknown, or write latch not set)
    Rejected(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    /// Selected, waiting for an instruction byte
    Instruction,
    /// Collecting the 3 address bytes of `opcode`
    Address { opcode: u8, addr: u32, left: u8 },
    /// Streaming data out
    Read { addr: u32 },
    /// Latching page program data
    Program { addr: u32, latch: Vec<u8> },
    /// Streaming the status register out
    Status,
    /// Streaming the JEDEC ID out
    Id { index: usize },
    /// Instruction complete; waiting for deselect to act on it
    Armed(Armed),
    /// Further bytes are ignored until deselect
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Armed {
    Nothing,
    SectorErase(u32),
    BulkErase,
    Reset,
}

/// Emulated serial NOR flash
#[derive(Debug)]
pub struct SimFlash {
    config: FlashConfig,
    data: Vec<u8>,
    selected: bool,
    phase: Phase,
    write_enabled: bool,
    reset_enabled: bool,
    busy_polls: u32,
    events: Vec<FlashEvent>,
}

impl SimFlash {
    /// Create an erased flash
    pub fn new(config: FlashConfig) -> Self {
        let data = vec![ERASED; config.size];
        Self {
            config,
            data,
            selected: false,
            phase: Phase::Ignore,
            write_enabled: false,
            reset_enabled: false,
            busy_polls: 0,
            events: Vec::new(),
        }
    }

    /// Create a flash with pre-filled data
    pub fn with_data(config: FlashConfig, initial: &[u8]) -> Result<Self> {
        let mut flash = Self::new(config);
        flash.load(initial)?;
        Ok(flash)
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the flash data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Get the configuration
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Everything the chip did since creation or the last [`clear_events`](Self::clear_events)
    pub fn events(&self) -> &[FlashEvent] {
        &self.events
    }

    /// Forget recorded events
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// True while a program or erase is running
    pub fn is_busy(&self) -> bool {
        self.busy_polls > 0
    }

    /// Overwrite the start of the array with `image`, erasing the rest
    pub fn load(&mut self, image: &[u8]) -> Result<()> {
        if image.len() > self.data.len() {
            return Err(SimError::ImageTooLarge {
                size: image.len(),
                capacity: self.data.len(),
            });
        }
        self.data.fill(ERASED);
        self.data[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Load the array from a host file
    pub fn load_image(&mut self, path: &Path) -> Result<()> {
        let image = std::fs::read(path)?;
        self.load(&image)
    }

    /// Save the array to a host file
    pub fn save_image(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.data)?;
        Ok(())
    }

    /// Chip select went active
    pub fn select(&mut self) {
        self.selected = true;
        self.phase = Phase::Instruction;
    }

    /// Chip select went inactive; latched program and erase commands run now
    pub fn deselect(&mut self) {
        if !self.selected {
            return;
        }
        self.selected = false;
        match std::mem::replace(&mut self.phase, Phase::Ignore) {
            Phase::Program { addr, latch } => self.commit_page(addr, &latch),
            Phase::Armed(Armed::SectorErase(addr)) => {
                let size = 64 * 1024;
                let start = (addr as usize % self.data.len()) & !(size - 1);
                let end = (start + size).min(self.data.len());
                self.data[start..end].fill(ERASED);
                self.finish_write(self.config.erase_busy_polls);
                self.events.push(FlashEvent::SectorErase { addr });
            }
            Phase::Armed(Armed::BulkErase) => {
                self.data.fill(ERASED);
                self.finish_write(self.config.erase_busy_polls);
                self.events.push(FlashEvent::BulkErase);
            }
            Phase::Armed(Armed::Reset) => {
                self.write_enabled = false;
                self.reset_enabled = false;
                self.busy_polls = 0;
                self.events.push(FlashEvent::Reset);
            }
            _ => {}
        }
    }

    /// One byte exchange while selected
    pub fn exchange(&mut self, byte: u8) -> u8 {
        if !self.selected {
            return 0xFF;
        }
        match &mut self.phase {
            Phase::Instruction => {
                self.instruction(byte);
                0xFF
            }
            Phase::Address { opcode, addr, left } => {
                *addr = (*addr << 8) | u32::from(byte);
                *left -= 1;
                if *left == 0 {
                    let (opcode, addr) = (*opcode, *addr);
                    self.address_complete(opcode, addr);
                }
                0xFF
            }
            Phase::Read { addr } => {
                let value = self.data[*addr as usize % self.data.len()];
                *addr = addr.wrapping_add(1);
                value
            }
            Phase::Program { latch, .. } => {
                latch.push(byte);
                0xFF
            }
            Phase::Status => {
                let status = self.status();
                self.busy_polls = self.busy_polls.saturating_sub(1);
                status.bits()
            }
            Phase::Id { index } => {
                let value = self.config.jedec_id.get(*index).copied().unwrap_or(0x00);
                *index += 1;
                value
            }
            Phase::Armed(_) | Phase::Ignore => 0xFF,
        }
    }

    fn status(&self) -> Status {
        let mut status = Status::empty();
        if self.busy_polls > 0 {
            status |= Status::WIP;
        }
        if self.write_enabled {
            status |= Status::WEL;
        }
        status
    }

    fn instruction(&mut self, opcode: u8) {
        if self.busy_polls > 0 && opcode != opcodes::RDSR {
            self.events.push(FlashEvent::IgnoredWhileBusy(opcode));
            self.phase = Phase::Ignore;
            return;
        }
        if opcode != opcodes::RST {
            self.reset_enabled = false;
        }

        self.phase = match opcode {
            opcodes::WREN => {
                self.write_enabled = true;
                self.events.push(FlashEvent::WriteEnable);
                Phase::Armed(Armed::Nothing)
            }
            opcodes::WRDI => {
                self.write_enabled = false;
                self.events.push(FlashEvent::WriteDisable);
                Phase::Armed(Armed::Nothing)
            }
            opcodes::RDSR => {
                self.events.push(FlashEvent::ReadStatus);
                Phase::Status
            }
            opcodes::RDID => {
                self.events.push(FlashEvent::ReadId);
                Phase::Id { index: 0 }
            }
            opcodes::READ => Phase::Address {
                opcode,
                addr: 0,
                left: 3,
            },
            opcodes::PP | opcodes::SE if self.write_enabled => Phase::Address {
                opcode,
                addr: 0,
                left: 3,
            },
            opcodes::BE if self.write_enabled => Phase::Armed(Armed::BulkErase),
            opcodes::RSTEN => {
                self.reset_enabled = true;
                Phase::Armed(Armed::Nothing)
            }
            opcodes::RST if self.reset_enabled => Phase::Armed(Armed::Reset),
            _ => {
                log::debug!("flash refused opcode 0x{:02X}", opcode);
                self.events.push(FlashEvent::Rejected(opcode));
                Phase::Ignore
            }
        };
    }

    fn address_complete(&mut self, opcode: u8, addr: u32) {
        self.phase = match opcode {
            opcodes::READ => {
                self.events.push(FlashEvent::Read { addr });
                Phase::Read { addr }
            }
            opcodes::PP => Phase::Program {
                addr,
                latch: Vec::new(),
            },
            opcodes::SE => Phase::Armed(Armed::SectorErase(addr)),
            _ => Phase::Ignore,
        };
    }

    /// Apply latched data: bits only go 1 -> 0, and the address wraps
    /// inside the page
    fn commit_page(&mut self, addr: u32, latch: &[u8]) {
        let page_size = self.config.page_size;
        let addr = addr as usize % self.data.len();
        let page_base = addr & !(page_size - 1);
        // Only the last page_size bytes survive an overlong stream
        let skip = latch.len().saturating_sub(page_size);
        for (i, &byte) in latch.iter().enumerate().skip(skip) {
            let offset = (addr - page_base + i) % page_size;
            self.data[page_base + offset] &= byte;
        }
        self.finish_write(self.config.program_busy_polls);
        self.events.push(FlashEvent::PageProgram {
            addr: addr as u32,
            len: latch.len(),
        });
    }

    fn finish_write(&mut self, busy_polls: u32) {
        self.write_enabled = false;
        self.busy_polls = busy_polls;
    }
}

impl Default for SimFlash {
    fn default() -> Self {
        Self::new(FlashConfig::default())
    }
}
