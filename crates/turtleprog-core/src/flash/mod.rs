//! Configuration flash driver (M25P16 class)
//!
//! Programming is pipelined: the page commit that follows a page boundary
//! runs inside the chip while the caller fetches the next chunk, and the
//! ready-wait only happens when the next byte is about to go out. The cursor
//! state lives in a [`ProgramSession`], which borrows the driver mutably, so
//! only one program stream can exist at a time.
//!
//! Reads are not pipelined. A [`ReadSession`] keeps the chip selected for
//! its whole lifetime and holds the bus so nothing else can be selected in
//! the meantime.

pub mod opcodes;

use core::fmt;

use bitflags::bitflags;

use crate::bus::{Device, SharedBus, SpiPort, IDLE_BYTE};
use crate::error::{Error, Result};
use crate::timer::Timers;

/// Program page size in bytes
pub const PAGE_SIZE: usize = 256;

/// Value of an erased byte
pub const ERASED: u8 = 0xFF;

/// Turtle board hardware revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoardRevision {
    /// PCB 1.0, fitted with a 16 Mbit part
    #[default]
    V1_0,
    /// Later boards, fitted with a 32 Mbit part
    V2_0,
}

impl BoardRevision {
    /// Flash size in bytes
    pub fn flash_capacity(self) -> u32 {
        match self {
            Self::V1_0 => 0x20_0000,
            Self::V2_0 => 0x40_0000,
        }
    }
}

bitflags! {
    /// Status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Write in progress
        const WIP  = 1 << 0;
        /// Write enable latch
        const WEL  = 1 << 1;
        /// Block protect bit 0
        const BP0  = 1 << 2;
        /// Block protect bit 1
        const BP1  = 1 << 3;
        /// Block protect bit 2
        const BP2  = 1 << 4;
        /// Status register write disable
        const SRWD = 1 << 7;
    }
}

/// JEDEC identification as returned by RDID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JedecId {
    /// Manufacturer code
    pub manufacturer: u8,
    /// Memory type and capacity
    pub device: u16,
}

impl fmt::Display for JedecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:04X}", self.manufacturer, self.device)
    }
}

/// Serial flash on the shared bus
#[derive(Debug)]
pub struct SpiFlash<'t> {
    timers: &'t Timers,
    capacity: u32,
    ready_timeout: Option<u16>,
}

impl<'t> SpiFlash<'t> {
    /// Create a driver for the flash fitted to `revision`
    pub fn new(timers: &'t Timers, revision: BoardRevision) -> Self {
        Self {
            timers,
            capacity: revision.flash_capacity(),
            ready_timeout: None,
        }
    }

    /// Bound every ready-wait to `ticks` instead of waiting forever
    pub fn with_ready_timeout(mut self, ticks: Option<u16>) -> Self {
        self.ready_timeout = ticks;
        self
    }

    /// Flash size in bytes
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Read the status register
    pub fn read_status<P: SpiPort>(&self, bus: &mut SharedBus<P>) -> Result<Status> {
        bus.select(Device::Flash)?;
        bus.transfer(opcodes::RDSR);
        let status = bus.transfer(IDLE_BYTE);
        bus.deselect();
        Ok(Status::from_bits_retain(status))
    }

    /// Wait for the WIP bit to clear
    ///
    /// The chip streams its status register for as long as it stays selected
    /// after RDSR. Without a configured timeout this blocks until the chip is
    /// ready and never services the console.
    pub fn wait_ready<P: SpiPort>(&self, bus: &mut SharedBus<P>) -> Result<()> {
        bus.select(Device::Flash)?;
        bus.transfer(opcodes::RDSR);
        if let Some(ticks) = self.ready_timeout {
            self.timers.flash.start(ticks);
        }
        let result = loop {
            let status = Status::from_bits_retain(bus.transfer(IDLE_BYTE));
            if !status.contains(Status::WIP) {
                break Ok(());
            }
            if self.ready_timeout.is_some() && self.timers.flash.expired() {
                log::warn!("flash still busy after {:?} ticks", self.ready_timeout);
                break Err(Error::FlashTimeout);
            }
        };
        bus.deselect();
        result
    }

    /// Start programming at `addr`
    ///
    /// The chip is left selected with the page program header sent.
    pub fn program<'f, P: SpiPort>(
        &'f mut self,
        bus: &mut SharedBus<P>,
        addr: u32,
    ) -> Result<ProgramSession<'f, 't>> {
        if addr >= self.capacity {
            return Err(Error::AddressOutOfBounds);
        }
        self.open_page(bus, addr)?;
        Ok(ProgramSession {
            flash: self,
            addr,
            pending: false,
        })
    }

    /// Start reading at `addr`
    pub fn read<'b, P: SpiPort>(
        &self,
        bus: &'b mut SharedBus<P>,
        addr: u32,
    ) -> Result<ReadSession<'b, P>> {
        if addr >= self.capacity {
            return Err(Error::AddressOutOfBounds);
        }
        bus.select(Device::Flash)?;
        send_command(bus, opcodes::READ, addr);
        Ok(ReadSession { bus })
    }

    /// Erase the whole chip and wait for it to finish
    pub fn erase<P: SpiPort>(&mut self, bus: &mut SharedBus<P>) -> Result<()> {
        self.write_enable(bus)?;
        bus.select(Device::Flash)?;
        bus.transfer(opcodes::BE);
        bus.deselect();
        log::debug!("bulk erase started");
        self.wait_ready(bus)
    }

    /// Software reset, each opcode in its own selection
    pub fn reset<P: SpiPort>(&mut self, bus: &mut SharedBus<P>) -> Result<()> {
        for opcode in [opcodes::RSTEN, opcodes::RST] {
            bus.select(Device::Flash)?;
            bus.transfer(opcode);
            bus.deselect();
        }
        self.wait_ready(bus)
    }

    /// Read the JEDEC manufacturer and device ID
    pub fn read_id<P: SpiPort>(&self, bus: &mut SharedBus<P>) -> Result<JedecId> {
        bus.select(Device::Flash)?;
        bus.transfer(opcodes::RDID);
        let manufacturer = bus.transfer(IDLE_BYTE);
        let device = u16::from_be_bytes([bus.transfer(IDLE_BYTE), bus.transfer(IDLE_BYTE)]);
        bus.deselect();
        Ok(JedecId {
            manufacturer,
            device,
        })
    }

    fn write_enable<P: SpiPort>(&self, bus: &mut SharedBus<P>) -> Result<()> {
        bus.select(Device::Flash)?;
        bus.transfer(opcodes::WREN);
        bus.deselect();
        Ok(())
    }

    fn open_page<P: SpiPort>(&self, bus: &mut SharedBus<P>, addr: u32) -> Result<()> {
        self.write_enable(bus)?;
        bus.select(Device::Flash)?;
        send_command(bus, opcodes::PP, addr);
        log::trace!("page program at {:06X}", addr);
        Ok(())
    }
}

fn send_command<P: SpiPort>(bus: &mut SharedBus<P>, opcode: u8, addr: u32) {
    bus.transfer(opcode);
    bus.transfer((addr >> 16) as u8);
    bus.transfer((addr >> 8) as u8);
    bus.transfer(addr as u8);
}

/// An open page program stream
///
/// Every byte crossing into a new page commits the previous one by
/// deselecting the chip. The next page is only opened when another byte
/// arrives, after waiting for the commit.
#[derive(Debug)]
#[must_use = "a program stream must be finished to commit the last page"]
pub struct ProgramSession<'f, 't> {
    flash: &'f mut SpiFlash<'t>,
    addr: u32,
    pending: bool,
}

impl ProgramSession<'_, '_> {
    /// Address the next byte goes to
    pub fn address(&self) -> u32 {
        self.addr
    }

    /// True while a committed page is waiting for the next one to open
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Program one byte
    pub fn write<P: SpiPort>(&mut self, bus: &mut SharedBus<P>, byte: u8) -> Result<()> {
        if self.addr >= self.flash.capacity {
            return Err(Error::AddressOutOfBounds);
        }
        if self.pending {
            self.flash.wait_ready(bus)?;
            self.pending = false;
            self.flash.open_page(bus, self.addr)?;
        } else if bus.selected() != Some(Device::Flash) {
            return Err(Error::BusContention);
        }

        bus.transfer(byte);
        self.addr += 1;
        if self.addr & 0xFF == 0 {
            bus.deselect();
            self.pending = true;
        }
        Ok(())
    }

    /// Program a run of bytes
    pub fn write_all<P: SpiPort>(&mut self, bus: &mut SharedBus<P>, data: &[u8]) -> Result<()> {
        data.iter().try_for_each(|&byte| self.write(bus, byte))
    }

    /// Commit the current page and wait for the chip
    ///
    /// A pending continuation is dropped rather than opened, so no empty
    /// page program goes out.
    pub fn finish<P: SpiPort>(self, bus: &mut SharedBus<P>) -> Result<()> {
        if !self.pending {
            bus.deselect();
        }
        self.flash.wait_ready(bus)
    }
}

/// An open sequential read
///
/// Deselects the chip when dropped.
#[derive(Debug)]
pub struct ReadSession<'b, P: SpiPort> {
    bus: &'b mut SharedBus<P>,
}

impl<P: SpiPort> ReadSession<'_, P> {
    /// Clock out the next byte
    pub fn read_byte(&mut self) -> u8 {
        self.bus.transfer(IDLE_BYTE)
    }

    /// Fill `buf` with the next bytes
    pub fn read_into(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte = self.bus.transfer(IDLE_BYTE);
        }
    }

    /// Clock one trailing byte and end the read
    pub fn finish(mut self) {
        self.read_byte();
    }
}

impl<P: SpiPort> Drop for ReadSession<'_, P> {
    fn drop(&mut self) {
        if self.bus.selected() == Some(Device::Flash) {
            self.bus.deselect();
        }
    }
}
