//! SD/MMC card driver (SPI mode)
//!
//! Brings a card from power-up into SPI mode, works out which protocol
//! family it speaks, and reads single 512-byte blocks with a byte window
//! inside the block. Every wait is bounded by a countdown in
//! [`Timers`](crate::timer::Timers).
//!
//! Negotiation follows the usual SPI-mode flow:
//!
//! 1. 200 idle bytes at the slow clock with the card deselected
//! 2. CMD0 until the card answers "idle" (one retry)
//! 3. CMD8 splits SDv2 from older cards
//! 4. ACMD41 / CMD1 until the card leaves the idle state
//! 5. For SDv2, CMD58 tells byte from block addressing

pub mod commands;

use core::fmt;

use crate::bus::{BusClock, Device, SharedBus, SpiPort, IDLE_BYTE};
use crate::error::{Error, Result};
use crate::file::BlockDevice;
use crate::timer::{Timers, TICK_FREQ};

use commands::*;

/// Idle bytes clocked before the first command
const POWER_UP_CLOCKS: usize = 200;
/// CMD0 attempts before giving up
const RESET_ATTEMPTS: usize = 2;
/// Ticks to wait for the card to release the bus after select
const SELECT_TIMEOUT: u16 = 2;
/// Ticks to wait for an R1 response
const RESPONSE_TIMEOUT: u16 = 2 * TICK_FREQ;
/// Ticks to wait for the card to finish initialization
const INIT_TIMEOUT: u16 = 2 * TICK_FREQ;
/// Ticks to wait for the data start token
const TOKEN_TIMEOUT: u16 = TICK_FREQ / 4;

/// Card protocol family, fixed once negotiation succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    /// MMC version 3
    Mmc,
    /// SD version 1.x
    Sd1,
    /// SD version 2, byte addressed (standard capacity)
    Sd2,
    /// SD version 2, block addressed (high capacity)
    Sd2Block,
}

impl CardType {
    /// True if read commands take a block index instead of a byte offset
    pub fn is_block_addressed(self) -> bool {
        matches!(self, Self::Sd2Block)
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mmc => write!(f, "MMCv3"),
            Self::Sd1 => write!(f, "SDv1"),
            Self::Sd2 => write!(f, "SDv2"),
            Self::Sd2Block => write!(f, "SDv2 (block addressed)"),
        }
    }
}

/// SD/MMC card on the shared bus
#[derive(Debug)]
pub struct SdCard<'t> {
    timers: &'t Timers,
    card_type: Option<CardType>,
}

impl<'t> SdCard<'t> {
    /// Create an unmounted card driver
    pub fn new(timers: &'t Timers) -> Self {
        Self {
            timers,
            card_type: None,
        }
    }

    /// Protocol family of the mounted card
    pub fn card_type(&self) -> Option<CardType> {
        self.card_type
    }

    /// True once [`initialize`](Self::initialize) has succeeded
    pub fn is_mounted(&self) -> bool {
        self.card_type.is_some()
    }

    /// Forget the negotiated card
    pub fn unmount(&mut self) {
        self.card_type = None;
    }

    /// Power up the card and negotiate its protocol family
    ///
    /// The card is deselected on return, whether negotiation succeeded or not.
    pub fn initialize<P: SpiPort>(&mut self, bus: &mut SharedBus<P>) -> Result<CardType> {
        self.card_type = None;
        if !bus.is_owned() {
            return Err(Error::BusNotOwned);
        }

        let result = self.negotiate(bus);
        if bus.selected() == Some(Device::Card) {
            bus.deselect();
        }

        match result {
            Ok(card_type) => {
                log::info!("{} card detected", card_type);
                self.card_type = Some(card_type);
            }
            Err(e) => log::warn!("card initialization failed: {}", e),
        }
        result
    }

    /// Read `buf.len()` bytes starting `offset` bytes into `block`
    ///
    /// The whole 512-byte block is always clocked through; bytes outside the
    /// window are discarded.
    pub fn read_block<P: SpiPort>(
        &self,
        bus: &mut SharedBus<P>,
        block: u32,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let card_type = self.card_type.ok_or(Error::CardNotMounted)?;
        if offset + buf.len() > BLOCK_SIZE {
            return Err(Error::AddressOutOfBounds);
        }
        let address = if card_type.is_block_addressed() {
            block
        } else {
            block
                .checked_mul(BLOCK_SIZE as u32)
                .ok_or(Error::AddressOutOfBounds)?
        };

        let result = self.receive_block(bus, address, offset, buf);
        if bus.selected() == Some(Device::Card) {
            bus.deselect();
        }
        result
    }

    /// Pair the card with the bus as a [`BlockDevice`] for the file layer
    pub fn io<'a, P: SpiPort>(&'a self, bus: &'a mut SharedBus<P>) -> CardIo<'a, 't, P> {
        CardIo { card: self, bus }
    }

    fn negotiate<P: SpiPort>(&self, bus: &mut SharedBus<P>) -> Result<CardType> {
        bus.set_clock(BusClock::Slow);
        if bus.selected().is_some() {
            bus.deselect();
        }
        bus.idle(POWER_UP_CLOCKS);
        bus.set_clock(BusClock::Fast);

        self.go_idle(bus)?;

        let r1 = self.send_command(bus, CMD8, IF_COND_ARG)?;
        if r1 == R1::IDLE.bits() {
            let mut echo = [0u8; 4];
            for byte in echo.iter_mut() {
                *byte = bus.transfer(IDLE_BYTE);
            }
            if echo[2..] != [0x01, 0xAA] {
                log::debug!("CMD8 echo {:02X?}", echo);
                return Err(Error::CardVoltageMismatch);
            }

            self.wait_initialized(bus, ACMD41, HCS_ARG)?;

            let r1 = self.send_command(bus, CMD58, 0)?;
            if r1 != 0 {
                return Err(Error::CardCommand {
                    cmd: CMD58,
                    response: r1,
                });
            }
            let mut ocr = [0u8; 4];
            for byte in ocr.iter_mut() {
                *byte = bus.transfer(IDLE_BYTE);
            }
            log::debug!("OCR {:02X?}", ocr);
            Ok(if ocr[0] & OCR_CCS != 0 {
                CardType::Sd2Block
            } else {
                CardType::Sd2
            })
        } else {
            let (cmd, card_type) = if self.send_command(bus, ACMD41, 0)? <= 1 {
                (ACMD41, CardType::Sd1)
            } else {
                (CMD1, CardType::Mmc)
            };
            self.wait_initialized(bus, cmd, 0)?;
            Ok(card_type)
        }
    }

    fn go_idle<P: SpiPort>(&self, bus: &mut SharedBus<P>) -> Result<()> {
        for attempt in 1..=RESET_ATTEMPTS {
            let r1 = self.send_command(bus, CMD0, 0)?;
            if r1 == R1::IDLE.bits() {
                return Ok(());
            }
            log::debug!("CMD0 attempt {} returned 0x{:02X}", attempt, r1);
        }
        Err(Error::CardNoResponse)
    }

    /// Repeat `cmd` until the card leaves the idle state
    fn wait_initialized<P: SpiPort>(
        &self,
        bus: &mut SharedBus<P>,
        cmd: u8,
        arg: u32,
    ) -> Result<()> {
        self.timers.card_init.start(INIT_TIMEOUT);
        loop {
            if self.send_command(bus, cmd, arg)? == 0 {
                return Ok(());
            }
            if self.timers.card_init.expired() {
                return Err(Error::CardInitTimeout);
            }
        }
    }

    fn receive_block<P: SpiPort>(
        &self,
        bus: &mut SharedBus<P>,
        address: u32,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let r1 = self.send_command(bus, CMD17, address)?;
        if r1 != 0 {
            log::warn!("CMD17({:X}) returned 0x{:02X}", address, r1);
            return Err(Error::CardCommand {
                cmd: CMD17,
                response: r1,
            });
        }

        self.timers.card_response.start(TOKEN_TIMEOUT);
        while bus.transfer(IDLE_BYTE) != TOKEN_START_BLOCK {
            if self.timers.card_response.expired() {
                return Err(Error::DataTokenTimeout);
            }
        }

        let mut window = buf.iter_mut();
        for i in 0..BLOCK_SIZE {
            let byte = bus.transfer(IDLE_BYTE);
            if i >= offset {
                if let Some(slot) = window.next() {
                    *slot = byte;
                }
            }
        }
        Ok(())
    }

    /// Frame and send one command, returning its R1 byte
    ///
    /// A response timeout is not an error here: the last byte seen (0xFF)
    /// is returned and the caller decides.
    fn send_command<P: SpiPort>(&self, bus: &mut SharedBus<P>, cmd: u8, arg: u32) -> Result<u8> {
        if cmd & ACMD_FLAG != 0 {
            let r1 = self.send_command(bus, CMD55, 0)?;
            if r1 > 1 {
                return Ok(r1);
            }
        }

        self.select(bus)?;
        for byte in command_frame(cmd, arg) {
            bus.transfer(byte);
        }

        self.timers.card_response.start(RESPONSE_TIMEOUT);
        let r1 = loop {
            let r1 = bus.transfer(IDLE_BYTE);
            if r1 & 0x80 == 0 || self.timers.card_response.expired() {
                break r1;
            }
        };
        log::trace!(
            "CMD{}({:08X}) -> {:?}",
            cmd & !ACMD_FLAG,
            arg,
            R1::from_bits_truncate(r1)
        );
        Ok(r1)
    }

    /// Select the card and wait for it to release MISO
    fn select<P: SpiPort>(&self, bus: &mut SharedBus<P>) -> Result<()> {
        bus.select(Device::Card)?;
        self.timers.card_select.start(SELECT_TIMEOUT);
        while bus.transfer(IDLE_BYTE) != IDLE_BYTE {
            if self.timers.card_select.expired() {
                bus.deselect();
                return Err(Error::CardBusy);
            }
        }
        Ok(())
    }
}

/// A mounted card bound to the bus for the duration of a file read
#[derive(Debug)]
pub struct CardIo<'a, 't, P> {
    card: &'a SdCard<'t>,
    bus: &'a mut SharedBus<P>,
}

impl<P: SpiPort> BlockDevice for CardIo<'_, '_, P> {
    fn read_block(&mut self, block: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.card.read_block(self.bus, block, offset, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::tests::RecordingPort;

    #[test]
    fn only_high_capacity_is_block_addressed() {
        assert!(CardType::Sd2Block.is_block_addressed());
        assert!(!CardType::Sd2.is_block_addressed());
        assert!(!CardType::Sd1.is_block_addressed());
        assert!(!CardType::Mmc.is_block_addressed());
    }

    #[test]
    fn read_requires_mounted_card() {
        let timers = Timers::new();
        let card = SdCard::new(&timers);
        let mut bus = SharedBus::new(RecordingPort::default());
        bus.acquire();
        let mut buf = [0u8; 4];
        assert_eq!(
            card.read_block(&mut bus, 0, 0, &mut buf),
            Err(Error::CardNotMounted)
        );
    }

    #[test]
    fn initialize_requires_bus() {
        let timers = Timers::new();
        let mut card = SdCard::new(&timers);
        let mut bus = SharedBus::new(RecordingPort::default());
        assert_eq!(card.initialize(&mut bus), Err(Error::BusNotOwned));
        assert!(bus.port().wire.is_empty());
    }

    #[test]
    fn window_past_block_end_is_rejected() {
        let timers = Timers::new();
        let mut card = SdCard::new(&timers);
        card.card_type = Some(CardType::Sd2);
        let mut bus = SharedBus::new(RecordingPort::default());
        bus.acquire();
        let mut buf = [0u8; 16];
        assert_eq!(
            card.read_block(&mut bus, 0, 500, &mut buf),
            Err(Error::AddressOutOfBounds)
        );
        assert_eq!(bus.port().sent(), []);
    }

    #[test]
    fn read_block_streams_whole_block() {
        let timers = Timers::new();
        let mut card = SdCard::new(&timers);
        card.card_type = Some(CardType::Sd2Block);

        // settle, release, six frame bytes, R1, token, then 0..=255 twice
        let mut replies = std::vec![0xFF; 8];
        replies.extend([0x00, TOKEN_START_BLOCK]);
        replies.extend((0..BLOCK_SIZE).map(|i| i as u8));
        let mut bus = SharedBus::new(RecordingPort::with_replies(&replies));
        bus.acquire();

        let mut buf = [0u8; 4];
        card.read_block(&mut bus, 7, 10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
        assert_eq!(bus.selected(), None);

        let sent = bus.port().sent();
        // settle + release-wait + 6 frame bytes + R1 + token + 512 data + release
        assert_eq!(sent.len(), 2 + 6 + 1 + 1 + BLOCK_SIZE + 1);
        assert_eq!(&sent[2..8], &command_frame(CMD17, 7));
    }
}
