//! SPI-mode SD/MMC card emulator
//!
//! Models the parts of the card protocol the programmer relies on: the
//! power-up clock requirement, command framing with checksums on CMD0 and
//! CMD8, the per-family answers to the card-type queries, the
//! initialization busy period, and single block reads with a token delay.

use std::collections::VecDeque;

use turtleprog_core::sdcard::commands::*;
use turtleprog_core::sdcard::CardType;

/// Slow-clock idle bytes (8 clocks each) needed before the card accepts CMD0
const POWER_UP_BYTES: usize = 10;

/// Emulated card behaviour
#[derive(Debug, Clone)]
pub struct CardConfig {
    /// Protocol family
    pub card_type: CardType,
    /// Initialization polls answered with "idle" before the card is ready
    pub init_busy_polls: u32,
    /// Bytes of 0xFF before the data start token
    pub token_delay: usize,
}

impl CardConfig {
    /// Defaults for a card of `card_type`
    pub fn new(card_type: CardType) -> Self {
        Self {
            card_type,
            init_busy_polls: 3,
            token_delay: 2,
        }
    }
}

/// Emulated SD/MMC card in SPI mode
#[derive(Debug)]
pub struct SimCard {
    config: Option<CardConfig>,
    image: Vec<u8>,
    selected: bool,
    power_up_bytes: usize,
    in_spi_mode: bool,
    initialized: bool,
    app_command: bool,
    init_polls_left: u32,
    frame: Vec<u8>,
    response: VecDeque<u8>,
    commands: Vec<(u8, u32)>,
}

impl SimCard {
    /// Insert a card holding `image` (padded to whole blocks)
    pub fn new(config: CardConfig, mut image: Vec<u8>) -> Self {
        let padded = image.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        image.resize(padded, 0);
        let init_polls_left = config.init_busy_polls;
        Self {
            config: Some(config),
            image,
            selected: false,
            power_up_bytes: 0,
            in_spi_mode: false,
            initialized: false,
            app_command: false,
            init_polls_left,
            frame: Vec::new(),
            response: VecDeque::new(),
            commands: Vec::new(),
        }
    }

    /// An empty slot: MISO stays high whatever is sent
    pub fn absent() -> Self {
        let mut card = Self::new(CardConfig::new(CardType::Sd2), Vec::new());
        card.config = None;
        card
    }

    /// Card family, or `None` for an empty slot
    pub fn card_type(&self) -> Option<CardType> {
        self.config.as_ref().map(|c| c.card_type)
    }

    /// Card contents
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Commands received, application commands tagged with [`ACMD_FLAG`]
    pub fn commands(&self) -> &[(u8, u32)] {
        &self.commands
    }

    /// True once the card has left the idle state
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// A byte clocked while the card is deselected
    pub fn clock_deselected(&mut self, slow_clock: bool) {
        if slow_clock && !self.in_spi_mode {
            self.power_up_bytes += 1;
        }
    }

    /// Chip select went active
    pub fn select(&mut self) {
        self.selected = true;
        self.frame.clear();
    }

    /// Chip select went inactive
    pub fn deselect(&mut self) {
        self.selected = false;
        self.frame.clear();
        self.response.clear();
    }

    /// One byte exchange while selected
    pub fn exchange(&mut self, byte: u8) -> u8 {
        if !self.selected || self.config.is_none() {
            return 0xFF;
        }
        if let Some(out) = self.response.pop_front() {
            return out;
        }
        if self.frame.is_empty() && byte & 0xC0 != START_BITS {
            return 0xFF;
        }
        self.frame.push(byte);
        if self.frame.len() == 6 {
            let frame = std::mem::take(&mut self.frame);
            self.command(&frame);
        }
        0xFF
    }

    fn idle_bit(&self) -> u8 {
        if self.initialized {
            0
        } else {
            R1::IDLE.bits()
        }
    }

    fn command(&mut self, frame: &[u8]) {
        let Some(card_type) = self.card_type() else {
            return;
        };
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let crc = frame[5];

        if index == CMD0 {
            if self.power_up_bytes < POWER_UP_BYTES && !self.in_spi_mode {
                log::debug!("card: CMD0 before power-up clocks, ignored");
                return;
            }
            self.in_spi_mode = true;
        }
        if !self.in_spi_mode {
            return;
        }

        let app = std::mem::take(&mut self.app_command);
        self.commands
            .push((if app { ACMD_FLAG | index } else { index }, arg));

        let illegal = R1::ILLEGAL_COMMAND.bits() | self.idle_bit();
        let r1 = match index {
            CMD0 if crc != CMD0_CRC => R1::CRC_ERROR.bits() | R1::IDLE.bits(),
            CMD0 => {
                self.initialized = false;
                self.init_polls_left = self.config.as_ref().map_or(0, |c| c.init_busy_polls);
                R1::IDLE.bits()
            }
            CMD8 if !matches!(card_type, CardType::Sd2 | CardType::Sd2Block) => illegal,
            CMD8 if crc != CMD8_CRC => R1::CRC_ERROR.bits() | self.idle_bit(),
            CMD8 => {
                let r1 = self.idle_bit();
                self.respond(&[r1, 0x00, 0x00, ((arg >> 8) & 0x0F) as u8, arg as u8]);
                return;
            }
            CMD55 if card_type == CardType::Mmc => illegal,
            CMD55 => {
                self.app_command = true;
                self.idle_bit()
            }
            41 if app => {
                let needs_hcs = card_type == CardType::Sd2Block;
                if needs_hcs && arg & HCS_ARG == 0 {
                    R1::IDLE.bits()
                } else {
                    self.init_poll()
                }
            }
            CMD1 => self.init_poll(),
            CMD58 => {
                let mut ocr0 = 0x00;
                if self.initialized {
                    ocr0 |= 0x80;
                    if card_type == CardType::Sd2Block {
                        ocr0 |= OCR_CCS;
                    }
                }
                let r1 = self.idle_bit();
                self.respond(&[r1, ocr0, 0xFF, 0x80, 0x00]);
                return;
            }
            CMD16 => self.idle_bit(),
            CMD17 if !self.initialized => illegal,
            CMD17 => {
                self.read_block(card_type, arg);
                return;
            }
            _ => illegal,
        };
        self.respond(&[r1]);
    }

    fn init_poll(&mut self) -> u8 {
        if self.initialized {
            return 0;
        }
        if self.init_polls_left > 0 {
            self.init_polls_left -= 1;
            return R1::IDLE.bits();
        }
        self.initialized = true;
        0
    }

    fn read_block(&mut self, card_type: CardType, arg: u32) {
        let offset = if card_type.is_block_addressed() {
            arg as usize * BLOCK_SIZE
        } else if arg as usize % BLOCK_SIZE != 0 {
            self.respond(&[R1::ADDRESS_ERROR.bits()]);
            return;
        } else {
            arg as usize
        };
        if offset + BLOCK_SIZE > self.image.len() {
            self.respond(&[R1::PARAMETER_ERROR.bits()]);
            return;
        }

        let token_delay = self.config.as_ref().map_or(0, |c| c.token_delay);
        let mut out = vec![0x00];
        out.extend(std::iter::repeat(0xFF).take(token_delay));
        out.push(TOKEN_START_BLOCK);
        out.extend_from_slice(&self.image[offset..offset + BLOCK_SIZE]);
        out.extend([0xFF, 0xFF]);
        self.respond(&out);
    }

    /// Queue a response after the one-byte command turnaround
    fn respond(&mut self, bytes: &[u8]) {
        self.response.push_back(0xFF);
        self.response.extend(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power_up(card: &mut SimCard) {
        for _ in 0..POWER_UP_BYTES {
            card.clock_deselected(true);
        }
    }

    fn send(card: &mut SimCard, cmd: u8, arg: u32, reply_len: usize) -> Vec<u8> {
        card.deselect();
        card.select();
        for b in command_frame(cmd, arg) {
            card.exchange(b);
        }
        // skip the turnaround byte
        card.exchange(0xFF);
        (0..reply_len).map(|_| card.exchange(0xFF)).collect()
    }

    #[test]
    fn cmd0_needs_power_up_clocks() {
        let mut card = SimCard::new(CardConfig::new(CardType::Sd2), Vec::new());
        assert_eq!(send(&mut card, CMD0, 0, 1), [0xFF]);
        power_up(&mut card);
        assert_eq!(send(&mut card, CMD0, 0, 1), [0x01]);
    }

    #[test]
    fn cmd8_echoes_pattern_on_sdv2() {
        let mut card = SimCard::new(CardConfig::new(CardType::Sd2), Vec::new());
        power_up(&mut card);
        send(&mut card, CMD0, 0, 1);
        assert_eq!(
            send(&mut card, CMD8, IF_COND_ARG, 5),
            [0x01, 0x00, 0x00, 0x01, 0xAA]
        );
    }

    #[test]
    fn mmc_rejects_app_commands() {
        let mut card = SimCard::new(CardConfig::new(CardType::Mmc), Vec::new());
        power_up(&mut card);
        send(&mut card, CMD0, 0, 1);
        assert_eq!(send(&mut card, CMD8, IF_COND_ARG, 1), [0x05]);
        assert_eq!(send(&mut card, CMD55, 0, 1), [0x05]);
    }

    #[test]
    fn initialization_takes_busy_polls() {
        let mut config = CardConfig::new(CardType::Mmc);
        config.init_busy_polls = 2;
        let mut card = SimCard::new(config, Vec::new());
        power_up(&mut card);
        send(&mut card, CMD0, 0, 1);
        assert_eq!(send(&mut card, CMD1, 0, 1), [0x01]);
        assert_eq!(send(&mut card, CMD1, 0, 1), [0x01]);
        assert_eq!(send(&mut card, CMD1, 0, 1), [0x00]);
        assert!(card.is_initialized());
    }

    #[test]
    fn block_read_has_token_and_data() {
        let mut image = vec![0u8; 1024];
        image[512] = 0xAB;
        let mut card = SimCard::new(CardConfig::new(CardType::Mmc), image);
        power_up(&mut card);
        send(&mut card, CMD0, 0, 1);
        while send(&mut card, CMD1, 0, 1) != [0x00] {}
        let reply = send(&mut card, CMD17, 512, 1 + 2 + 1 + 1);
        assert_eq!(reply, [0x00, 0xFF, 0xFF, TOKEN_START_BLOCK, 0xAB]);
    }

    #[test]
    fn absent_card_never_answers() {
        let mut card = SimCard::absent();
        power_up(&mut card);
        assert_eq!(send(&mut card, CMD0, 0, 4), [0xFF; 4]);
    }
}
