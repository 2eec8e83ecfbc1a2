//! Shared SPI bus
//!
//! The SD card and the configuration flash share one SPI bus, each with its
//! own chip select. The platform provides the raw byte exchange through
//! [`SpiPort`]; [`SharedBus`] layers the bus session rules on top:
//!
//! - at most one device is selected at any time
//! - selecting the card clocks one settle byte after chip select goes
//!   active; the flash takes its instruction on the first clocked byte
//! - deselecting clocks one release byte after chip select goes inactive, so
//!   the card lets go of MISO before anything else drives the bus
//!
//! Re-selecting the device that is already selected deselects it first, which
//! is what the SD protocol requires between two commands.

use crate::error::{Error, Result};

/// Byte clocked out when the caller only wants to receive
pub const IDLE_BYTE: u8 = 0xFF;

/// Peripherals sharing the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// SD/MMC card slot
    Card,
    /// Serial NOR flash holding the FPGA configuration
    Flash,
}

impl Device {
    /// True if a settle byte is clocked right after selecting this device
    pub fn settles_on_select(self) -> bool {
        matches!(self, Self::Card)
    }
}

/// SPI clock rates used on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusClock {
    /// Below 400 kHz, required while a card powers up
    Slow,
    /// Full speed
    Fast,
}

/// Trait for the platform's SPI peripheral
///
/// One synchronous full-duplex byte exchange and the chip select lines are
/// all the core needs. Exchanges cannot fail; a peer that never answers is
/// bounded by the caller's countdown timers.
pub trait SpiPort {
    /// Clock one byte out and return the byte clocked in
    fn exchange(&mut self, byte: u8) -> u8;

    /// Drive a device's chip select (active low, so `active=true` means CS=0)
    fn set_cs(&mut self, device: Device, active: bool);

    /// Switch the SPI clock rate
    fn set_clock(&mut self, clock: BusClock);

    /// Optional: Take the bus away from the run-mode owner (the FPGA)
    fn request_bus(&mut self) {}

    /// Optional: Hand the bus back to the run-mode owner
    fn release_bus(&mut self) {}
}

/// Bus session tracker over an [`SpiPort`]
#[derive(Debug)]
pub struct SharedBus<P> {
    port: P,
    selected: Option<Device>,
    owned: bool,
}

impl<P: SpiPort> SharedBus<P> {
    /// Wrap a port; the bus starts released with nothing selected
    pub fn new(port: P) -> Self {
        Self {
            port,
            selected: None,
            owned: false,
        }
    }

    /// Borrow the underlying port
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the underlying port
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Unwrap the underlying port
    pub fn into_inner(self) -> P {
        self.port
    }

    /// The currently selected device, if any
    pub fn selected(&self) -> Option<Device> {
        self.selected
    }

    /// True while the bus is claimed for programming
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Claim the bus from the run-mode owner
    pub fn acquire(&mut self) {
        if !self.owned {
            self.port.request_bus();
            self.owned = true;
            log::trace!("bus acquired");
        }
    }

    /// Deselect whatever is selected and hand the bus back
    pub fn release(&mut self) {
        if self.selected.is_some() {
            self.deselect();
        }
        if self.owned {
            self.port.release_bus();
            self.owned = false;
            log::trace!("bus released");
        }
    }

    /// Start a session on `device`
    pub fn select(&mut self, device: Device) -> Result<()> {
        if !self.owned {
            return Err(Error::BusNotOwned);
        }
        match self.selected {
            Some(current) if current != device => return Err(Error::BusContention),
            Some(_) => self.deselect(),
            None => {}
        }
        self.port.set_cs(device, true);
        self.selected = Some(device);
        if device.settles_on_select() {
            self.port.exchange(IDLE_BYTE);
        }
        Ok(())
    }

    /// End the current session
    ///
    /// The release byte is clocked even when nothing was selected.
    pub fn deselect(&mut self) {
        if let Some(device) = self.selected.take() {
            self.port.set_cs(device, false);
        }
        self.port.exchange(IDLE_BYTE);
    }

    /// Exchange one byte with the selected device
    pub fn transfer(&mut self, byte: u8) -> u8 {
        self.port.exchange(byte)
    }

    /// Clock `count` idle bytes
    pub fn idle(&mut self, count: usize) {
        for _ in 0..count {
            self.port.exchange(IDLE_BYTE);
        }
    }

    /// Switch the bus clock rate
    pub fn set_clock(&mut self, clock: BusClock) {
        self.port.set_clock(clock);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::vec::Vec;

    /// Port event as seen on the wire
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Wire {
        Cs(Device, bool),
        Byte(u8),
        Clock(BusClock),
        Request,
        Release,
    }

    /// Records traffic and answers exchanges from a fixed script, then 0x00
    #[derive(Debug, Default)]
    pub struct RecordingPort {
        pub wire: Vec<Wire>,
        pub replies: Vec<u8>,
    }

    impl RecordingPort {
        pub fn with_replies(replies: &[u8]) -> Self {
            Self {
                wire: Vec::new(),
                replies: replies.iter().rev().copied().collect(),
            }
        }

        pub fn sent(&self) -> Vec<u8> {
            self.wire
                .iter()
                .filter_map(|w| match w {
                    Wire::Byte(b) => Some(*b),
                    _ => None,
                })
                .collect()
        }

        /// Bytes exchanged during each selection of `device`
        pub fn sessions(&self, device: Device) -> Vec<Vec<u8>> {
            let mut sessions = Vec::new();
            let mut current: Option<Vec<u8>> = None;
            for w in &self.wire {
                match *w {
                    Wire::Cs(d, true) if d == device => current = Some(Vec::new()),
                    Wire::Cs(d, false) if d == device => sessions.extend(current.take()),
                    Wire::Byte(b) => {
                        if let Some(bytes) = current.as_mut() {
                            bytes.push(b);
                        }
                    }
                    _ => {}
                }
            }
            sessions
        }
    }

    impl SpiPort for RecordingPort {
        fn exchange(&mut self, byte: u8) -> u8 {
            self.wire.push(Wire::Byte(byte));
            self.replies.pop().unwrap_or(0x00)
        }

        fn set_cs(&mut self, device: Device, active: bool) {
            self.wire.push(Wire::Cs(device, active));
        }

        fn set_clock(&mut self, clock: BusClock) {
            self.wire.push(Wire::Clock(clock));
        }

        fn request_bus(&mut self) {
            self.wire.push(Wire::Request);
        }

        fn release_bus(&mut self) {
            self.wire.push(Wire::Release);
        }
    }

    #[test]
    fn select_requires_ownership() {
        let mut bus = SharedBus::new(RecordingPort::default());
        assert_eq!(bus.select(Device::Flash), Err(Error::BusNotOwned));
        assert!(bus.port().wire.is_empty());
    }

    #[test]
    fn card_select_and_deselect_clock_idle_bytes() {
        let mut bus = SharedBus::new(RecordingPort::default());
        bus.acquire();
        bus.select(Device::Card).unwrap();
        bus.transfer(0x40);
        bus.deselect();
        assert_eq!(
            bus.port().wire,
            [
                Wire::Request,
                Wire::Cs(Device::Card, true),
                Wire::Byte(IDLE_BYTE),
                Wire::Byte(0x40),
                Wire::Cs(Device::Card, false),
                Wire::Byte(IDLE_BYTE),
            ]
        );
    }

    #[test]
    fn flash_instruction_is_first_byte_after_select() {
        let mut bus = SharedBus::new(RecordingPort::default());
        bus.acquire();
        bus.select(Device::Flash).unwrap();
        bus.transfer(0x05);
        bus.deselect();
        assert_eq!(
            bus.port().wire,
            [
                Wire::Request,
                Wire::Cs(Device::Flash, true),
                Wire::Byte(0x05),
                Wire::Cs(Device::Flash, false),
                Wire::Byte(IDLE_BYTE),
            ]
        );
    }

    #[test]
    fn second_device_is_refused_while_selected() {
        let mut bus = SharedBus::new(RecordingPort::default());
        bus.acquire();
        bus.select(Device::Card).unwrap();
        assert_eq!(bus.select(Device::Flash), Err(Error::BusContention));
        assert_eq!(bus.selected(), Some(Device::Card));
        bus.deselect();
        bus.select(Device::Flash).unwrap();
    }

    #[test]
    fn reselect_deselects_first() {
        let mut bus = SharedBus::new(RecordingPort::default());
        bus.acquire();
        bus.select(Device::Card).unwrap();
        bus.select(Device::Card).unwrap();
        let cs: Vec<_> = bus
            .port()
            .wire
            .iter()
            .filter(|w| matches!(w, Wire::Cs(..)))
            .copied()
            .collect();
        assert_eq!(
            cs,
            [
                Wire::Cs(Device::Card, true),
                Wire::Cs(Device::Card, false),
                Wire::Cs(Device::Card, true),
            ]
        );
    }

    #[test]
    fn release_deselects_and_hands_back() {
        let mut bus = SharedBus::new(RecordingPort::default());
        bus.acquire();
        bus.select(Device::Flash).unwrap();
        bus.release();
        assert_eq!(bus.selected(), None);
        assert!(!bus.is_owned());
        assert_eq!(bus.port().wire.last(), Some(&Wire::Release));
    }
}
