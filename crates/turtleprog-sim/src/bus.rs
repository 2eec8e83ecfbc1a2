//! Emulated board SPI bus
//!
//! Routes each byte to whichever device has its chip select active. With
//! both selects active the outputs fight and the bus reads the AND of the
//! two (open-drain style); the contention is counted so tests can assert
//! it never happens.

use turtleprog_core::bus::{BusClock, Device, SpiPort};
use turtleprog_core::timer::Timers;

use crate::card::SimCard;
use crate::flash::SimFlash;

/// Board bus wiring the programmer's SPI master to a card and a flash
#[derive(Debug)]
pub struct SimBus<'t> {
    card: SimCard,
    flash: SimFlash,
    card_cs: bool,
    flash_cs: bool,
    clock: BusClock,
    owned: bool,
    contention: usize,
    exchanged: usize,
    timers: Option<(&'t Timers, usize)>,
}

impl<'t> SimBus<'t> {
    /// Wire up a card slot and a flash
    pub fn new(card: SimCard, flash: SimFlash) -> Self {
        Self {
            card,
            flash,
            card_cs: false,
            flash_cs: false,
            clock: BusClock::Slow,
            owned: false,
            contention: 0,
            exchanged: 0,
            timers: None,
        }
    }

    /// Advance `timers` by one tick every `bytes_per_tick` exchanges
    ///
    /// Stands in for the board's periodic tick interrupt so bounded waits
    /// terminate when the emulated device never answers.
    pub fn with_timers(mut self, timers: &'t Timers, bytes_per_tick: usize) -> Self {
        self.timers = Some((timers, bytes_per_tick.max(1)));
        self
    }

    /// The card slot
    pub fn card(&self) -> &SimCard {
        &self.card
    }

    /// Mutable access to the card slot
    pub fn card_mut(&mut self) -> &mut SimCard {
        &mut self.card
    }

    /// The flash chip
    pub fn flash(&self) -> &SimFlash {
        &self.flash
    }

    /// Mutable access to the flash chip
    pub fn flash_mut(&mut self) -> &mut SimFlash {
        &mut self.flash
    }

    /// Bytes exchanged with both selects active
    pub fn contention(&self) -> usize {
        self.contention
    }

    /// Total bytes exchanged
    pub fn exchanged(&self) -> usize {
        self.exchanged
    }

    /// Current bus clock
    pub fn clock(&self) -> BusClock {
        self.clock
    }

    /// True while the programmer holds the bus
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Take the card and flash back out
    pub fn into_parts(self) -> (SimCard, SimFlash) {
        (self.card, self.flash)
    }
}

impl SpiPort for SimBus<'_> {
    fn exchange(&mut self, byte: u8) -> u8 {
        self.exchanged += 1;
        if let Some((timers, every)) = self.timers {
            if self.exchanged % every == 0 {
                timers.tick();
            }
        }

        let mut miso = 0xFF;
        if self.card_cs {
            miso &= self.card.exchange(byte);
        } else {
            self.card.clock_deselected(self.clock == BusClock::Slow);
        }
        if self.flash_cs {
            miso &= self.flash.exchange(byte);
        }
        if self.card_cs && self.flash_cs {
            self.contention += 1;
            log::warn!("bus contention: both chip selects active");
        }
        miso
    }

    fn set_cs(&mut self, device: Device, active: bool) {
        match (device, active) {
            (Device::Card, true) if !self.card_cs => self.card.select(),
            (Device::Card, false) if self.card_cs => self.card.deselect(),
            (Device::Flash, true) if !self.flash_cs => self.flash.select(),
            (Device::Flash, false) if self.flash_cs => self.flash.deselect(),
            _ => {}
        }
        match device {
            Device::Card => self.card_cs = active,
            Device::Flash => self.flash_cs = active,
        }
    }

    fn set_clock(&mut self, clock: BusClock) {
        self.clock = clock;
    }

    fn request_bus(&mut self) {
        log::trace!("bus: programmer takes the bus");
        self.owned = true;
    }

    fn release_bus(&mut self) {
        log::trace!("bus: programmer releases the bus");
        self.owned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardConfig;
    use crate::flash::FlashConfig;
    use turtleprog_core::sdcard::CardType;

    fn bus() -> SimBus<'static> {
        SimBus::new(
            SimCard::new(CardConfig::new(CardType::Sd2), Vec::new()),
            SimFlash::new(FlashConfig::default()),
        )
    }

    #[test]
    fn routes_to_selected_flash() {
        let mut bus = bus();
        bus.set_cs(Device::Flash, true);
        bus.exchange(0x9F);
        assert_eq!(bus.exchange(0xFF), 0x20);
        bus.set_cs(Device::Flash, false);
        assert_eq!(bus.contention(), 0);
        assert_eq!(bus.exchanged(), 2);
    }

    #[test]
    fn both_selects_count_as_contention() {
        let mut bus = bus();
        bus.set_cs(Device::Flash, true);
        bus.set_cs(Device::Card, true);
        bus.exchange(0xFF);
        assert_eq!(bus.contention(), 1);
    }

    #[test]
    fn ticks_timers_while_clocking() {
        let timers = Timers::new();
        let mut bus = bus().with_timers(&timers, 4);
        timers.flash.start(2);
        for _ in 0..8 {
            bus.exchange(0xFF);
        }
        assert!(timers.flash.expired());
    }

    #[test]
    fn ownership_follows_requests() {
        let mut bus = bus();
        bus.request_bus();
        assert!(bus.is_owned());
        bus.release_bus();
        assert!(!bus.is_owned());
    }
}
