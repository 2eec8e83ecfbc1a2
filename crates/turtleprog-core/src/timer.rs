//! Countdown timers driven by the 100 ms tick
//!
//! The platform calls [`Timers::tick`] from its periodic interrupt. The main
//! path only starts a countdown and checks whether it has run out; it never
//! decrements. Each counter is a single atomic so neither side needs a lock.

use core::sync::atomic::{AtomicU16, Ordering};

/// Tick interrupts per second
pub const TICK_FREQ: u16 = 10;

/// A countdown measured in ticks
#[derive(Debug)]
pub struct Countdown(AtomicU16);

impl Countdown {
    /// Create an expired countdown
    pub const fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// (Re)start the countdown
    pub fn start(&self, ticks: u16) {
        self.0.store(ticks, Ordering::Relaxed);
    }

    /// Ticks left before expiry
    pub fn remaining(&self) -> u16 {
        self.0.load(Ordering::Relaxed)
    }

    /// True once the countdown reached zero
    pub fn expired(&self) -> bool {
        self.remaining() == 0
    }

    fn tick(&self) {
        // Saturates at zero. A restart racing the tick is decremented once.
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new()
    }
}

/// The countdowns shared between the tick interrupt and the main path
#[derive(Debug, Default)]
pub struct Timers {
    /// Operator-facing delays (mode change, bootloader countdown)
    pub delay: Countdown,
    /// Card release after chip select
    pub card_select: Countdown,
    /// Card command response and data token polling
    pub card_response: Countdown,
    /// Card power-up initialization loop
    pub card_init: Countdown,
    /// Optional bound on flash ready polling
    pub flash: Countdown,
}

impl Timers {
    /// Create a set of expired timers
    pub const fn new() -> Self {
        Self {
            delay: Countdown::new(),
            card_select: Countdown::new(),
            card_response: Countdown::new(),
            card_init: Countdown::new(),
            flash: Countdown::new(),
        }
    }

    /// Advance every running countdown by one tick
    ///
    /// Call this from the 100 ms timer interrupt.
    pub fn tick(&self) {
        self.delay.tick();
        self.card_select.tick();
        self.card_response.tick();
        self.card_init.tick();
        self.flash.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_expires_after_ticks() {
        let timers = Timers::new();
        timers.card_init.start(3);
        assert!(!timers.card_init.expired());
        timers.tick();
        timers.tick();
        assert_eq!(timers.card_init.remaining(), 1);
        timers.tick();
        assert!(timers.card_init.expired());
    }

    #[test]
    fn tick_saturates_at_zero() {
        let timers = Timers::new();
        timers.tick();
        assert_eq!(timers.delay.remaining(), 0);
    }

    #[test]
    fn countdowns_are_independent() {
        let timers = Timers::new();
        timers.delay.start(TICK_FREQ);
        timers.card_select.start(2);
        timers.tick();
        timers.tick();
        assert!(timers.card_select.expired());
        assert_eq!(timers.delay.remaining(), TICK_FREQ - 2);
    }

    #[test]
    fn restart_after_expiry_is_ticked_once() {
        let timers = Timers::new();
        timers.card_init.start(1);
        timers.tick();
        timers.tick();
        assert_eq!(timers.card_init.remaining(), 0);
        timers.card_init.start(5);
        timers.tick();
        assert_eq!(timers.card_init.remaining(), 4);
    }
}
