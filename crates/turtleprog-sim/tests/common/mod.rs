#![allow(dead_code)]

use turtleprog_core::console::Transport;
use turtleprog_core::bus::SharedBus;
use turtleprog_core::sdcard::CardType;
use turtleprog_core::timer::Timers;
use turtleprog_core::{Config, Event, Programmer};
use turtleprog_sim::{build_card, ExtentFs, FlashConfig, ScriptTransport, SimBus, SimCard, SimFlash};

/// Bus exchanges per emulated 100 ms tick
pub const BYTES_PER_TICK: usize = 64;

pub type SimProgrammer<'t> = Programmer<'t, SimBus<'t>, ExtentFs, ScriptTransport<'t>>;

/// A bitstream-like test pattern
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + (i >> 8)) as u8).collect()
}

/// Claimed bus with `card` and an erased flash
pub fn bus(timers: &Timers, card: SimCard) -> SharedBus<SimBus<'_>> {
    let port = SimBus::new(card, SimFlash::new(FlashConfig::default()))
        .with_timers(timers, BYTES_PER_TICK);
    let mut bus = SharedBus::new(port);
    bus.acquire();
    bus
}

/// Programmer with `/fpga.bin` holding `image` on a card of `card_type`
pub fn programmer<'t>(
    timers: &'t Timers,
    card_type: CardType,
    image: &[u8],
    keys: &[u8],
) -> SimProgrammer<'t> {
    let (card, fs) = build_card(card_type, &[("/fpga.bin", image)]).unwrap();
    programmer_with(timers, card, fs, keys)
}

/// Programmer around an arbitrary card and file table
pub fn programmer_with<'t>(
    timers: &'t Timers,
    card: SimCard,
    fs: ExtentFs,
    keys: &[u8],
) -> SimProgrammer<'t> {
    let port = SimBus::new(card, SimFlash::new(FlashConfig::default()))
        .with_timers(timers, BYTES_PER_TICK);
    let transport = ScriptTransport::new(keys).with_timers(timers);
    Programmer::new(port, fs, transport, timers, Config::default())
}

/// Programmer whose keys are released one command at a time
pub fn paced_programmer<'t>(
    timers: &'t Timers,
    card_type: CardType,
    image: &[u8],
    script: &[u8],
) -> SimProgrammer<'t> {
    let (card, fs) = build_card(card_type, &[("/fpga.bin", image)]).unwrap();
    let port = SimBus::new(card, SimFlash::new(FlashConfig::default()))
        .with_timers(timers, BYTES_PER_TICK);
    let transport = ScriptTransport::paced(script).with_timers(timers);
    Programmer::new(port, fs, transport, timers, Config::default())
}

/// Feed and poll until the script is used up, collecting what happened
pub fn run_script(p: &mut SimProgrammer<'_>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        p.console_mut().transport_mut().feed_next();
        match p.poll() {
            Event::Idle if !p.console().transport().connected() => return events,
            Event::Idle => {}
            event => events.push(event),
        }
    }
}

/// Output captured so far
pub fn output(p: &SimProgrammer<'_>) -> String {
    p.console().transport().text()
}

/// The emulated flash behind `p`
pub fn flash<'a>(p: &'a SimProgrammer<'_>) -> &'a SimFlash {
    p.hardware().bus.port().flash()
}
