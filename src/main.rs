//! turtleprog - Turtle FPGA programmer on an emulated board
//!
//! Runs the programmer firmware core against an emulated SD card and serial
//! flash, with the terminal standing in for the USB serial console.
//!
//! # Sessions
//!
//! The session starts with a press of the mode button, which mounts the card
//! and prints the command list. Single keystrokes then drive the programmer
//! exactly as on the board, either typed at the terminal or given up front
//! with `--script`. The session ends when the programmer goes back to run
//! mode, when the bootloader is requested, or when input runs out.
//!
//! A scripted session advances the 100 ms tick from bus and console
//! activity instead of the wall clock, so it runs as fast as the host allows.

mod cli;
mod stdio;

use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use clap::Parser;
use cli::{CardKind, Cli, Revision};
use stdio::StdioTransport;
use turtleprog_core::config::DEFAULT_IMAGE_PATH;
use turtleprog_core::console::Transport;
use turtleprog_core::flash::BoardRevision;
use turtleprog_core::sdcard::CardType;
use turtleprog_core::timer::Timers;
use turtleprog_core::{Config, Event, Mode, Programmer};
use turtleprog_sim::{
    build_card, ExtentFs, FlashConfig, ScriptTransport, SimBus, SimCard, SimFlash,
};

/// Shared with the tick source, as with the board's timer interrupt
static TIMERS: Timers = Timers::new();

/// Bus exchanges per tick when a script drives the clock
const SCRIPT_BYTES_PER_TICK: usize = 64;

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let revision = match cli.revision {
        Revision::V1 => BoardRevision::V1_0,
        Revision::V2 => BoardRevision::V2_0,
    };
    let (card, fs) = load_card(&cli)?;
    let flash = load_flash(revision, cli.flash_image.as_deref())?;
    let config = Config {
        revision,
        flash_ready_timeout: cli.flash_timeout,
        ..Config::default()
    };

    let flash = match &cli.script {
        Some(keys) => {
            let port = SimBus::new(card, flash).with_timers(&TIMERS, SCRIPT_BYTES_PER_TICK);
            let transport = ScriptTransport::paced(keys.as_bytes()).with_timers(&TIMERS);
            let mut programmer = Programmer::new(port, fs, transport, &TIMERS, config);
            let result = run_session(&mut programmer, |t| {
                t.feed_next();
            });
            let (hw, console) = programmer.into_parts();
            io::stdout().write_all(&console.into_inner().take_output())?;
            io::stdout().flush()?;
            result?;
            hw.bus.into_inner().into_parts().1
        }
        None => {
            thread::spawn(|| loop {
                thread::sleep(Duration::from_millis(100));
                TIMERS.tick();
            });
            let port = SimBus::new(card, flash);
            let mut programmer =
                Programmer::new(port, fs, StdioTransport::spawn(), &TIMERS, config);
            let result = run_session(&mut programmer, |_| {});
            let (hw, _) = programmer.into_parts();
            result?;
            hw.bus.into_inner().into_parts().1
        }
    };

    if let Some(path) = &cli.flash_image {
        flash.save_image(path)?;
        log::info!("Saved flash contents to {}", path.display());
    }
    Ok(())
}

/// Press the mode button, then handle console input until the session ends
///
/// `feed` runs before every poll so a script can release its next keys.
fn run_session<T: Transport>(
    programmer: &mut Programmer<'static, SimBus<'static>, ExtentFs, T>,
    mut feed: impl FnMut(&mut T),
) -> turtleprog_core::Result<()> {
    programmer.button_pressed()?;
    loop {
        feed(programmer.console_mut().transport_mut());
        match programmer.poll() {
            Event::Idle => {
                if !programmer.console().transport().connected() {
                    log::info!("Console closed");
                    return Ok(());
                }
            }
            Event::PassThrough(byte) => log::debug!("UART bridge <- {:02X}", byte),
            Event::Done(command, outcome) => {
                log::info!("{}: {}", command.title(), outcome.status());
            }
            Event::ModeChanged(Mode::Program) => {}
            Event::ModeChanged(Mode::Run) => return Ok(()),
            Event::EnterBootloader => {
                log::info!("Bootloader requested, stopping");
                return Ok(());
            }
        }
    }
}

/// Fill the card slot from the command line
fn load_card(cli: &Cli) -> Result<(SimCard, ExtentFs), Box<dyn Error>> {
    if cli.no_card {
        return Ok((SimCard::absent(), ExtentFs::new()));
    }
    let card_type = match cli.card {
        CardKind::Mmc => CardType::Mmc,
        CardKind::Sd1 => CardType::Sd1,
        CardKind::Sd2 => CardType::Sd2,
        CardKind::Sdhc => CardType::Sd2Block,
    };

    let bitstream = match &cli.bitstream {
        Some(path) => {
            let data = fs::read(path)?;
            log::info!(
                "Placing {} ({} bytes) on the card as {}",
                path.display(),
                data.len(),
                DEFAULT_IMAGE_PATH
            );
            Some(data)
        }
        None => None,
    };
    let files: Vec<(&str, &[u8])> = bitstream
        .iter()
        .map(|data| (DEFAULT_IMAGE_PATH, data.as_slice()))
        .collect();
    Ok(build_card(card_type, &files)?)
}

/// Create the flash for `revision`, restoring earlier contents if saved
fn load_flash(revision: BoardRevision, path: Option<&Path>) -> turtleprog_sim::Result<SimFlash> {
    let jedec_id = match revision {
        BoardRevision::V1_0 => [0x20, 0x20, 0x15], // M25P16
        BoardRevision::V2_0 => [0x20, 0x20, 0x16], // M25P32
    };
    let mut flash = SimFlash::new(FlashConfig {
        size: revision.flash_capacity() as usize,
        jedec_id,
        ..FlashConfig::default()
    });
    if let Some(path) = path.filter(|p| p.exists()) {
        flash.load_image(path)?;
        log::info!("Loaded flash contents from {}", path.display());
    }
    Ok(flash)
}
