//! CLI argument parsing

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "turtleprog")]
#[command(author, version, about = "Turtle FPGA programmer on an emulated board", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Bitstream to place on the emulated card as /fpga.bin
    #[arg(short, long)]
    pub bitstream: Option<PathBuf>,

    /// Card family inserted in the emulated slot
    #[arg(long, value_enum, default_value_t = CardKind::Sdhc)]
    pub card: CardKind,

    /// Leave the card slot empty
    #[arg(long, conflicts_with = "bitstream")]
    pub no_card: bool,

    /// Board revision, which selects the flash size
    #[arg(short, long, value_enum, default_value_t = Revision::V1)]
    pub revision: Revision,

    /// Flash contents file: loaded at start if present, saved on exit
    #[arg(short, long)]
    pub flash_image: Option<PathBuf>,

    /// Keystrokes to send instead of reading the terminal, one command at a time (e.g. "WVBX")
    #[arg(short, long)]
    pub script: Option<String>,

    /// Give up on a busy flash after this many 100 ms ticks
    #[arg(long)]
    pub flash_timeout: Option<u16>,
}

/// Card families the emulated slot can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CardKind {
    /// MMC version 3
    Mmc,
    /// SD version 1.x
    Sd1,
    /// SD version 2, standard capacity
    Sd2,
    /// SD version 2, high capacity (block addressed)
    Sdhc,
}

/// Board revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Revision {
    /// Rev 1.0, 16 Mbit flash
    V1,
    /// Rev 2.0, 32 Mbit flash
    V2,
}
