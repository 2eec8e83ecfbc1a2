//! turtleprog-core - Firmware core of the Turtle FPGA configuration programmer
//!
//! The board copies an FPGA bitstream from an SD/MMC card into the serial
//! NOR flash the FPGA boots from. Both peripherals hang off one SPI bus,
//! which this crate arbitrates. This crate holds everything on the path
//! between the two:
//!
//! - [`bus`] - single-byte exchange and the one-device-at-a-time bus session
//! - [`sdcard`] - SD/MMC power-up negotiation and single block reads
//! - [`flash`] - M25P16-class serial flash: pipelined page programming,
//!   streaming reads, bulk erase
//! - [`ops`] - copy, verify, blank-check and page dump, each one page per step
//! - [`dispatch`] - the single-character console command protocol
//!
//! The USB serial transport, the FAT layer, and the 100 ms timer interrupt
//! belong to the platform. They reach this crate through [`console::Transport`],
//! [`file::FileReader`] and [`timer::Timers::tick`].
//!
//! # Example
//!
//! ```ignore
//! use turtleprog_core::{timer::Timers, Config, Programmer};
//!
//! static TIMERS: Timers = Timers::new();
//!
//! let mut programmer = Programmer::new(port, fat, usb, &TIMERS, Config::default());
//! programmer.button_pressed()?;
//! loop {
//!     programmer.poll();
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod bus;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod file;
pub mod flash;
pub mod ops;
pub mod sdcard;
pub mod timer;

pub use config::Config;
pub use dispatch::{Command, Event, Mode, Programmer};
pub use error::{Error, Result};
