//! turtleprog-sim - Emulated Turtle board
//!
//! Byte-accurate models of the devices on the programmer's SPI bus, used by
//! the host binary and the integration tests:
//!
//! - [`SimCard`]: an SD/MMC card in SPI mode (MMCv3, SDv1, SDv2 byte or
//!   block addressed)
//! - [`SimFlash`]: an M25P16-style serial flash with deferred program and
//!   erase and a busy period
//! - [`SimBus`]: the wiring between them, implementing
//!   [`SpiPort`](turtleprog_core::bus::SpiPort)
//! - [`ExtentFs`]: a minimal file table standing in for the FAT layer
//! - [`ScriptTransport`]: a keystroke-scripted console transport
//!
//! # Example
//!
//! ```
//! use turtleprog_core::sdcard::CardType;
//! use turtleprog_sim::{build_card, FlashConfig, SimBus, SimFlash};
//!
//! let (card, fs) = build_card(CardType::Sd2, &[("/fpga.bin", &[0xAA; 1000][..])]).unwrap();
//! let bus = SimBus::new(card, SimFlash::new(FlashConfig::default()));
//! assert_eq!(bus.flash().data().len(), 2 * 1024 * 1024);
//! # let _ = fs;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bus;
pub mod card;
pub mod error;
pub mod extent;
pub mod flash;
pub mod transport;

pub use bus::SimBus;
pub use card::{CardConfig, SimCard};
pub use error::{Result, SimError};
pub use extent::{build_card, ExtentFs};
pub use flash::{FlashConfig, FlashEvent, SimFlash};
pub use transport::ScriptTransport;
