//! Transfer operations
//!
//! The long-running operations (copy, verify, blank check) are [`Job`]s that
//! move one flash page per [`step`](Job::step). [`run`] drives a job and
//! services the console between pages, so no job needs to know about the
//! transport. Page dump and erase are short enough to be plain functions.

mod blank;
mod copy;
mod dump;
mod erase;
mod verify;

pub use blank::BlankCheckJob;
pub use copy::CopyJob;
pub use dump::{dump_page, page_from_key, write_dump_line};
pub use erase::erase;
pub use verify::VerifyJob;

use core::fmt;

use heapless::Vec;

use crate::bus::SharedBus;
use crate::console::{Console, Transport};
use crate::error::Error;
use crate::flash::SpiFlash;
use crate::sdcard::SdCard;

/// Number of mismatches kept (and printed) per operation
pub const MISMATCH_CAP: usize = 30;

/// Everything the operations touch on the board
#[derive(Debug)]
pub struct Hardware<'t, P, F> {
    /// The shared SPI bus
    pub bus: SharedBus<P>,
    /// SD/MMC card driver
    pub card: SdCard<'t>,
    /// Configuration flash driver
    pub flash: SpiFlash<'t>,
    /// File layer on top of the card
    pub file: F,
}

/// One byte that differs from what was expected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Flash address
    pub addr: u32,
    /// Expected value (file byte, or 0xFF for blank check)
    pub expected: u8,
    /// Value read from flash
    pub actual: u8,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}: expected={:02X} actual={:02X}",
            self.addr, self.expected, self.actual
        )
    }
}

/// Running mismatch count plus the first [`MISMATCH_CAP`] examples
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MismatchLog {
    count: u32,
    first: Vec<Mismatch, MISMATCH_CAP>,
}

impl MismatchLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a mismatch; returns true if it was kept (and should be shown)
    pub fn record(&mut self, mismatch: Mismatch) -> bool {
        self.count += 1;
        self.first.push(mismatch).is_ok()
    }

    /// Total mismatches seen
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The kept examples, in address order
    pub fn first(&self) -> &[Mismatch] {
        &self.first
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Why an operation failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// Card, file or flash I/O error
    Io(Error),
    /// Content differed from what was expected
    Mismatch(MismatchLog),
}

/// Result of one transfer operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Copy finished
    Complete {
        /// Bytes programmed
        bytes: u32,
    },
    /// Verify or blank check found no differences
    Passed {
        /// Bytes compared
        bytes: u32,
    },
    /// The operation stopped on an error or found differences
    Failed {
        /// Bytes processed before stopping
        bytes: u32,
        /// What went wrong
        reason: FailReason,
    },
    /// The operator cancelled
    Aborted {
        /// Next address that would have been checked
        addr: u32,
    },
}

impl Outcome {
    /// Failure from an I/O error
    pub fn failed(bytes: u32, error: Error) -> Self {
        Self::Failed {
            bytes,
            reason: FailReason::Io(error),
        }
    }

    /// One-word status as shown to the operator
    pub fn status(&self) -> &'static str {
        match self {
            Self::Complete { .. } => "complete",
            Self::Passed { .. } => "passed",
            Self::Failed { .. } => "failed",
            Self::Aborted { .. } => "aborted",
        }
    }

    /// True for `Complete` and `Passed`
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Passed { .. })
    }
}

/// Result of one step of a [`Job`]
#[derive(Debug)]
pub enum Step {
    /// More pages to go
    Pending,
    /// The job has finished
    Done(Outcome),
}

/// A page-at-a-time operation
pub trait Job {
    /// Whether an operator keypress between pages cancels the job
    const CANCELLABLE: bool = false;

    /// Process one page
    fn step<T: Transport>(&mut self, console: &mut Console<T>) -> Step;

    /// Stop early at the operator's request
    fn cancel(&mut self) -> Option<Outcome> {
        None
    }
}

/// Drive `job` to completion, servicing the console after every page
pub fn run<J: Job, T: Transport>(mut job: J, console: &mut Console<T>) -> Outcome {
    loop {
        if let Step::Done(outcome) = job.step(console) {
            return outcome;
        }
        console.service();
        if J::CANCELLABLE && console.poll_byte().is_some() {
            if let Some(outcome) = job.cancel() {
                return outcome;
            }
        }
    }
}

/// Print `"<N> kb\r"` whenever `bytes` lands on a multiple of `interval`
fn progress<T: Transport>(console: &mut Console<T>, bytes: u32, interval: u32) {
    if interval != 0 && bytes % interval == 0 {
        console.print(format_args!("{} kb\r", bytes / 1024));
    }
}
