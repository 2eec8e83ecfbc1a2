//! Blank check: every flash byte must read back erased

use crate::bus::{SharedBus, SpiPort};
use crate::console::{Console, Transport};
use crate::error::Result;
use crate::flash::{SpiFlash, ERASED, PAGE_SIZE};

use super::{progress, FailReason, Job, Mismatch, MismatchLog, Outcome, Step};

/// Scans the flash one page per step, stopping at the first dirty page
///
/// A keypress between pages aborts the scan.
pub struct BlankCheckJob<'h, 't, P: SpiPort> {
    bus: &'h mut SharedBus<P>,
    flash: &'h SpiFlash<'t>,
    addr: u32,
    pages: u32,
    interval: u32,
}

impl<'h, 't, P: SpiPort> BlankCheckJob<'h, 't, P> {
    /// Prepare a scan of the whole flash
    pub fn new(bus: &'h mut SharedBus<P>, flash: &'h SpiFlash<'t>, interval: u32) -> Self {
        Self {
            bus,
            flash,
            addr: 0,
            pages: 0,
            interval,
        }
    }

    /// Pages read so far
    pub fn pages_scanned(&self) -> u32 {
        self.pages
    }

    fn read_page(&mut self, page: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut read = self.flash.read(&mut *self.bus, self.addr)?;
        read.read_into(page);
        read.finish();
        Ok(())
    }
}

impl<P: SpiPort> Job for BlankCheckJob<'_, '_, P> {
    const CANCELLABLE: bool = true;

    fn step<T: Transport>(&mut self, console: &mut Console<T>) -> Step {
        let capacity = self.flash.capacity();
        if self.addr >= capacity {
            return Step::Done(Outcome::Passed { bytes: capacity });
        }
        progress(console, self.addr, self.interval);

        let mut page = [0u8; PAGE_SIZE];
        if let Err(e) = self.read_page(&mut page) {
            return Step::Done(Outcome::failed(self.addr, e));
        }
        self.pages += 1;

        let mut log = MismatchLog::new();
        for (offset, &actual) in page.iter().enumerate() {
            if actual != ERASED {
                let mismatch = Mismatch {
                    addr: self.addr + offset as u32,
                    expected: ERASED,
                    actual,
                };
                if log.record(mismatch) {
                    console.print(format_args!("{}\r\n", mismatch));
                }
            }
        }
        self.addr += PAGE_SIZE as u32;

        if !log.is_empty() {
            log::debug!("blank check stopped at page {}", self.pages - 1);
            return Step::Done(Outcome::Failed {
                bytes: self.addr,
                reason: FailReason::Mismatch(log),
            });
        }
        if self.addr >= capacity {
            return Step::Done(Outcome::Passed { bytes: capacity });
        }
        Step::Pending
    }

    fn cancel(&mut self) -> Option<Outcome> {
        Some(Outcome::Aborted { addr: self.addr })
    }
}
