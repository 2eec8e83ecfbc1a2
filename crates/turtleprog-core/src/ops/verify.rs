//! Compare flash contents against the bitstream file

use crate::bus::{SharedBus, SpiPort};
use crate::console::{Console, Transport};
use crate::error::{Error, Result};
use crate::file::FileReader;
use crate::flash::{SpiFlash, PAGE_SIZE};
use crate::sdcard::SdCard;

use super::{progress, FailReason, Hardware, Job, Mismatch, MismatchLog, Outcome, Step};

/// Reads the file page by page and compares each page with flash
pub struct VerifyJob<'h, 't, P: SpiPort, F> {
    bus: &'h mut SharedBus<P>,
    card: &'h SdCard<'t>,
    flash: &'h SpiFlash<'t>,
    file: &'h mut F,
    addr: u32,
    interval: u32,
    log: MismatchLog,
}

impl<'h, 't, P: SpiPort, F: FileReader> VerifyJob<'h, 't, P, F> {
    /// Open `path` on the card and prepare to verify against it
    pub fn start(hw: &'h mut Hardware<'t, P, F>, path: &str, interval: u32) -> Result<Self> {
        let Hardware {
            bus,
            card,
            flash,
            file,
        } = hw;
        if !card.is_mounted() {
            return Err(Error::CardNotMounted);
        }
        file.open(&mut card.io(bus), path)?;
        Ok(Self {
            bus,
            card,
            flash,
            file,
            addr: 0,
            interval,
            log: MismatchLog::new(),
        })
    }

    /// Mismatches found so far
    pub fn mismatches(&self) -> &MismatchLog {
        &self.log
    }

    fn compare<T: Transport>(&mut self, console: &mut Console<T>, expected: &[u8]) -> Result<()> {
        let mut page = [0u8; PAGE_SIZE];
        let page = &mut page[..expected.len()];
        let mut read = self.flash.read(&mut *self.bus, self.addr)?;
        read.read_into(page);
        read.finish();

        for (offset, (&want, &got)) in expected.iter().zip(page.iter()).enumerate() {
            if want != got {
                let mismatch = Mismatch {
                    addr: self.addr + offset as u32,
                    expected: want,
                    actual: got,
                };
                if self.log.record(mismatch) {
                    console.print(format_args!("{}\r\n", mismatch));
                }
            }
        }
        Ok(())
    }
}

impl<P: SpiPort, F: FileReader> Job for VerifyJob<'_, '_, P, F> {
    fn step<T: Transport>(&mut self, console: &mut Console<T>) -> Step {
        progress(console, self.addr, self.interval);

        let mut buf = [0u8; PAGE_SIZE];
        let mut io = self.card.io(&mut *self.bus);
        let count = match self.file.read(&mut io, &mut buf) {
            Ok(count) => count,
            Err(e) => return Step::Done(Outcome::failed(self.addr, e)),
        };

        if count > 0 {
            if let Err(e) = self.compare(console, &buf[..count]) {
                return Step::Done(Outcome::failed(self.addr, e));
            }
        }
        self.addr += count as u32;

        if count < PAGE_SIZE {
            let bytes = self.addr;
            return Step::Done(if self.log.is_empty() {
                Outcome::Passed { bytes }
            } else {
                Outcome::Failed {
                    bytes,
                    reason: FailReason::Mismatch(core::mem::take(&mut self.log)),
                }
            });
        }
        Step::Pending
    }
}
