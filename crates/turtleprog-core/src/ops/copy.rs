//! Copy the bitstream file into flash

use crate::bus::{SharedBus, SpiPort};
use crate::console::{Console, Transport};
use crate::error::{Error, Result};
use crate::file::FileReader;
use crate::flash::{ProgramSession, SpiFlash, PAGE_SIZE};
use crate::sdcard::SdCard;

use super::{progress, Hardware, Job, Outcome, Step};

/// Streams a file from the card into flash starting at address 0
///
/// The program stream is opened after the first chunk has been read, and
/// every later card read happens while the previous page is committing.
pub struct CopyJob<'h, 't, P: SpiPort, F> {
    bus: &'h mut SharedBus<P>,
    card: &'h SdCard<'t>,
    file: &'h mut F,
    flash: Option<&'h mut SpiFlash<'t>>,
    session: Option<ProgramSession<'h, 't>>,
    bytes: u32,
    interval: u32,
}

impl<'h, 't, P: SpiPort, F: FileReader> CopyJob<'h, 't, P, F> {
    /// Open `path` on the card and prepare to copy it
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
            file,
            flash: Some(flash),
            session: None,
            bytes: 0,
            interval,
        })
    }

    fn program(&mut self, data: &[u8]) -> Result<()> {
        if self.session.is_none() {
            if let Some(flash) = self.flash.take() {
                self.session = Some(flash.program(&mut *self.bus, 0)?);
            }
        }
        if let Some(session) = self.session.as_mut() {
            session.write_all(&mut *self.bus, data)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.finish(&mut *self.bus),
            None => Ok(()),
        }
    }

    fn fail(&mut self, error: Error) -> Outcome {
        log::warn!("copy stopped after {} bytes: {}", self.bytes, error);
        if let Err(e) = self.close() {
            log::warn!("could not close program stream: {}", e);
        }
        Outcome::failed(self.bytes, error)
    }
}

impl<P: SpiPort, F: FileReader> Job for CopyJob<'_, '_, P, F> {
    fn step<T: Transport>(&mut self, console: &mut Console<T>) -> Step {
        let mut buf = [0u8; PAGE_SIZE];
        let mut io = self.card.io(&mut *self.bus);
        let count = match self.file.read(&mut io, &mut buf) {
            Ok(count) => count,
            Err(e) => return Step::Done(self.fail(e)),
        };

        if count > 0 {
            if let Err(e) = self.program(&buf[..count]) {
                return Step::Done(self.fail(e));
            }
        }
        self.bytes += count as u32;
        progress(console, self.bytes, self.interval);

        if count < PAGE_SIZE {
            return Step::Done(match self.close() {
                Ok(()) => Outcome::Complete { bytes: self.bytes },
                Err(e) => self.fail(e),
            });
        }
        Step::Pending
    }
}
