//! Bulk erase with console feedback

use crate::bus::{SharedBus, SpiPort};
use crate::console::{Console, Transport};
use crate::error::Result;
use crate::flash::SpiFlash;

/// Erase the whole flash
///
/// The console is serviced once so the announcement reaches the host; the
/// erase itself blocks for tens of seconds without servicing.
pub fn erase<P: SpiPort, T: Transport>(
    bus: &mut SharedBus<P>,
    flash: &mut SpiFlash<'_>,
    console: &mut Console<T>,
) -> Result<()> {
    console.puts("Erasing flash... ");
    console.service();
    flash.erase(bus)?;
    console.puts("done\r\n");
    Ok(())
}
