//! Chip and bootloader detection.

use anyhow::Result;

use crate::Cli;
use crate::commands::open_session;

/// Identify the connected chip and report it, without touching flash.
pub(crate) fn cmd_detect(cli: &Cli) -> Result<()> {
    let session = open_session(cli)?;
    let device = session.device();

    println!("chip:       {}", device.profile.name());
    println!("chip id:    0x{:02x}", device.profile.chip_id);
    println!("flash:      {} KB", device.profile.flash_size_kb);
    println!("bootloader: {} ({})", device.version, device.variant);

    Ok(())
}
