//! Full flash run: erase, write, verify, exit.

use anyhow::{Context, Result};
use chflash::Firmware;
use console::style;
use std::path::Path;

use crate::Cli;
use crate::commands::{open_session, progress_bar};

/// Flash a raw firmware binary onto the chip.
pub(crate) fn cmd_flash(cli: &Cli, firmware_path: &Path) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} loading firmware {}",
            style("📦").cyan(),
            firmware_path.display()
        );
    }
    let firmware = Firmware::from_file(firmware_path)
        .with_context(|| format!("cannot load firmware {}", firmware_path.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} {} bytes to flash",
            style("ℹ").blue(),
            firmware.len()
        );
    }

    let mut session = open_session(cli)?;
    session.check_capacity(&firmware)?;

    if !cli.quiet {
        eprintln!("{} erasing flash...", style("⏳").yellow());
    }
    session.erase()?;

    let pb = progress_bar(cli, firmware.len() as u64, "writing");
    session.write(&firmware, |current, _total| {
        pb.set_position(current as u64);
    })?;
    pb.finish_with_message("written");

    let pb = progress_bar(cli, firmware.len() as u64, "verifying");
    session.verify(&firmware, |current, _total| {
        pb.set_position(current as u64);
    })?;
    pb.finish_with_message("verified");

    session.exit_bootloader()?;

    if !cli.quiet {
        eprintln!("\n{} flashing complete", style("🎉").green().bold());
    }

    Ok(())
}
