//! Verify flash contents without writing.

use anyhow::{Context, Result};
use chflash::Firmware;
use console::style;
use std::path::Path;

use crate::Cli;
use crate::commands::{open_session, progress_bar};

/// Compare flash contents against a firmware binary.
///
/// Runs against the existing flash state; no erase, no write, and the
/// bootloader is left resident.
pub(crate) fn cmd_verify(cli: &Cli, firmware_path: &Path) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} loading firmware {}",
            style("📦").cyan(),
            firmware_path.display()
        );
    }
    let firmware = Firmware::from_file(firmware_path)
        .with_context(|| format!("cannot load firmware {}", firmware_path.display()))?;

    let mut session = open_session(cli)?;

    let pb = progress_bar(cli, firmware.len() as u64, "verifying");
    session.verify(&firmware, |current, _total| {
        pb.set_position(current as u64);
    })?;
    pb.finish_with_message("verified");

    if !cli.quiet {
        eprintln!("{} flash matches {}", style("✓").green().bold(), firmware_path.display());
    }

    Ok(())
}
