//! Standalone flash erase.

use anyhow::Result;
use console::style;
use log::error;

use crate::Cli;
use crate::commands::open_session;

/// Erase the entire flash. Requires the `--all` confirmation flag.
pub(crate) fn cmd_erase(cli: &Cli, all: bool) -> Result<()> {
    if !all {
        error!("erasing wipes the entire flash");
        if !cli.quiet {
            eprintln!(
                "{} pass {} to confirm erasing the whole chip",
                style("⚠").yellow(),
                style("--all").cyan()
            );
        }
        std::process::exit(2);
    }

    let mut session = open_session(cli)?;

    if !cli.quiet {
        eprintln!("{} erasing flash...", style("🗑").red());
    }
    session.erase()?;

    if !cli.quiet {
        eprintln!("{} erase complete", style("✓").green().bold());
    }

    Ok(())
}
