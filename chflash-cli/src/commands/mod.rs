//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod detect;
pub(crate) mod erase;
pub(crate) mod flash;
pub(crate) mod verify;

use anyhow::{Context, Result};
use chflash::{FileTranscript, NullTranscript, Session, TranscriptSink, UsbTransport};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::{Cli, use_fancy_output};

/// Open the USB device and attach a bootloader session, with the
/// transcript from `--log` when requested.
pub(crate) fn open_session(cli: &Cli) -> Result<Session<UsbTransport>> {
    let transport = UsbTransport::open_with_timeout(Duration::from_millis(cli.timeout_ms))?;

    let transcript: Box<dyn TranscriptSink> = match &cli.log {
        Some(path) => {
            if !cli.quiet {
                eprintln!(
                    "{} writing transcript to {}",
                    style("ℹ").blue(),
                    path.display()
                );
            }
            Box::new(
                FileTranscript::create(path)
                    .with_context(|| format!("cannot create transcript file {}", path.display()))?,
            )
        },
        None => Box::new(NullTranscript),
    };

    let session = Session::attach_with_transcript(transport, transcript)?;

    if !cli.quiet {
        let device = session.device();
        eprintln!(
            "{} found {} with {} bootloader, version {}",
            style("✓").green(),
            style(device.profile.name()).cyan().bold(),
            device.variant,
            device.version
        );
    }

    Ok(session)
}

/// Byte-count progress bar, hidden in quiet or non-TTY runs.
pub(crate) fn progress_bar(cli: &Cli, total: u64, message: &'static str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(message);
    pb
}
