//! chflash CLI - Command-line tool for flashing CH55x microcontrollers.
//!
//! ## Features
//!
//! - Flash raw firmware binaries over the resident USB bootloader
//! - Standalone erase and verify
//! - Bootloader and chip detection
//! - Optional plain-text transcript of the USB conversation
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::Parser;
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;

use commands::{detect, erase, flash, verify};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set after Ctrl-C; checked by the library between frame exchanges.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// chflash - A tool for flashing CH55x chips over their USB bootloader.
///
/// Environment variables:
///   CHFLASH_LOG          - Transcript log file path
///   CHFLASH_TIMEOUT_MS   - USB transfer timeout in milliseconds
#[derive(Parser)]
#[command(name = "chflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Write a transcript of the USB conversation to this file.
    ///
    /// While a transcript is active the final exit-bootloader command is
    /// suppressed and verify continues past mismatches to map them all.
    #[arg(short, long, global = true, env = "CHFLASH_LOG", value_name = "PATH")]
    log: Option<PathBuf>,

    /// USB transfer timeout in milliseconds.
    #[arg(
        long,
        global = true,
        default_value = "2000",
        env = "CHFLASH_TIMEOUT_MS",
        value_name = "MS"
    )]
    timeout_ms: u64,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Detect the connected chip and bootloader, without touching flash.
    Detect,

    /// Erase the chip's flash memory.
    Erase {
        /// Confirm erasing the entire flash.
        #[arg(long)]
        all: bool,
    },

    /// Erase, write and verify a firmware binary.
    Flash {
        /// Path to the raw firmware binary.
        firmware: PathBuf,
    },

    /// Verify flash contents against a firmware binary.
    Verify {
        /// Path to the raw firmware binary.
        firmware: PathBuf,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "chflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("could not install Ctrl-C handler: {err}");
    }
    chflash::set_interrupt_checker(|| INTERRUPTED.load(Ordering::Relaxed));

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error_banner(&err);
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Detect => detect::cmd_detect(cli),
        Commands::Erase { all } => erase::cmd_erase(cli, *all),
        Commands::Flash { firmware } => flash::cmd_flash(cli, firmware),
        Commands::Verify { firmware } => verify::cmd_verify(cli, firmware),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Print the delimited error banner to stderr.
fn print_error_banner(err: &anyhow::Error) {
    eprintln!("{}", chflash::transcript::SEPARATOR);
    eprintln!("{} {err:#}", style("Error:").red().bold());
    eprintln!("{}", chflash::transcript::SEPARATOR);
}

/// Map an error to the process exit code.
///
/// Protocol failures (the device answered, negatively) exit 1; argument,
/// input and transport problems exit 2.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<chflash::Error>() {
        Some(chflash::Error::Protocol(_)) => 1,
        _ => 2,
    }
}
