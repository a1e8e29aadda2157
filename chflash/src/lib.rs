//! # chflash
//!
//! A library for flashing CH55x-family microcontrollers through their
//! resident USB bootloader.
//!
//! This crate implements the bootloader's logical protocol conversation:
//!
//! - detection of the two incompatible wire protocols (legacy v1 and
//!   extended v2) from the reply to a single probe
//! - chip identification with flash geometry lookup
//! - erase, write and verify of raw firmware images in fixed 64-byte
//!   bulk transfers, including the extended variant's per-frame XOR mask
//! - optional plain-text transcript logging of every exchange
//!
//! ## Supported Chips
//!
//! - CH551, CH552, CH554 (16 KB flash)
//! - CH558, CH559 (64 KB flash)
//!
//! ## Features
//!
//! - `usb` (default): USB transport via the `rusb` crate. Without it,
//!   only the protocol engine and the [`transport::Transport`] trait are
//!   available, for embedding with a custom channel.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chflash::{Firmware, Session, UsbTransport};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = UsbTransport::open()?;
//!     let mut session = Session::attach(transport)?;
//!     println!("found {}", session.device().profile);
//!
//!     let firmware = Firmware::from_file("firmware.bin")?;
//!     session.flash(&firmware, |current, total| {
//!         println!("{current}/{total}");
//!     })?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod chip;
pub mod error;
pub mod image;
pub mod protocol;
pub mod session;
pub mod transcript;
pub mod transport;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker consulted between frame
/// exchanges.
///
/// The checker should return `true` when the current operation should
/// stop (for example after receiving Ctrl-C in CLI applications). The
/// protocol has no mid-transfer cancellation; the check runs before
/// each frame is sent.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding
/// application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

/// The interrupt flag is process-global, so tests that read or toggle
/// it serialize on this lock.
#[cfg(test)]
pub(crate) fn interrupt_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// Re-exports for convenience
#[cfg(feature = "usb")]
pub use transport::UsbTransport;
pub use {
    chip::{BootloaderVersion, ChipProfile},
    error::{Error, InputError, ProtocolError, Result, TransportError},
    image::{Firmware, MIN_IMAGE_SIZE},
    protocol::{Codec, DataMode, ProtocolVariant},
    session::{DeviceInfo, Session, SessionState},
    transcript::{FileTranscript, NullTranscript, TranscriptSink},
    transport::{MAX_TRANSFER, Transport},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        let _guard = interrupt_guard();
        test_set_interrupted(false);
        assert!(!is_interrupt_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        let _guard = interrupt_guard();
        test_set_interrupted(true);
        assert!(is_interrupt_requested());

        test_set_interrupted(false);
        assert!(!is_interrupt_requested());
    }
}
