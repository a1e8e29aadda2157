//! Error types for chflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for chflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Udev remediation advice reported alongside permission errors on Linux.
pub const UDEV_ADVICE: &str = "\
No access to the USB device; configure udev or run as root (sudo).
For udev create /etc/udev/rules.d/99-ch55x.rules with one line:
SUBSYSTEM==\"usb\", ATTR{idVendor}==\"4348\", ATTR{idProduct}==\"55e0\", MODE=\"666\"
then restart udev (sudo service udev restart) and reconnect the device.";

/// Top-level error type for chflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// USB transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bootloader protocol failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Input artifact failure.
    #[error(transparent)]
    Input(#[from] InputError),

    /// I/O error (transcript file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation aborted by the embedding application (e.g. Ctrl-C).
    #[error("operation interrupted")]
    Interrupted,

    /// Session operation attempted out of order.
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// Session state at the time of the call.
        state: &'static str,
    },
}

/// Failures of the USB transport channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// USB transfer timed out.
    #[error("USB transfer timed out")]
    Timeout,

    /// The OS refused access to the device.
    #[error("USB permission denied\n{UDEV_ADVICE}")]
    PermissionDenied,

    /// No bootloader device is attached (or it disappeared mid-run).
    #[error("no CH55x bootloader device found, check cabling and driver")]
    DeviceNotFound,

    /// Any other transport-level failure.
    #[error("USB transport error: {0}")]
    Other(String),
}

/// Failures of the bootloader protocol conversation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Reply had a length no frame layout accounts for.
    #[error("unexpected reply length: got {actual} bytes, expected {expected}")]
    UnexpectedReplyLength {
        /// Length the active codec expected.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// Identification returned a chip id without a known profile.
    #[error("unknown chip id {0:#04x}")]
    UnknownChip(u8),

    /// Version/configuration readback did not match any known bootloader.
    #[error("unknown bootloader version")]
    UnknownBootloaderVersion,

    /// Erase command or a per-block confirmation reported failure.
    #[error("flash erase failed")]
    EraseFailed,

    /// Device rejected a write data frame.
    #[error("write failed at address {address:#06x}")]
    WriteFailed {
        /// Flash address of the failed frame.
        address: u16,
    },

    /// Device reported a mismatch for a verify data frame.
    #[error("verify failed at address {address:#06x}")]
    VerifyFailed {
        /// Flash address of the failed frame.
        address: u16,
    },
}

/// Failures of the firmware input artifact, caught before any device I/O.
#[derive(Debug, Error)]
pub enum InputError {
    /// Firmware image below the minimum accepted size.
    #[error("firmware file is only {size} bytes (minimum {minimum}), possibly corrupt")]
    FileTooSmall {
        /// Actual file size.
        size: usize,
        /// Minimum accepted size.
        minimum: usize,
    },

    /// Firmware file does not exist.
    #[error("firmware file not found: {0}")]
    FileNotFound(PathBuf),

    /// Firmware image larger than the identified chip's flash.
    #[error("firmware of {size} bytes does not fit the chip's {capacity} byte flash")]
    FileTooLarge {
        /// Actual image size.
        size: usize,
        /// Flash capacity of the identified chip.
        capacity: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failed_formats_address() {
        let err = ProtocolError::WriteFailed { address: 0x1538 };
        assert_eq!(err.to_string(), "write failed at address 0x1538");
    }

    #[test]
    fn test_permission_denied_carries_udev_advice() {
        let err = TransportError::PermissionDenied;
        assert!(err.to_string().contains("99-ch55x.rules"));
    }

    #[test]
    fn test_taxonomy_wraps_into_top_level_error() {
        let err: Error = ProtocolError::EraseFailed.into();
        assert!(matches!(err, Error::Protocol(ProtocolError::EraseFailed)));

        let err: Error = TransportError::Timeout.into();
        assert!(matches!(err, Error::Transport(TransportError::Timeout)));
    }
}
