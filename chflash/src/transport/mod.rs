//! Transport abstraction for the bootloader's USB endpoint pair.
//!
//! The bootloader exposes one bulk OUT and one bulk IN endpoint, each
//! transfer capped at 64 bytes. The protocol layer only needs blocking
//! send/receive over that pair, so it is written against the [`Transport`]
//! trait and stays I/O-agnostic:
//!
//! ```text
//! +------------------------+
//! |  Protocol / Session    |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+
//! |    Transport trait     |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+
//! |  UsbTransport (rusb)   |
//! +------------------------+
//! ```
//!
//! Tests substitute a scripted in-memory implementation.

#[cfg(feature = "usb")]
pub mod usb;

use crate::error::TransportError;

/// Maximum bytes per transfer in either direction.
pub const MAX_TRANSFER: usize = 64;

/// Blocking duplex channel to a bootloader device.
///
/// Each call maps to one USB bulk transfer and may block until the USB
/// layer completes it or times out. Transfers are FIFO per direction;
/// there is no reordering and no multiplexing.
pub trait Transport {
    /// Send one outgoing frame (at most [`MAX_TRANSFER`] bytes).
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive one incoming frame of up to `max_len` bytes.
    ///
    /// A successful transfer of zero bytes is returned as-is; the caller
    /// treats it as a transport failure, distinct from a protocol-level
    /// negative acknowledgment.
    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Human-readable channel name for log messages.
    fn name(&self) -> &str;
}

#[cfg(feature = "usb")]
pub use usb::UsbTransport;
