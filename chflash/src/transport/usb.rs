//! USB bulk transport implementation using the `rusb` crate.
//!
//! The CH55x bootloader enumerates as a vendor-class device with one bulk
//! OUT and one bulk IN endpoint on interface 0. Endpoints are resolved
//! from the active configuration rather than hard-coded, matching what
//! the bootloader actually reports.

use {
    crate::{
        error::TransportError,
        transport::{MAX_TRANSFER, Transport},
    },
    log::trace,
    rusb::{Direction, GlobalContext, TransferType},
    std::time::Duration,
};

/// USB vendor id of the CH55x bootloader.
pub const VENDOR_ID: u16 = 0x4348;

/// USB product id of the CH55x bootloader.
pub const PRODUCT_ID: u16 = 0x55e0;

/// Default per-transfer timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// USB bulk transport to a CH55x bootloader device.
pub struct UsbTransport {
    handle: rusb::DeviceHandle<GlobalContext>,
    ep_in: u8,
    ep_out: u8,
    timeout: Duration,
    name: String,
}

impl UsbTransport {
    /// Open the first attached bootloader device with the default timeout.
    pub fn open() -> Result<Self, TransportError> {
        Self::open_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Open the first attached bootloader device.
    pub fn open_with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let devices = rusb::devices().map_err(map_usb_err)?;

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if desc.vendor_id() != VENDOR_ID || desc.product_id() != PRODUCT_ID {
                continue;
            }

            let name = format!(
                "CH55x bootloader (bus {:03} device {:03})",
                device.bus_number(),
                device.address()
            );
            let (ep_in, ep_out) = resolve_endpoints(&device)?;

            let handle = device.open().map_err(map_usb_err)?;
            // Linux binds usbfs drivers eagerly; detach so claiming succeeds.
            let _ = handle.set_auto_detach_kernel_driver(true);
            handle.claim_interface(0).map_err(map_usb_err)?;

            trace!("Opened {name}: EP IN {ep_in:#04x}, EP OUT {ep_out:#04x}");

            return Ok(Self {
                handle,
                ep_in,
                ep_out,
                timeout,
                name,
            });
        }

        Err(TransportError::DeviceNotFound)
    }
}

/// Find the first bulk IN/OUT endpoint pair on interface 0.
fn resolve_endpoints(
    device: &rusb::Device<GlobalContext>,
) -> Result<(u8, u8), TransportError> {
    let config = device.active_config_descriptor().map_err(map_usb_err)?;

    let mut ep_in = None;
    let mut ep_out = None;

    for interface in config.interfaces() {
        for desc in interface.descriptors() {
            for endpoint in desc.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In if ep_in.is_none() => ep_in = Some(endpoint.address()),
                    Direction::Out if ep_out.is_none() => ep_out = Some(endpoint.address()),
                    _ => {},
                }
            }
        }
    }

    match (ep_in, ep_out) {
        (Some(ep_in), Some(ep_out)) => Ok((ep_in, ep_out)),
        _ => Err(TransportError::Other(
            "device exposes no bulk endpoint pair".into(),
        )),
    }
}

fn map_usb_err(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Access => TransportError::PermissionDenied,
        rusb::Error::NoDevice | rusb::Error::NotFound => TransportError::DeviceNotFound,
        other => TransportError::Other(other.to_string()),
    }
}

impl Transport for UsbTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        trace!("tx {} bytes: {frame:02x?}", frame.len());
        let written = self
            .handle
            .write_bulk(self.ep_out, frame, self.timeout)
            .map_err(map_usb_err)?;
        if written != frame.len() {
            return Err(TransportError::Other(format!(
                "short bulk write: {written} of {} bytes",
                frame.len()
            )));
        }
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len.min(MAX_TRANSFER)];
        let n = self
            .handle
            .read_bulk(self.ep_in, &mut buf, self.timeout)
            .map_err(map_usb_err)?;
        buf.truncate(n);
        trace!("rx {n} bytes: {buf:02x?}");
        Ok(buf)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_usb_err_taxonomy() {
        assert!(matches!(
            map_usb_err(rusb::Error::Timeout),
            TransportError::Timeout
        ));
        assert!(matches!(
            map_usb_err(rusb::Error::Access),
            TransportError::PermissionDenied
        ));
        assert!(matches!(
            map_usb_err(rusb::Error::NoDevice),
            TransportError::DeviceNotFound
        ));
        assert!(matches!(
            map_usb_err(rusb::Error::Pipe),
            TransportError::Other(_)
        ));
    }

    #[test]
    fn test_open_without_device_fails_cleanly() {
        // No bootloader is attached in CI; this only checks we don't panic.
        let _ = UsbTransport::open();
    }
}
