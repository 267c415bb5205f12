//! USB transport binding: libusb-backed control and bulk transfers.
//!
//! The driver talks to the chip through the [`UsbTransport`] trait so tests
//! can substitute a scripted transport for real hardware. [`RusbTransport`]
//! is the production implementation; it owns its libusb context outright —
//! there is no process-wide singleton.

use std::time::Duration;

use log::debug;
use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType, TransferType, UsbContext};

use crate::types::DiscoveredDevice;
use crate::RngError;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);
const BULK_TIMEOUT: Duration = Duration::from_millis(500);

/// Blocking USB operations against one open device.
///
/// Errors are propagated verbatim; retry policy belongs to the caller.
pub trait UsbTransport {
    /// Vendor-class control request, host to device, no data stage needed
    /// beyond `data`.
    fn control_out(&mut self, request: u8, value: u16, index: u16, data: &[u8])
        -> Result<(), RngError>;

    /// Vendor-class control request, device to host. Returns bytes read.
    fn control_in(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8])
        -> Result<usize, RngError>;

    /// Best-effort bulk write to the OUT endpoint. Returns bytes written.
    fn bulk_write(&mut self, data: &[u8]) -> Result<usize, RngError>;

    /// Best-effort bulk read from the IN endpoint. Returns bytes read;
    /// callers must handle partial transfers.
    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize, RngError>;

    /// Negotiated max packet size of the bulk IN endpoint.
    fn max_packet_size(&self) -> usize;
}

/// Production transport over libusb via `rusb`.
pub struct RusbTransport {
    handle: DeviceHandle<Context>,
    iface: u8,
    in_ep: u8,
    out_ep: u8,
    max_packet: usize,
}

impl RusbTransport {
    /// Open the first device matching `vendor_id:product_id`, claim its
    /// interface 0 and resolve its bulk endpoint pair.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self, RngError> {
        let context = Context::new()
            .map_err(|e| RngError::Transfer(format!("libusb context init failed: {e}")))?;
        let mut handle = context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or_else(|| RngError::DeviceNotFound(format!("{vendor_id:04x}:{product_id:04x}")))?;

        // Linux binds ftdi_sio to the chip; let libusb unbind it for us.
        let _ = handle.set_auto_detach_kernel_driver(true);

        let device = handle.device();
        let config = device
            .config_descriptor(0)
            .map_err(|e| RngError::Transfer(format!("reading configuration descriptor: {e}")))?;

        let mut bulk_in: Vec<(u8, usize)> = Vec::new();
        let mut bulk_out: Vec<u8> = Vec::new();
        for interface in config.interfaces() {
            if interface.number() != 0 {
                continue;
            }
            for desc in interface.descriptors() {
                if desc.setting_number() != 0 {
                    continue;
                }
                for ep in desc.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match ep.direction() {
                        Direction::In => bulk_in.push((ep.address(), ep.max_packet_size() as usize)),
                        Direction::Out => bulk_out.push(ep.address()),
                    }
                }
            }
        }
        let (in_ep, max_packet) = match bulk_in.as_slice() {
            [ep] => *ep,
            other => {
                return Err(RngError::EndpointResolution(format!(
                    "expected exactly one bulk-in endpoint, found {}",
                    other.len()
                )))
            }
        };
        let out_ep = match bulk_out.as_slice() {
            [ep] => *ep,
            other => {
                return Err(RngError::EndpointResolution(format!(
                    "expected exactly one bulk-out endpoint, found {}",
                    other.len()
                )))
            }
        };

        if let Err(e) = handle.set_active_configuration(1) {
            debug!("set_active_configuration(1) skipped: {e}");
        }
        handle
            .claim_interface(0)
            .map_err(|e| RngError::Transfer(format!("claiming interface 0: {e}")))?;

        debug!(
            "opened {vendor_id:04x}:{product_id:04x}, bulk in {in_ep:#04x} (max packet {max_packet}), bulk out {out_ep:#04x}"
        );
        Ok(Self { handle, iface: 0, in_ep, out_ep, max_packet })
    }
}

impl UsbTransport for RusbTransport {
    fn control_out(&mut self, request: u8, value: u16, index: u16, data: &[u8])
        -> Result<(), RngError>
    {
        let rt = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(rt, request, value, index, data, CONTROL_TIMEOUT)
            .map(drop)
            .map_err(|e| RngError::Transfer(format!("control request {request:#04x} failed: {e}")))
    }

    fn control_in(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8])
        -> Result<usize, RngError>
    {
        let rt = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        self.handle
            .read_control(rt, request, value, index, buf, CONTROL_TIMEOUT)
            .map_err(|e| RngError::Transfer(format!("control request {request:#04x} failed: {e}")))
    }

    fn bulk_write(&mut self, data: &[u8]) -> Result<usize, RngError> {
        self.handle
            .write_bulk(self.out_ep, data, BULK_TIMEOUT)
            .map_err(|e| RngError::Transfer(format!("bulk write failed: {e}")))
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize, RngError> {
        self.handle
            .read_bulk(self.in_ep, buf, BULK_TIMEOUT)
            .map_err(|e| RngError::Transfer(format!("bulk read failed: {e}")))
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.iface) {
            debug!("releasing interface {}: {e}", self.iface);
        }
        // Handle and context close in order as the remaining fields drop.
    }
}

/// Enumerate connected devices matching `vendor_id:product_id`.
///
/// Zero matches is an empty list, not an error; only enumeration itself can
/// fail. Descriptor fields are best effort — the friendly name needs a
/// string-descriptor read that unprivileged processes may be denied.
pub fn list_devices(vendor_id: u16, product_id: u16) -> Result<Vec<DiscoveredDevice>, RngError> {
    let context = Context::new()
        .map_err(|e| RngError::Transfer(format!("libusb context init failed: {e}")))?;
    let devices = context
        .devices()
        .map_err(|e| RngError::Transfer(format!("USB enumeration failed: {e}")))?;

    let mut found = Vec::new();
    for device in devices.iter() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if desc.vendor_id() != vendor_id || desc.product_id() != product_id {
            continue;
        }

        let mut device_path = format!("bus {:03} device {:03}", device.bus_number(), device.address());
        if let Ok(ports) = device.port_numbers() {
            if !ports.is_empty() {
                let chain: Vec<String> = ports.iter().map(u8::to_string).collect();
                device_path.push_str(&format!(" port {}", chain.join(".")));
            }
        }
        let friendly_name = device
            .open()
            .ok()
            .and_then(|h| h.read_product_string_ascii(&desc).ok());

        found.push(DiscoveredDevice {
            device_path,
            hardware_ids: vec![format!("{:04x}:{:04x}", desc.vendor_id(), desc.product_id())],
            friendly_name,
        });
    }
    Ok(found)
}
