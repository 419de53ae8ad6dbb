//! USB HID transport backed by libusb.
//!
//! SmartPro units expose a vendor-specific HID interface: commands go out
//! as 8-byte feature reports (SET_REPORT control transfers) and replies
//! arrive on the interrupt IN endpoint. The kernel's generic HID driver
//! grabs the interface at enumeration, and a previous monitor that died
//! without releasing it leaves the claim wedged, hence the
//! release/reset/retry dance in [`claim_interface`].

use super::{DeviceInfo, Transport};
use crate::config::UsbConfig;
use crate::error::{Error, Result};
use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use std::thread;
use std::time::Duration;

/// HID class SET_REPORT request.
const SET_REPORT: u8 = 0x09;

/// Report type for feature reports, shifted into the high byte of wValue.
const FEATURE_REPORT: u16 = 0x03;

const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(1);

/// USB HID transport for a claimed SmartPro interface.
///
/// Dropping the transport runs the close sequence: release the interface,
/// re-attach the kernel driver (best effort), reset the device.
pub struct UsbHidTransport {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoint: u8,
    tx_timeout: Duration,
    rx_timeout: Duration,
}

impl UsbHidTransport {
    /// Open the device by vendor/product id and claim its HID interface.
    ///
    /// Returns the transport together with the identity read from the
    /// device descriptors. Missing string descriptors are tolerated and
    /// resolve to empty strings.
    pub fn open(vid: u16, pid: u16, cfg: &UsbConfig) -> Result<(Self, DeviceInfo)> {
        let context = Context::new()
            .map_err(|e| Error::TransportUnavailable(format!("failed to create USB context: {e}")))?;

        log::debug!("opening device {vid:04x}:{pid:04x}");
        let mut handle = context.open_device_with_vid_pid(vid, pid).ok_or_else(|| {
            Error::TransportUnavailable(format!("no device {vid:04x}:{pid:04x} found"))
        })?;

        let descriptor = handle.device().device_descriptor().map_err(|e| {
            Error::TransportUnavailable(format!("failed to read device descriptor: {e}"))
        })?;

        let info = DeviceInfo {
            vendor_id: vid,
            product_id: pid,
            manufacturer: read_string_or_default(&handle, descriptor.manufacturer_string_index()),
            product: read_string_or_default(&handle, descriptor.product_string_index()),
            serial: read_string_or_default(&handle, descriptor.serial_number_string_index()),
            max_packet_size: descriptor.max_packet_size(),
        };

        claim_interface(&mut handle, cfg.interface, cfg.claim_retries)?;

        Ok((
            UsbHidTransport {
                handle,
                interface: cfg.interface,
                endpoint: cfg.endpoint,
                tx_timeout: cfg.tx_timeout(),
                rx_timeout: cfg.rx_timeout(),
            },
            info,
        ))
    }
}

fn read_string_or_default(handle: &DeviceHandle<Context>, index: Option<u8>) -> String {
    match index {
        Some(index) => handle
            .read_string_descriptor_ascii(index)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        None => String::new(),
    }
}

/// Claim the HID interface, tolerating a wedged claim from a prior
/// ungraceful exit.
///
/// A failed first attempt releases the interface and resets the device,
/// then retries once per second. Kernel-driver auto-detach is requested in
/// between; it is advisory and only warned about on failure. On exhaustion
/// the error carries both the initial claim error and the last retry error.
fn claim_interface(handle: &mut DeviceHandle<Context>, interface: u8, retries: u32) -> Result<()> {
    let first_err = match handle.claim_interface(interface) {
        Ok(()) => None,
        Err(e) => Some(e),
    };

    if let Some(e) = first_err {
        log::warn!("cannot claim interface {interface}, resetting device: {e}");
        if let Err(e) = handle.release_interface(interface) {
            log::debug!("interface release failed: {e}");
        }
        if let Err(e) = handle.reset() {
            log::warn!("device reset failed: {e}");
        }
    }

    if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
        log::warn!("failed to enable kernel driver auto-detach: {e}");
    }

    let Some(first_err) = first_err else {
        log::debug!("claimed interface {interface}");
        return Ok(());
    };

    let mut last_err = first_err;
    for attempt in 1..=retries {
        thread::sleep(CLAIM_RETRY_DELAY);
        match handle.claim_interface(interface) {
            Ok(()) => {
                log::debug!("claimed interface {interface} after reset (attempt {attempt})");
                return Ok(());
            }
            Err(e) => last_err = e,
        }
    }

    Err(Error::TransportUnavailable(format!(
        "failed to claim interface {interface} after {retries} retries \
         (initial error: {first_err}, last error: {last_err})"
    )))
}

impl Transport for UsbHidTransport {
    fn send_report(&mut self, report_id: u16, msg: &[u8]) -> Result<()> {
        // Host-to-device, class request, interface recipient: 0x21.
        let request_type = rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        let value = report_id | (FEATURE_REPORT << 8);

        let sent = self
            .handle
            .write_control(request_type, SET_REPORT, value, 0, msg, self.tx_timeout)?;
        if sent != msg.len() {
            return Err(Error::ShortWrite {
                sent,
                expected: msg.len(),
            });
        }
        Ok(())
    }

    fn read_interrupt(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.handle.read_interrupt(self.endpoint, buf, self.rx_timeout)?)
    }
}

impl Drop for UsbHidTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            log::debug!("interface release on close failed: {e}");
        }
        match self.handle.kernel_driver_active(self.interface) {
            Ok(false) => {
                if let Err(e) = self.handle.attach_kernel_driver(self.interface) {
                    log::debug!("kernel driver re-attach failed: {e}");
                }
            }
            Ok(true) => {}
            Err(e) => log::debug!("kernel driver query failed: {e}"),
        }
        if let Err(e) = self.handle.reset() {
            log::debug!("device reset on close failed: {e}");
        }
    }
}
