//! Transport layer for device I/O abstraction.

use crate::error::Result;

mod mock;
mod usb;

pub use mock::MockTransport;
pub use usb::UsbHidTransport;

/// Identity captured from the USB descriptors at open time.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Manufacturer string descriptor, trimmed; empty when absent
    pub manufacturer: String,
    /// Product string descriptor, trimmed; empty when absent
    pub product: String,
    /// Serial number string descriptor, trimmed; empty when absent
    pub serial: String,
    /// Endpoint-zero max packet size from the device descriptor
    pub max_packet_size: u8,
}

/// Byte-level contract the monitor session drives.
///
/// The SmartPro link is half-duplex: one report out, then interrupt packets
/// polled until one echoes the opcode. Retry and matching policy belong to
/// the session; implementations only move bytes.
pub trait Transport: Send {
    /// Deliver one feature report to the device. Implementations must write
    /// the full report or fail with `ShortWrite`.
    fn send_report(&mut self, report_id: u16, msg: &[u8]) -> Result<()>;

    /// Read one interrupt packet into `buf`, returning the byte count.
    /// Blocks up to the per-attempt receive timeout.
    fn read_interrupt(&mut self, buf: &mut [u8]) -> Result<usize>;
}
