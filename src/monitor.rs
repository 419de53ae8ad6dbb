//! SmartPro monitor session: probe, command exchange, metric assembly.
//!
//! A [`MonitorSession`] is the sole owner of the device transport. It is
//! created by opening the device, probing the in-band protocol id, and
//! resolving the descriptor identity; it is destroyed by [`close`]
//! (or drop), which releases the interface, re-attaches the kernel driver
//! where possible, and resets the device.
//!
//! The link is half-duplex: exactly one command is in flight at a time, and
//! nothing else may drive the transport while a poll stream is running.

use crate::config::UsbConfig;
use crate::error::{Error, Result};
use crate::metrics::UpsMetrics;
use crate::protocol::{decode, frame};
use crate::transport::{DeviceInfo, Transport, UsbHidTransport};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Opcode cycle issued by every [`MonitorSession::get_stats`] call, in order.
pub const POLL_OPCODES: [u8; 9] = [b'D', b'F', b'L', b'M', b'P', b'S', b'T', b'U', b'V'];

/// Clears the device's min/max input voltage registers.
const RESET_VOLTAGE_OPCODE: u8 = b'Z';

const DEFAULT_READ_RETRIES: u32 = 10;

pub struct MonitorSession {
    transport: Box<dyn Transport>,
    info: DeviceInfo,
    protocol: u16,
    protocol_name: &'static str,
    read_retries: u32,
    streaming: Arc<AtomicBool>,
    /// Latch: the 'Z' self-heal fires at most once per session lifetime.
    voltage_reset_sent: bool,
}

impl std::fmt::Debug for MonitorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSession")
            .field("info", &self.info)
            .field("protocol", &self.protocol)
            .field("protocol_name", &self.protocol_name)
            .field("read_retries", &self.read_retries)
            .field("streaming", &self.streaming)
            .field("voltage_reset_sent", &self.voltage_reset_sent)
            .finish()
    }
}

impl MonitorSession {
    /// Open the device, claim its interface, and probe the protocol.
    ///
    /// Any failure drops the transport (running the full close sequence)
    /// and surfaces the error; no half-open session is ever returned.
    pub fn open(vid: u16, pid: u16, cfg: &UsbConfig) -> Result<Self> {
        let (transport, info) = UsbHidTransport::open(vid, pid, cfg)?;
        Self::init(Box::new(transport), info, cfg.read_retries)
    }

    /// Build a session over an already-open transport. Used by tests to
    /// drive the session through a scripted mock.
    pub fn with_transport(transport: Box<dyn Transport>, info: DeviceInfo) -> Result<Self> {
        Self::init(transport, info, DEFAULT_READ_RETRIES)
    }

    fn init(transport: Box<dyn Transport>, info: DeviceInfo, read_retries: u32) -> Result<Self> {
        let mut session = MonitorSession {
            transport,
            info,
            protocol: 0,
            protocol_name: "",
            read_retries,
            streaming: Arc::new(AtomicBool::new(false)),
            voltage_reset_sent: false,
        };

        let reply = session.send_command(&[0x00])?;
        session.protocol = decode::protocol_id(&reply);
        session.protocol_name = decode::protocol_name(session.protocol);
        if session.protocol_name.is_empty() {
            log::warn!("unrecognized protocol id 0x{:04X}", session.protocol);
        } else {
            log::debug!(
                "device speaks {} (0x{:04X})",
                session.protocol_name,
                session.protocol
            );
        }

        Ok(session)
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    /// Protocol family name; empty for unrecognized devices.
    pub fn protocol_name(&self) -> &'static str {
        self.protocol_name
    }

    /// Send a framed command and wait for the echoed reply.
    ///
    /// The device echoes the opcode at byte 0 of a full 8-byte interrupt
    /// packet; anything else is discarded and the read retried. Exhausting
    /// the retries yields [`Error::ResponseMismatch`]; an unmatched packet
    /// is never returned as a reply.
    pub fn send_command(&mut self, cmd: &[u8]) -> Result<Vec<u8>> {
        let report = frame::encode_command(cmd)?;
        self.transport.send_report(0, &report)?;

        // One spare byte so a device that pads its packet doesn't fault
        // the transfer.
        let mut reply = vec![0u8; frame::FRAME_LEN + 1];
        for attempt in 0..self.read_retries {
            match self.transport.read_interrupt(&mut reply) {
                Ok(n) if n == frame::FRAME_LEN && reply[0] == report[1] => return Ok(reply),
                Ok(n) => log::debug!("discarding reply of {n} bytes (attempt {attempt})"),
                Err(e) => log::debug!("interrupt read failed (attempt {attempt}): {e}"),
            }
        }

        Err(Error::ResponseMismatch {
            opcode: cmd[0],
            retries: self.read_retries,
        })
    }

    /// Send a single opcode.
    pub fn send_code(&mut self, code: u8) -> Result<Vec<u8>> {
        self.send_command(&[code])
    }

    /// Clear the min/max input voltage registers. Non-persistent; the only
    /// write-path command this monitor ever issues.
    pub fn reset_input_voltage(&mut self) -> Result<()> {
        self.send_code(RESET_VOLTAGE_OPCODE).map(|_| ())
    }

    /// The register is known to read zero until its first reset after
    /// power-up; clearing it once brings the minimum tracking to life.
    fn try_reset_input_voltage(&mut self) {
        if self.voltage_reset_sent {
            return;
        }
        self.voltage_reset_sent = true;

        log::info!("input voltage minimum reads zero, resetting min/max registers");
        if let Err(e) = self.reset_input_voltage() {
            log::error!("failed to reset input voltage reading: {e}");
        }
    }

    /// Poll every telemetry opcode and assemble a metrics snapshot.
    ///
    /// Commands are issued strictly one at a time. A failed command is
    /// logged and its fields stay at their zero values; the partial record
    /// is still returned. Only a cycle where *every* opcode fails (total
    /// communication loss) returns an error.
    pub fn get_stats(&mut self) -> Result<UpsMetrics> {
        let mut metrics = UpsMetrics::new();

        let mut replies: HashMap<u8, Vec<u8>> = HashMap::new();
        for &code in &POLL_OPCODES {
            match self.send_code(code) {
                Ok(reply) => {
                    replies.insert(code, reply);
                }
                Err(e) => log::error!("command '{}' failed: {e}", code as char),
            }
        }

        if replies.is_empty() {
            return Err(Error::StreamError(
                "no opcode in the poll cycle produced a reply".to_string(),
            ));
        }

        metrics.manufacturer = self.info.manufacturer.clone();
        metrics.model = self
            .info
            .product
            .replacen(&self.info.manufacturer.to_uppercase(), "", 1)
            .trim()
            .to_string();
        metrics.serial = self.info.serial.clone();
        metrics.vendor_id = format!("{:04x}", self.info.vendor_id);
        metrics.product_id = format!("{:04x}", self.info.product_id);

        if let Some(data) = replies.get(&b'F') {
            metrics.firmware_version = decode::firmware_version(data);
        }

        if let Some(data) = replies.get(&b'U') {
            metrics.unit_id = decode::unit_id(data);
        }

        if let Some(data) = replies.get(&b'L') {
            metrics.load = decode::load_percent(data);
        }

        if let Some(data) = replies.get(&b'T') {
            let (frequency, nominal) = decode::input_frequency(data);
            metrics.input_frequency = frequency;
            metrics.input_frequency_nominal = nominal;

            let temp = decode::temperature(data);
            metrics.temperature_c = temp.celsius;
            metrics.temperature_f = temp.fahrenheit;
        }

        if let Some(data) = replies.get(&b'S') {
            metrics.status = decode::status(data);
        }

        // Ratings come first: the drain and min/max scaling depend on them.
        let ratings = replies
            .get(&b'V')
            .map(|data| decode::voltage_ratings(data))
            .unwrap_or_default();
        metrics.load_banks = ratings.load_banks;
        metrics.input_voltage_nominal = ratings.input_nominal;
        metrics.battery_voltage_nominal = ratings.battery_nominal;

        if let Some(data) = replies.get(&b'D') {
            let drain = decode::drain(data, &ratings);
            metrics.input_voltage = drain.input_voltage;
            metrics.battery_voltage = drain.battery_voltage;
            metrics.battery_charge = drain.battery_charge;
        }

        if let Some(data) = replies.get(&b'M') {
            let range = decode::min_max(data, &ratings);
            metrics.input_voltage_minimum = range.minimum;
            metrics.input_voltage_maximum = range.maximum;
            if range.minimum <= 0.0 {
                self.try_reset_input_voltage();
            }
        }

        if let Some(data) = replies.get(&b'P') {
            metrics.power = decode::power_rating(data);
            metrics.power_unit = "VA".to_string();
        }

        Ok(metrics)
    }

    /// Shared handle to the streaming flag, for the polling pipeline.
    pub(crate) fn streaming_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Ask a running poll stream to stop. The stream thread observes the
    /// flag within one 50 ms slice.
    pub fn close_stream(&self) {
        self.streaming.store(false, Ordering::SeqCst);
    }

    /// Close the session: stop any stream, then release the interface,
    /// re-attach the kernel driver where possible, and reset the device
    /// (performed by the transport as it drops).
    pub fn close(self) {}
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.streaming.store(false, Ordering::SeqCst);
        // Transport drop runs the release/re-attach/reset sequence.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::UpsStatus;
    use crate::transport::MockTransport;

    fn scripted_transport() -> MockTransport {
        let mock = MockTransport::new();
        mock.set_reply(0x00, &[0x00, 0x30, 0x03]);
        mock.set_reply(b'D', &[b'D', b'6', b'4', b'0', b'7', b'A']);
        mock.set_reply(b'F', &[b'F', 0x02, b'S', b'P', b'R', b'O', b'1']);
        mock.set_reply(b'L', &[b'L', b'2', b'3']);
        mock.set_reply(b'M', &[b'M', b'6', b'0', b'6', b'8']);
        mock.set_reply(b'P', &[b'P', b'1', b'5', b'0', b'0', b'X']);
        mock.set_reply(b'S', &[b'S', b'1', b'X', b'X', 0x00]);
        mock.set_reply(b'T', &[b'T', b'5', b'A', b'1', b'F', b'4', b'1']);
        mock.set_reply(b'U', &[b'U', 0x30, 0x39]);
        mock.set_reply(b'V', &[b'V', b'1', b'0', b'2', b'4']);
        mock
    }

    fn device_info() -> DeviceInfo {
        DeviceInfo {
            vendor_id: 0x09AE,
            product_id: 0x0001,
            manufacturer: "Tripp Lite".to_string(),
            product: "TRIPP LITE SMART2200".to_string(),
            serial: "123456".to_string(),
            max_packet_size: 8,
        }
    }

    fn open_session(mock: &MockTransport) -> MonitorSession {
        MonitorSession::with_transport(Box::new(mock.clone()), device_info()).unwrap()
    }

    #[test]
    fn test_probe_recognizes_smartpro() {
        let mock = scripted_transport();
        let session = open_session(&mock);
        assert_eq!(session.protocol(), 0x3003);
        assert_eq!(session.protocol_name(), "SMARTPRO");
    }

    #[test]
    fn test_probe_tolerates_unknown_protocol() {
        let mock = scripted_transport();
        mock.set_reply(0x00, &[0x00, 0x20, 0x01]);
        let session = open_session(&mock);
        assert_eq!(session.protocol(), 0x2001);
        assert_eq!(session.protocol_name(), "");
    }

    #[test]
    fn test_init_fails_without_probe_reply() {
        let mock = MockTransport::new();
        let err = MonitorSession::with_transport(Box::new(mock), device_info()).unwrap_err();
        assert!(matches!(
            err,
            Error::ResponseMismatch { opcode: 0x00, .. }
        ));
    }

    #[test]
    fn test_get_stats_full_record() {
        let mock = scripted_transport();
        let mut session = open_session(&mock);
        let metrics = session.get_stats().unwrap();

        assert_eq!(metrics.vendor_id, "09ae");
        assert_eq!(metrics.product_id, "0001");
        assert_eq!(metrics.manufacturer, "Tripp Lite");
        assert_eq!(metrics.model, "SMART2200");
        assert_eq!(metrics.serial, "123456");
        assert_eq!(metrics.firmware_version, "SPRO1");
        assert_eq!(metrics.unit_id, "12345");
        assert_eq!(metrics.load, 0x23);
        assert_eq!(metrics.load_banks, 4);
        assert_eq!(metrics.status, UpsStatus::OnLine);
        assert_eq!(metrics.input_frequency, 50.0);
        assert_eq!(metrics.input_frequency_nominal, 60.0);
        assert_eq!(metrics.temperature_c, 11.72);
        assert_eq!(metrics.temperature_f, 53.1);
        assert_eq!(metrics.input_voltage_nominal, 120.0);
        assert_eq!(metrics.battery_voltage_nominal, 12.0);
        assert_eq!(metrics.input_voltage, 100.0);
        assert_eq!(metrics.battery_voltage, 0.7);
        assert_eq!(metrics.battery_charge, 10.0);
        assert_eq!(metrics.input_voltage_minimum, 96.0);
        assert_eq!(metrics.input_voltage_maximum, 104.0);
        assert_eq!(metrics.power, 1500);
        assert_eq!(metrics.power_unit, "VA");
        assert_eq!(metrics.unix_timestamp, metrics.timestamp.timestamp());
    }

    #[test]
    fn test_get_stats_partial_on_dead_opcode() {
        let mock = scripted_transport();
        mock.clear_reply(b'L');
        let mut session = open_session(&mock);

        let metrics = session.get_stats().unwrap();
        assert_eq!(metrics.load, 0);
        // The rest of the record still decodes.
        assert_eq!(metrics.firmware_version, "SPRO1");
        assert_eq!(metrics.power, 1500);
    }

    #[test]
    fn test_get_stats_fails_on_total_loss() {
        let mock = scripted_transport();
        let mut session = open_session(&mock);
        for &code in &POLL_OPCODES {
            mock.clear_reply(code);
        }

        let err = session.get_stats().unwrap_err();
        assert!(matches!(err, Error::StreamError(_)));
    }

    #[test]
    fn test_self_heal_at_most_once() {
        let mock = scripted_transport();
        // Minimum register stuck at zero on every cycle.
        mock.set_reply(b'M', &[b'M', b'0', b'0', b'6', b'8']);
        mock.set_reply(b'Z', &[b'Z']);
        let mut session = open_session(&mock);

        for _ in 0..3 {
            let metrics = session.get_stats().unwrap();
            assert_eq!(metrics.input_voltage_minimum, 0.0);
        }

        let resets = mock
            .sent_opcodes()
            .iter()
            .filter(|&&op| op == RESET_VOLTAGE_OPCODE)
            .count();
        assert_eq!(resets, 1);
    }

    #[test]
    fn test_send_command_mismatch_after_retries() {
        let mock = scripted_transport();
        let mut session = open_session(&mock);

        let err = session.send_code(b'Q').unwrap_err();
        assert!(matches!(
            err,
            Error::ResponseMismatch {
                opcode: b'Q',
                retries: 10
            }
        ));
    }

    #[test]
    fn test_framed_command_on_wire() {
        let mock = scripted_transport();
        let mut session = open_session(&mock);
        let _ = session.send_code(b'D').unwrap();

        let frames = mock.sent_frames();
        let frame = frames.last().unwrap();
        assert_eq!(frame[0], b':');
        assert_eq!(frame[1], b'D');
        assert_eq!(frame[2], 0xFF - b'D');
        assert_eq!(frame[3], b'\r');
    }
}
