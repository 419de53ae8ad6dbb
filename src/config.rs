//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! ```toml
//! [device]
//! vendor_id = 0x09AE
//! product_id = 0x0001
//!
//! [usb]
//! interface = 0
//! endpoint = 0x81
//! tx_timeout_ms = 5000
//! rx_timeout_ms = 1000
//! claim_retries = 10
//! read_retries = 10
//!
//! [poll]
//! delay_ms = 5000
//! history_limit = 1000
//! ```
//!
//! Every field has a default matching the known Tripp Lite SmartPro ids and
//! the timings the hardware was characterized with, so an empty file (or no
//! file at all) yields a working configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// USB identity of the monitored device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// USB vendor id
    ///
    /// **Default**: 0x09AE (Tripp Lite)
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,

    /// USB product id
    ///
    /// **Default**: 0x0001 (SmartPro family)
    #[serde(default = "default_product_id")]
    pub product_id: u16,
}

fn default_vendor_id() -> u16 {
    0x09AE
}
fn default_product_id() -> u16 {
    0x0001
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
        }
    }
}

/// Transport tuning for the HID interface.
#[derive(Debug, Clone, Deserialize)]
pub struct UsbConfig {
    /// HID interface number
    ///
    /// **Default**: 0 (the only interface SmartPro units expose)
    #[serde(default)]
    pub interface: u8,

    /// Interrupt IN endpoint address; bit 7 must be set
    ///
    /// **Default**: 0x81
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,

    /// Control transfer (Set_Report) timeout
    ///
    /// **Units**: Milliseconds. **Default**: 5000
    #[serde(default = "default_tx_timeout_ms")]
    pub tx_timeout_ms: u64,

    /// Per-attempt interrupt read timeout
    ///
    /// **Units**: Milliseconds. **Default**: 1000
    #[serde(default = "default_rx_timeout_ms")]
    pub rx_timeout_ms: u64,

    /// Interface claim retries after a reset, at 1 s intervals
    ///
    /// **Default**: 10
    #[serde(default = "default_retries")]
    pub claim_retries: u32,

    /// Interrupt read attempts per command before giving up
    ///
    /// **Default**: 10
    #[serde(default = "default_retries")]
    pub read_retries: u32,
}

fn default_endpoint() -> u8 {
    0x81
}
fn default_tx_timeout_ms() -> u64 {
    5000
}
fn default_rx_timeout_ms() -> u64 {
    1000
}
fn default_retries() -> u32 {
    10
}

impl Default for UsbConfig {
    fn default() -> Self {
        UsbConfig {
            interface: 0,
            endpoint: default_endpoint(),
            tx_timeout_ms: default_tx_timeout_ms(),
            rx_timeout_ms: default_rx_timeout_ms(),
            claim_retries: default_retries(),
            read_retries: default_retries(),
        }
    }
}

impl UsbConfig {
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    pub fn rx_timeout(&self) -> Duration {
        Duration::from_millis(self.rx_timeout_ms)
    }
}

/// Polling cadence and history depth.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Delay between poll cycles
    ///
    /// **Units**: Milliseconds. **Default**: 5000. Values below the 50 ms
    /// floor are clamped up by the stream.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Number of records the history sink retains
    ///
    /// **Default**: 1000
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_delay_ms() -> u64 {
    5000
}
fn default_history_limit() -> usize {
    1000
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            delay_ms: default_delay_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl PollConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub usb: UsbConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Validation
    ///
    /// - `endpoint` must be an IN endpoint (bit 7 set)
    /// - timeouts and retry counts must be non-zero
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;

        let config: Config = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.usb.endpoint & 0x80 == 0 {
            return Err(Error::Config(format!(
                "endpoint 0x{:02X} is not an IN endpoint",
                self.usb.endpoint
            )));
        }
        if self.usb.tx_timeout_ms == 0 || self.usb.rx_timeout_ms == 0 {
            return Err(Error::Config("USB timeouts must be non-zero".to_string()));
        }
        if self.usb.claim_retries == 0 || self.usb.read_retries == 0 {
            return Err(Error::Config("retry counts must be non-zero".to_string()));
        }
        Ok(())
    }
}
