//! The telemetry record published to listeners.
//!
//! `UpsMetrics` is an immutable snapshot of one poll cycle. The serialized
//! field names are a public contract: downstream JSON consumers (HTTP
//! republishers, script runners) key on them, so they follow the historical
//! wire format exactly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Operating state reported by the `S` status opcode.
///
/// `Unknown` is the zero value used when no status reply decoded; it
/// serializes to the empty string the wire format has always carried in
/// that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum UpsStatus {
    /// On line power
    #[serde(rename = "OL")]
    OnLine,
    /// On battery
    #[serde(rename = "OB")]
    OnBattery,
    /// Output off
    #[serde(rename = "OFF")]
    Off,
    /// Low battery (overrides every other state)
    #[serde(rename = "LB")]
    LowBattery,
    #[default]
    #[serde(rename = "")]
    Unknown,
}

impl UpsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsStatus::OnLine => "OL",
            UpsStatus::OnBattery => "OB",
            UpsStatus::Off => "OFF",
            UpsStatus::LowBattery => "LB",
            UpsStatus::Unknown => "",
        }
    }
}

impl fmt::Display for UpsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll-cycle snapshot of the UPS.
///
/// Fields left undecoded (missing or failed opcode reply) keep their zero
/// values; no partial record is ever discarded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpsMetrics {
    /// USB vendor id, four lowercase hex digits
    pub vendor_id: String,
    /// USB product id, four lowercase hex digits
    pub product_id: String,
    /// Manufacturer string descriptor, trimmed
    pub manufacturer: String,
    /// Product string with the upper-cased manufacturer prefix removed
    pub model: String,
    /// Serial number string descriptor, trimmed
    pub serial: String,
    /// Derived charge percentage (10-100, from the battery voltage curve)
    pub battery_charge: f64,
    /// Measured battery voltage (V), scaled to the pack nominal
    pub battery_voltage: f64,
    /// Nominal battery pack voltage (V), 6 V per reported cell group
    pub battery_voltage_nominal: f64,
    /// Firmware revision string (`F` opcode, non-printables elided)
    pub firmware_version: String,
    /// Measured input frequency (Hz), one decimal
    pub input_frequency: f64,
    /// Nominal input frequency (Hz): 50 or 60, 0 when unreported
    pub input_frequency_nominal: f64,
    /// Measured input voltage (V)
    pub input_voltage: f64,
    /// Maximum input voltage since last register reset (V)
    pub input_voltage_maximum: f64,
    /// Minimum input voltage since last register reset (V)
    pub input_voltage_minimum: f64,
    /// Device-reported nominal input voltage (V)
    pub input_voltage_nominal: f64,
    /// Output load percentage, clamped to 0-100
    pub load: u8,
    /// Number of switchable load banks (0-9)
    pub load_banks: u8,
    /// Power rating from the `P` opcode
    #[serde(rename = "PowerNominal")]
    pub power: u32,
    /// Unit of the power rating, fixed to "VA" when reported
    pub power_unit: String,
    /// Operating state (OL / OB / OFF / LB)
    pub status: UpsStatus,
    /// Ambient temperature (deg C), two decimals
    #[serde(rename = "TempC")]
    pub temperature_c: f64,
    /// Ambient temperature (deg F), two decimals
    #[serde(rename = "TempF")]
    pub temperature_f: f64,
    /// Unit id from the `U` opcode, decimal string
    pub unit_id: String,
    /// Snapshot instant
    #[serde(rename = "Time")]
    pub timestamp: DateTime<Utc>,
    /// Snapshot instant as Unix seconds
    pub unix_timestamp: i64,
}

impl UpsMetrics {
    /// Empty record stamped at the current instant.
    pub fn new() -> Self {
        let now = Utc::now();
        UpsMetrics {
            vendor_id: String::new(),
            product_id: String::new(),
            manufacturer: String::new(),
            model: String::new(),
            serial: String::new(),
            battery_charge: 0.0,
            battery_voltage: 0.0,
            battery_voltage_nominal: 0.0,
            firmware_version: String::new(),
            input_frequency: 0.0,
            input_frequency_nominal: 0.0,
            input_voltage: 0.0,
            input_voltage_maximum: 0.0,
            input_voltage_minimum: 0.0,
            input_voltage_nominal: 0.0,
            load: 0,
            load_banks: 0,
            power: 0,
            power_unit: String::new(),
            status: UpsStatus::Unknown,
            temperature_c: 0.0,
            temperature_f: 0.0,
            unit_id: String::new(),
            timestamp: now,
            unix_timestamp: now.timestamp(),
        }
    }
}

impl Default for UpsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(UpsStatus::OnLine.as_str(), "OL");
        assert_eq!(UpsStatus::OnBattery.as_str(), "OB");
        assert_eq!(UpsStatus::Off.as_str(), "OFF");
        assert_eq!(UpsStatus::LowBattery.as_str(), "LB");
        assert_eq!(UpsStatus::default(), UpsStatus::Unknown);
    }

    #[test]
    fn test_wire_field_names() {
        let mut m = UpsMetrics::new();
        m.vendor_id = "09ae".to_string();
        m.status = UpsStatus::OnLine;
        m.power = 1500;
        m.power_unit = "VA".to_string();
        m.temperature_c = 11.72;

        let json = serde_json::to_value(&m).unwrap();
        let obj = json.as_object().unwrap();

        // Downstream consumers key on these exact names.
        for key in [
            "VendorId",
            "ProductId",
            "Manufacturer",
            "Model",
            "Serial",
            "BatteryCharge",
            "BatteryVoltage",
            "BatteryVoltageNominal",
            "FirmwareVersion",
            "InputFrequency",
            "InputFrequencyNominal",
            "InputVoltage",
            "InputVoltageMaximum",
            "InputVoltageMinimum",
            "InputVoltageNominal",
            "Load",
            "LoadBanks",
            "PowerNominal",
            "PowerUnit",
            "Status",
            "TempC",
            "TempF",
            "UnitId",
            "Time",
            "UnixTimestamp",
        ] {
            assert!(obj.contains_key(key), "missing wire field {key}");
        }

        assert_eq!(obj["Status"], "OL");
        assert_eq!(obj["PowerNominal"], 1500);
        assert_eq!(obj["TempC"], 11.72);
    }

    #[test]
    fn test_unknown_status_serializes_empty() {
        let json = serde_json::to_value(UpsStatus::Unknown).unwrap();
        assert_eq!(json, "");
    }
}
