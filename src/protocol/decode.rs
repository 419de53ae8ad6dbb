//! Field decoders for SmartPro telemetry replies.
//!
//! Each opcode has a fixed reply contract: hexadecimal ASCII fields at known
//! offsets of the 8-byte packet. Parsing is deliberately lenient: an
//! unparseable field yields 0, matching how the firmware occasionally
//! glitches a digit without the rest of the reply being unusable.
//!
//! The non-obvious rules live here so they are testable in isolation: the
//! 208 V nominal / 230 V scale pairing, the square-root battery charge
//! curve over the 12-V-normalized reading, and the low-battery status
//! override.

use crate::metrics::UpsStatus;
use std::ops::Range;

/// In-band protocol id reported by SmartPro family devices.
pub const SMARTPRO_PROTOCOL: u16 = 0x3003;

/// Charge curve saturation points, in 12-V-equivalent volts.
const CHARGE_FULL_VOLTS: f64 = 13.4;
const CHARGE_FLOOR_VOLTS: f64 = 11.0;

/// Reference voltage all measured-input scaling divides by.
const SCALE_BASE_VOLTS: f64 = 120.0;

/// Parse a hexadecimal ASCII field, yielding 0 when absent or malformed.
fn hex_field(data: &[u8], range: Range<usize>) -> u32 {
    data.get(range)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|raw| u32::from_str_radix(raw, 16).ok())
        .unwrap_or(0)
}

/// Round to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Protocol id from the probe reply: 16-bit big-endian at bytes 1..=2.
pub fn protocol_id(data: &[u8]) -> u16 {
    let high = data.get(1).copied().unwrap_or(0);
    let low = data.get(2).copied().unwrap_or(0);
    (u16::from(high) << 8) | u16::from(low)
}

/// Family name for a protocol id; empty for unrecognized ids.
pub fn protocol_name(protocol: u16) -> &'static str {
    match protocol {
        SMARTPRO_PROTOCOL => "SMARTPRO",
        _ => "",
    }
}

/// Firmware revision: bytes 1..7 with non-printables replaced by `'.'`,
/// then trimmed of surrounding dots.
pub fn firmware_version(data: &[u8]) -> String {
    let end = data.len().min(7);
    if end <= 1 {
        return String::new();
    }
    let cleaned: String = data[1..end]
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect();
    cleaned.trim_matches('.').to_string()
}

/// Unit id: 16-bit big-endian at bytes 1..=2, as a decimal string.
pub fn unit_id(data: &[u8]) -> String {
    let high = data.get(1).copied().unwrap_or(0);
    let low = data.get(2).copied().unwrap_or(0);
    ((u16::from(high) << 8) | u16::from(low)).to_string()
}

/// Output load percentage, clamped into 0..=100.
///
/// Two hex digits can reach 255; the device never reports above 100, so
/// anything larger is treated as a glitched reading.
pub fn load_percent(data: &[u8]) -> u8 {
    hex_field(data, 1..3).min(100) as u8
}

/// Measured and nominal input frequency from the `T` reply.
///
/// The measured value is reported in tenths of a hertz; the nominal code at
/// byte 6 selects 50 or 60 Hz, anything else reads as 0 (unreported).
pub fn input_frequency(data: &[u8]) -> (f64, f64) {
    let frequency = f64::from(hex_field(data, 3..6)) / 10.0;
    let nominal = match data.get(6) {
        Some(b'0') => 50.0,
        Some(b'1') => 60.0,
        _ => 0.0,
    };
    (frequency, nominal)
}

/// Temperature reading decoded from the `T` reply.
#[derive(Debug, Clone, Copy)]
pub struct TemperatureReading {
    pub celsius: f64,
    pub fahrenheit: f64,
}

/// Ambient temperature: `raw * 0.3636 - 21.0` in Celsius.
///
/// Fahrenheit is derived from the unrounded Celsius value; both are rounded
/// to 1/100 independently.
pub fn temperature(data: &[u8]) -> TemperatureReading {
    let raw = f64::from(hex_field(data, 1..3));
    let celsius = raw * 0.3636 - 21.0;
    TemperatureReading {
        celsius: round2(celsius),
        fahrenheit: round2(celsius * 9.0 / 5.0 + 32.0),
    }
}

/// Operating state from the `S` reply.
///
/// Byte 4 is a bitfield: bit 2 means output off, bit 0 means on battery,
/// neither means on line. Byte 1 equal to ASCII `'0'` signals low battery
/// and overrides whatever the bitfield said.
pub fn status(data: &[u8]) -> UpsStatus {
    let flags = data.get(4).copied().unwrap_or(0);
    let mut status = if flags & 4 != 0 {
        UpsStatus::Off
    } else if flags & 1 != 0 {
        UpsStatus::OnBattery
    } else {
        UpsStatus::OnLine
    };
    if data.get(1) == Some(&b'0') {
        status = UpsStatus::LowBattery;
    }
    status
}

/// Nominal ratings decoded from the `V` reply.
///
/// `input_scale` is the reference used to scale every measured input
/// voltage; it equals the nominal except for 208 V units, which report
/// measurements against the 230 V reference.
#[derive(Debug, Clone, Copy)]
pub struct VoltageRatings {
    pub input_nominal: f64,
    pub input_scale: f64,
    pub battery_nominal: f64,
    pub load_banks: u8,
}

impl Default for VoltageRatings {
    fn default() -> Self {
        VoltageRatings {
            input_nominal: 120.0,
            input_scale: 120.0,
            battery_nominal: 12.0,
            load_banks: 0,
        }
    }
}

/// Nominal/scale pair for a `V[1]` voltage code. Unknown codes keep the
/// 120/120 default.
pub fn nominal_and_scale(code: u8) -> Option<(f64, f64)> {
    match code {
        b'0' => Some((100.0, 100.0)),
        b'1' => Some((120.0, 120.0)),
        b'2' => Some((230.0, 230.0)),
        b'3' => Some((208.0, 230.0)),
        _ => None,
    }
}

pub fn voltage_ratings(data: &[u8]) -> VoltageRatings {
    let mut ratings = VoltageRatings::default();

    // 6 V per reported cell group. Overwritten unconditionally when a `V`
    // reply is in hand, even if the digits glitched to zero.
    ratings.battery_nominal = f64::from(hex_field(data, 2..4)) * 6.0;

    let code = data.get(1).copied().unwrap_or(0);
    if let Some((nominal, scale)) = nominal_and_scale(code) {
        ratings.input_nominal = nominal;
        ratings.input_scale = scale;
    }

    if let Some(&banks) = data.get(4)
        && banks.is_ascii_digit()
    {
        ratings.load_banks = banks - b'0';
    }

    ratings
}

/// Charge percentage for a 12-V-normalized battery voltage reading.
///
/// Saturates at 100 % above 13.4 V and at 10 % below 11.0 V; between the
/// two the curve is a square-root interpolation, rounded to 1/100.
pub fn battery_charge(bv_12v: f64) -> f64 {
    if bv_12v >= CHARGE_FULL_VOLTS {
        100.0
    } else if bv_12v <= CHARGE_FLOOR_VOLTS {
        10.0
    } else {
        let fraction = (bv_12v - CHARGE_FLOOR_VOLTS) / (CHARGE_FULL_VOLTS - CHARGE_FLOOR_VOLTS);
        round2(100.0 * fraction.sqrt())
    }
}

/// Live voltages decoded from the `D` reply.
#[derive(Debug, Clone, Copy)]
pub struct DrainReading {
    pub input_voltage: f64,
    pub battery_voltage: f64,
    pub battery_charge: f64,
}

pub fn drain(data: &[u8], ratings: &VoltageRatings) -> DrainReading {
    let input = f64::from(hex_field(data, 1..3)) * ratings.input_scale / SCALE_BASE_VOLTS;

    // The raw reading is always interpreted against a 12 V pack; the charge
    // curve runs on that normalized value regardless of the actual nominal.
    let bv_12v = f64::from(hex_field(data, 3..5)) / 10.0;
    let battery = bv_12v * ratings.battery_nominal / 12.0;

    DrainReading {
        input_voltage: round2(input),
        battery_voltage: round2(battery),
        battery_charge: battery_charge(bv_12v),
    }
}

/// Min/max input voltage registers decoded from the `M` reply.
#[derive(Debug, Clone, Copy)]
pub struct MinMaxReading {
    pub minimum: f64,
    pub maximum: f64,
}

pub fn min_max(data: &[u8], ratings: &VoltageRatings) -> MinMaxReading {
    let minimum = f64::from(hex_field(data, 1..3)) * ratings.input_scale / SCALE_BASE_VOLTS;
    let maximum = f64::from(hex_field(data, 3..5)) * ratings.input_scale / SCALE_BASE_VOLTS;
    MinMaxReading {
        minimum: round2(minimum),
        maximum: round2(maximum),
    }
}

/// Power rating from the `P` reply: decimal ASCII between byte 1 and the
/// first `'X'`. A missing terminator decodes to 0 rather than reading past
/// the packet.
pub fn power_rating(data: &[u8]) -> u32 {
    let Some(end) = data.iter().position(|&b| b == b'X') else {
        return 0;
    };
    if end <= 1 {
        return 0;
    }
    data.get(1..end)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}
