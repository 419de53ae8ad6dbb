//! Error types for upswatch
//!
//! # Error Recovery Strategies
//!
//! ## Fatal Errors (Session Not Usable)
//!
//! - **`TransportUnavailable`**: The device could not be opened, its
//!   descriptors could not be read, or the interface claim exhausted its
//!   retries. The session is never created; fix the cabling/permissions and
//!   restart. The message preserves the initial claim error alongside the
//!   last retry error.
//!
//! ## Programmer Errors (Fail Fast)
//!
//! - **`CommandTooLarge`**: A command outside the 1..=5 byte frame payload
//!   was submitted. No such command exists in the SmartPro opcode table.
//!
//! ## Transient Errors (Logged, Polling Continues)
//!
//! - **`Usb`**: A single control or interrupt transfer failed. `get_stats`
//!   logs the failed opcode and leaves its fields at zero.
//! - **`ShortWrite`**: A Set_Report delivered fewer bytes than the frame.
//! - **`ResponseMismatch`**: No interrupt packet echoing the opcode arrived
//!   within the read retries.
//! - **`StreamError`**: An entire poll cycle produced no reply. Delivered on
//!   the stream's errors channel; the polling loop keeps running.
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`Config`**: The TOML configuration is unreadable or invalid.

use thiserror::Error;

/// Errors that can occur in upswatch
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device unavailable: {0}")]
    TransportUnavailable(String),

    #[error("command length {0} outside the 1..=5 byte frame payload")]
    CommandTooLarge(usize),

    #[error("short write: sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },

    #[error("no reply echoing opcode 0x{opcode:02X} after {retries} read attempts")]
    ResponseMismatch { opcode: u8, retries: u32 },

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
