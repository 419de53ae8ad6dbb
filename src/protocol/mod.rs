//! SmartPro command framing and reply decoding.
//!
//! The device speaks an ASCII command protocol wrapped in 8-byte HID
//! feature reports: [`frame`] builds the outbound reports, [`decode`] turns
//! the echoed replies into physical quantities.

pub mod decode;
pub mod frame;
