//! upswatch - monitoring library for Tripp Lite SmartPro UPS hardware
//!
//! Speaks the SmartPro HID-wrapped ASCII command protocol over USB, decodes
//! the device's hexadecimal telemetry replies into [`UpsMetrics`] records,
//! and exposes a periodic stream of such records.
//!
//! ## Typical usage
//!
//! ```ignore
//! let session = MonitorSession::open(0x09AE, 0x0001, &config.usb)?;
//! let session = Arc::new(Mutex::new(session));
//! let stream = open_stream(Arc::clone(&session), Duration::from_secs(5))?;
//! while let Ok(metrics) = stream.metrics.recv() {
//!     println!("{}% charge", metrics.battery_charge);
//! }
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod monitor;
pub mod protocol;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use listener::{HistorySink, MetricsSink, SinkRegistry};
pub use metrics::{UpsMetrics, UpsStatus};
pub use monitor::MonitorSession;
pub use stream::{MetricsStream, open_stream};
