//! Periodic metric polling pipeline.
//!
//! One named thread owns the session for the life of the stream, polling
//! `get_stats` on a fixed cadence and publishing each outcome to a
//! capacity-1 channel. A slow consumer blocks the producer rather than
//! losing records, which naturally throttles polling. Cancellation is a
//! shared atomic flag checked every 50 ms of the inter-cycle sleep.

use crate::error::{Error, Result};
use crate::metrics::UpsMetrics;
use crate::monitor::MonitorSession;
use crossbeam_channel::{Receiver, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Floor for the polling cadence; requests below it are clamped up.
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(50);

/// Sleep slice between cancellation checks.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// A running poll stream.
///
/// `metrics` and `errors` each hold at most one pending item. Dropping the
/// stream without calling [`close`](MetricsStream::close) disconnects the
/// channels; the poller notices on its next send and exits on its own.
pub struct MetricsStream {
    pub metrics: Receiver<UpsMetrics>,
    pub errors: Receiver<Error>,
    streaming: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Start polling a session at the given cadence.
///
/// The session's streaming flag is set and a dedicated thread takes over
/// the transport; nothing else may issue commands until the stream is
/// closed. Every cycle produces exactly one item: a snapshot on the
/// metrics channel or the cycle's error on the errors channel. A failed
/// cycle never terminates the stream.
pub fn open_stream(session: Arc<Mutex<MonitorSession>>, delay: Duration) -> Result<MetricsStream> {
    let delay = delay.max(MIN_POLL_DELAY);
    let streaming = session.lock().streaming_flag();
    streaming.store(true, Ordering::SeqCst);

    let (metrics_tx, metrics_rx) = bounded(1);
    let (errors_tx, errors_rx) = bounded(1);

    let flag = Arc::clone(&streaming);
    let spawned = thread::Builder::new()
        .name("ups-poller".to_string())
        .spawn(move || {
            log::info!("stream started (delay {delay:?})");

            while flag.load(Ordering::SeqCst) {
                let result = session.lock().get_stats();
                let delivered = match result {
                    Ok(metrics) => metrics_tx.send(metrics).is_ok(),
                    Err(e) => errors_tx.send(e).is_ok(),
                };
                if !delivered {
                    // Consumer gone; nobody is left to close us.
                    flag.store(false, Ordering::SeqCst);
                    break;
                }

                let mut slept = Duration::ZERO;
                while flag.load(Ordering::SeqCst) && slept < delay {
                    thread::sleep(POLL_SLICE);
                    slept += POLL_SLICE;
                }
            }

            log::debug!("poller exiting");
        });

    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            streaming.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
    };

    Ok(MetricsStream {
        metrics: metrics_rx,
        errors: errors_rx,
        streaming,
        handle,
    })
}

impl MetricsStream {
    /// Stop the stream and wait for the poller to exit.
    ///
    /// Clears the flag, disconnects both channels (so a producer blocked on
    /// a full channel wakes immediately), then joins the thread. Returns
    /// after at most one in-flight poll cycle plus one sleep slice.
    pub fn close(self) {
        let MetricsStream {
            metrics,
            errors,
            streaming,
            handle,
        } = self;

        streaming.store(false, Ordering::SeqCst);
        drop(metrics);
        drop(errors);

        if handle.join().is_err() {
            log::warn!("poller thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MonitorSession, POLL_OPCODES};
    use crate::transport::{DeviceInfo, MockTransport};
    use std::time::Instant;

    fn scripted_session() -> (MockTransport, Arc<Mutex<MonitorSession>>) {
        let mock = MockTransport::new();
        mock.set_reply(0x00, &[0x00, 0x30, 0x03]);
        mock.set_reply(b'D', &[b'D', b'6', b'4', b'8', b'6']);
        mock.set_reply(b'F', &[b'F', b'S', b'P', b'R', b'O', b'1', b' ']);
        mock.set_reply(b'L', &[b'L', b'1', b'9']);
        mock.set_reply(b'M', &[b'M', b'6', b'0', b'6', b'8']);
        mock.set_reply(b'P', &[b'P', b'4', b'5', b'0', b'X']);
        mock.set_reply(b'S', &[b'S', b'1', b'X', b'X', 0x00]);
        mock.set_reply(b'T', &[b'T', b'5', b'A', b'1', b'F', b'4', b'1']);
        mock.set_reply(b'U', &[b'U', 0x00, 0x07]);
        mock.set_reply(b'V', &[b'V', b'1', b'0', b'2', b'2']);

        let session =
            MonitorSession::with_transport(Box::new(mock.clone()), DeviceInfo::default()).unwrap();
        (mock, Arc::new(Mutex::new(session)))
    }

    #[test]
    fn test_stream_delivers_metrics() {
        let (_mock, session) = scripted_session();
        let stream = open_stream(Arc::clone(&session), Duration::from_millis(50)).unwrap();

        let metrics = stream.metrics.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(metrics.load, 0x19);
        assert_eq!(metrics.power, 450);

        stream.close();
        assert!(!session.lock().is_streaming());
    }

    #[test]
    fn test_stream_reports_errors_and_continues() {
        let (mock, session) = scripted_session();
        for &code in &POLL_OPCODES {
            mock.clear_reply(code);
        }
        let stream = open_stream(Arc::clone(&session), Duration::from_millis(50)).unwrap();

        let err = stream.errors.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(err, Error::StreamError(_)));

        // The loop survives the failed cycle and recovers once replies are
        // back. Keep draining errors so the capacity-1 channel never stalls
        // the producer on a stale cycle.
        mock.set_reply(b'L', &[b'L', b'1', b'9']);
        let deadline = Instant::now() + Duration::from_secs(5);
        let metrics = loop {
            if let Ok(metrics) = stream.metrics.recv_timeout(Duration::from_millis(100)) {
                break metrics;
            }
            while stream.errors.try_recv().is_ok() {}
            assert!(Instant::now() < deadline, "no metrics after recovery");
        };
        assert_eq!(metrics.load, 0x19);

        stream.close();
    }

    #[test]
    fn test_cancel_latency() {
        let (_mock, session) = scripted_session();
        // Long cadence: cancellation must not wait out the delay.
        let stream = open_stream(Arc::clone(&session), Duration::from_secs(60)).unwrap();

        let _ = stream.metrics.recv_timeout(Duration::from_secs(5)).unwrap();

        let start = Instant::now();
        stream.close();
        // One sleep slice plus one in-flight cycle, with generous headroom.
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "close took {:?}",
            start.elapsed()
        );
        assert!(!session.lock().is_streaming());
    }

    #[test]
    fn test_delay_clamped_to_floor() {
        let (_mock, session) = scripted_session();
        let stream = open_stream(Arc::clone(&session), Duration::ZERO).unwrap();

        // Two cycles arrive despite the zero delay request.
        let _ = stream.metrics.recv_timeout(Duration::from_secs(5)).unwrap();
        let _ = stream.metrics.recv_timeout(Duration::from_secs(5)).unwrap();

        stream.close();
    }
}
