//! upswatch - monitoring daemon for Tripp Lite SmartPro UPS hardware

use crossbeam_channel::{bounded, select};
use parking_lot::Mutex;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use upswatch::{Config, HistorySink, MonitorSession, Result, SinkRegistry, open_stream};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("fatal: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Get config path from args or default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/upswatch.toml".to_string());

    let config = if Path::new(&config_path).exists() {
        log::info!("using config: {config_path}");
        Config::load(&config_path)?
    } else {
        log::info!("no config at {config_path}, using defaults");
        Config::default()
    };

    let session = MonitorSession::open(config.device.vendor_id, config.device.product_id, &config.usb)?;
    log::info!(
        "serving {} {} (protocol {})",
        session.device_info().manufacturer,
        session.device_info().product,
        session.protocol_name()
    );

    let session = Arc::new(Mutex::new(session));
    let stream = open_stream(Arc::clone(&session), config.poll.delay())?;

    let mut sinks = SinkRegistry::new();
    sinks.register(Box::new(HistorySink::new(config.poll.history_limit)));

    // Signal handler thread feeds the select loop below.
    let (signal_tx, signal_rx) = bounded::<i32>(1);
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let _signal_thread = thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                let _ = signal_tx.send(signal);
            }
        })?;

    loop {
        select! {
            recv(signal_rx) -> signal => {
                match signal {
                    Ok(signal) => log::info!("received signal {signal}, shutting down"),
                    Err(_) => log::warn!("signal handler gone, shutting down"),
                }
                break;
            }
            recv(stream.metrics) -> metrics => {
                let Ok(metrics) = metrics else { break };
                match serde_json::to_string(&metrics) {
                    Ok(json) => log::info!("metrics: {json}"),
                    Err(e) => log::warn!("failed to serialize metrics: {e}"),
                }
                sinks.dispatch(&metrics);
            }
            recv(stream.errors) -> error => {
                match error {
                    Ok(e) => log::error!("error gathering metrics: {e}"),
                    Err(_) => break,
                }
            }
        }
    }

    // Shutdown order: stream first, then the device.
    stream.close();
    match Arc::try_unwrap(session) {
        Ok(session) => session.into_inner().close(),
        Err(_) => log::warn!("session still shared at shutdown"),
    }

    log::info!("upswatch stopped");
    Ok(())
}
