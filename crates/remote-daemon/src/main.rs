//! remoted — remote-control input daemon entry point.
//!
//! Wires the enabled drivers to the shared key queue and drains it until
//! shutdown.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config, init logging
//!  └─ KeyQueue            -- shared sink for both drivers
//!       ├─ LircRemote     -- Unix-socket line protocol worker
//!       └─ RcuRemote      -- serial frame protocol worker
//!  └─ drain loop          -- logs key events until Ctrl-C
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use remote_core::KeySink;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use remote_daemon::application::key_queue::{KeyQueue, DEFAULT_CAPACITY};
use remote_daemon::drivers::serial::RcuRemote;
use remote_daemon::drivers::socket::LircRemote;
use remote_daemon::drivers::Remote;
use remote_daemon::infrastructure::storage::config;
use remote_daemon::infrastructure::storage::setup::{FileSetupStore, SetupStore};
use remote_daemon::infrastructure::transport::tty::TtySerial;
use remote_daemon::infrastructure::transport::unix_socket::UnixConnector;
use remote_daemon::infrastructure::worker::emergency_exit;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => config::load_config_from(PathBuf::from(path))?,
        None => config::load_config()?,
    };

    // Level comes from the config file; `RUST_LOG` overrides it.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.remote.log_level.clone())),
        )
        .init();

    info!("remote-control daemon starting");

    let queue = KeyQueue::new(DEFAULT_CAPACITY);
    let running = Arc::new(AtomicBool::new(true));

    let handler_running = Arc::clone(&running);
    let handler_queue = Arc::clone(&queue);
    ctrlc::set_handler(move || {
        handler_running.store(false, Ordering::Relaxed);
        handler_queue.wake();
    })
    .context("installing the Ctrl-C handler")?;

    let mut lirc = None;
    if config.lirc.enabled {
        let driver = LircRemote::start(
            UnixConnector::new(&config.lirc.socket),
            Arc::clone(&queue) as Arc<dyn KeySink>,
        );
        if driver.ready() {
            info!("LIRC remote control ready");
        } else {
            warn!("LIRC remote control unusable, continuing without it");
        }
        lirc = Some(driver);
    }

    let mut rcu = None;
    if config.rcu.enabled {
        match TtySerial::open(&config.rcu.device) {
            Ok(port) => {
                let setup: Arc<dyn SetupStore> = Arc::new(FileSetupStore::new(
                    config::config_dir()?.join("remotes.toml"),
                ));
                let driver =
                    RcuRemote::start(port, Arc::clone(&queue) as Arc<dyn KeySink>, setup);
                if driver.ready() {
                    info!("RCU remote control ready");
                    if !driver.has_code() && !driver.initialize() {
                        warn!("RCU code negotiation failed; restart to retry");
                    }
                } else {
                    warn!("RCU remote control unusable, continuing without it");
                }
                rcu = Some(driver);
            }
            Err(e) => {
                error!(
                    "cannot open RCU device {}: {e}",
                    config.rcu.device.display()
                );
            }
        }
    }

    info!("remote-control daemon ready, press Ctrl-C to exit");

    while running.load(Ordering::Relaxed) {
        if emergency_exit(false) {
            warn!("emergency exit requested, shutting down");
            break;
        }
        if let Some(press) = queue.get(Duration::from_millis(500)) {
            info!(
                "key {} (repeat={}, release={})",
                press.id, press.repeat, press.release
            );
        }
    }

    info!("remote-control daemon stopping");
    if let Some(mut driver) = lirc {
        driver.stop();
    }
    if let Some(mut driver) = rcu {
        driver.stop();
    }
    info!("remote-control daemon stopped");
    Ok(())
}
