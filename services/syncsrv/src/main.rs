//! syncsrv demo binary
//!
//! Runs the sync engine against the in-process device simulator and logs the
//! event stream. Pass a YAML config path as the first argument; `SYNCSRV_`
//! environment variables override it.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wearlink_proto::{SleepMessage, SummaryMessage};

use syncsrv::config::SyncConfig;
use syncsrv::engine::SyncEngine;
use syncsrv::sim::{demo_day, SimulatedDevice};
use syncsrv::storage::MemoryStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match SyncConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "cannot load configuration");
            std::process::exit(1);
        }
    };
    info!(device = %config.device_id, "configuration loaded");

    let (event_tx, transport_rx) = mpsc::channel(64);
    let device = Arc::new(
        SimulatedDevice::new(event_tx, &config)
            .with_battery(76)
            .with_slots(demo_day())
            .with_sleep(SleepMessage {
                start_timestamp: (chrono::Utc::now().timestamp() - 8 * 3600) as u32,
                fall_asleep_min: 15,
                light_min: 180,
                deep_min: 120,
                rem_min: 60,
                awake_min: 10,
            })
            .with_summary(SummaryMessage {
                year: 2026,
                month: 8,
                day: 29,
                steps: 10_412,
                distance_m: 7_820,
                calories: 2_150,
                min_heart_rate: 51,
                max_heart_rate: 158,
            }),
    );
    let store = Arc::new(MemoryStore::new());

    let (handle, mut events, join) =
        SyncEngine::spawn(device, store.clone(), transport_rx, config);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => info!(?event, "sync event"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = handle.quit();
                break;
            }
        }
    }

    if let Err(e) = join.await {
        error!(error = %e, "worker task failed");
    }
    info!(samples = store.sample_count(), "stored samples at exit");
}
