//! End-to-end engine tests against the scripted device simulator, driven on
//! a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use wearlink_proto::command::command_id;
use wearlink_proto::{AlarmSetting, Frame, SleepMessage, SummaryMessage};

use syncsrv::config::SyncConfig;
use syncsrv::engine::{SyncEngine, SyncEvent};
use syncsrv::samples::NormalizedKind;
use syncsrv::sim::{demo_day, SimulatedDevice};
use syncsrv::storage::{MemoryStore, TelemetryStore};
use syncsrv::transaction::Transaction;
use syncsrv::transport::{Characteristic, Transport, TransportEvent};
use syncsrv::{Result, SyncError};

const GUARD: Duration = Duration::from_secs(3600);

fn sleep_record() -> SleepMessage {
    SleepMessage {
        start_timestamp: 1_000_000_007,
        fall_asleep_min: 10,
        light_min: 120,
        deep_min: 90,
        rem_min: 45,
        awake_min: 5,
    }
}

fn summary() -> SummaryMessage {
    SummaryMessage {
        year: 2020,
        month: 2,
        day: 2,
        steps: 10_412,
        distance_m: 7_820,
        calories: 2_150,
        min_heart_rate: 51,
        max_heart_rate: 158,
    }
}

fn start_engine() -> (
    Arc<SimulatedDevice>,
    Arc<MemoryStore>,
    syncsrv::SyncHandle,
    mpsc::Receiver<SyncEvent>,
    tokio::task::JoinHandle<()>,
) {
    let config = SyncConfig::default();
    let (event_tx, transport_rx) = mpsc::channel(256);
    let device = Arc::new(
        SimulatedDevice::new(event_tx, &config)
            .with_battery(76)
            .with_slots(demo_day())
            .with_sleep(sleep_record())
            .with_summary(summary()),
    );
    let store = Arc::new(MemoryStore::new());
    let (handle, events, join) =
        SyncEngine::spawn(device.clone(), store.clone(), transport_rx, config);
    (device, store, handle, events, join)
}

#[tokio::test(start_paused = true)]
async fn test_full_sync_pass() {
    let (device, store, _handle, mut events, _join) = start_engine();

    let mut initialized = false;
    let mut battery = None;
    let mut flushed = None;
    let mut sleep_start = None;
    let mut summary_steps = None;
    while !(initialized
        && battery.is_some()
        && flushed.is_some()
        && sleep_start.is_some()
        && summary_steps.is_some())
    {
        match timeout(GUARD, events.recv()).await.unwrap().unwrap() {
            SyncEvent::Initialized => initialized = true,
            SyncEvent::BatteryUpdated { level } => battery = Some(level),
            SyncEvent::ActivityFlushed { count } => flushed = Some(count),
            SyncEvent::SleepRecorded { start } => sleep_start = Some(start),
            SyncEvent::SummaryRecorded { steps, .. } => summary_steps = Some(steps),
            SyncEvent::DeviceOffline => panic!("unexpected disconnect"),
        }
    }

    // the whole day arrived as a single batch
    assert_eq!(flushed, Some(144));
    assert_eq!(battery, Some(76));
    assert_eq!(sleep_start, Some(1_000_000_007));
    assert_eq!(summary_steps, Some(10_412));

    // 144 ring samples plus the sleep base and the summary sample
    assert_eq!(store.sample_count(), 146);
    let samples = store.query_samples(1_700_000_000, i64::MAX).await.unwrap();
    assert_eq!(samples.len(), 144);
    for pair in samples.windows(2) {
        assert_eq!(pair[1].timestamp - pair[0].timestamp, 600);
    }

    // the summary landed as a sample at local midnight of its date
    let midnight = Local.with_ymd_and_hms(2020, 2, 2, 0, 0, 0).unwrap().timestamp();
    let stored = store.query_samples(midnight, midnight).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].steps, 10_412);
    assert_eq!(stored[0].distance_m, Some(7_820));
    assert_eq!(stored[0].calories, Some(2_150));

    // the device saw both notify subscriptions and the initial time push
    let notifies = device.notifies();
    assert_eq!(notifies.len(), 2);
    assert!(device.writes().iter().any(|(_, bytes)| {
        Frame::decode(bytes).is_ok_and(|f| f.command_id() == command_id::TIME)
    }));
}

#[tokio::test(start_paused = true)]
async fn test_sleep_overlays_merge_at_read_time() {
    let (_device, store, _handle, mut events, _join) = start_engine();

    loop {
        if let SyncEvent::SleepRecorded { .. } = timeout(GUARD, events.recv()).await.unwrap().unwrap()
        {
            break;
        }
    }

    let start = 1_000_000_007i64;
    let merged = store.query_merged(start, start + 1).await.unwrap();
    assert_eq!(merged.len(), 1);
    // the base sample falls inside the fall-asleep phase
    assert_eq!(merged[0].kind, NormalizedKind::LightSleep);
    // raw storage keeps the unmerged kind
    let overlays = store.query_overlays(start, start + 300 * 60).await.unwrap();
    assert_eq!(overlays.len(), 5);
    assert_eq!(overlays[2].kind, NormalizedKind::DeepSleep);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_battery_reports_suppressed() {
    let (device, _store, _handle, mut events, _join) = start_engine();

    // first keepalive reply
    loop {
        if let SyncEvent::BatteryUpdated { level } =
            timeout(GUARD, events.recv()).await.unwrap().unwrap()
        {
            assert_eq!(level, 76);
            break;
        }
    }

    device.set_battery(52);
    // every ping between the two events reported 76 again and was suppressed;
    // the very next battery event is the changed level
    loop {
        if let SyncEvent::BatteryUpdated { level } =
            timeout(GUARD, events.recv()).await.unwrap().unwrap()
        {
            assert_eq!(level, 52);
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_set_alarms_written_in_order() {
    let (device, _store, handle, _events, _join) = start_engine();

    let alarms: Vec<AlarmSetting> = (0..3)
        .map(|i| AlarmSetting::new(i, true, 0x1F, 7 + i, 30).unwrap())
        .collect();
    handle.on_set_alarms(alarms).unwrap();

    let mut written = Vec::new();
    for _ in 0..200 {
        written = device
            .writes()
            .iter()
            .filter_map(|(_, bytes)| Frame::decode(bytes).ok())
            .filter(|f| f.command_id() == command_id::ALARM)
            .map(|f| f.payload()[1])
            .collect();
        if written.len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(written, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_quit_drains_pending_transactions() {
    let (device, _store, handle, _events, join) = start_engine();

    let bytes = Frame::encode(0xAB, command_id::FIND_DEVICE, &[0x02, 0x01], 32).unwrap();
    handle
        .transactions()
        .submit(Transaction::builder("late_write").write(0x0011, bytes).build())
        .unwrap();
    handle.quit().unwrap();

    timeout(GUARD, join).await.unwrap().unwrap();
    assert!(device.find_device_active());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_emits_offline_and_stops_worker() {
    let (device, _store, handle, mut events, join) = start_engine();

    device.disconnect().await;
    loop {
        if timeout(GUARD, events.recv()).await.unwrap().unwrap() == SyncEvent::DeviceOffline {
            break;
        }
    }
    timeout(GUARD, join).await.unwrap().unwrap();
    // the worker is gone; control sends now fail
    assert!(matches!(handle.sync(), Err(SyncError::EngineStopped(_))));
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_malformed_frame_dropped_link_stays_up() {
    let config = SyncConfig::default();
    let (event_tx, transport_rx) = mpsc::channel(256);
    let device = Arc::new(
        SimulatedDevice::new(event_tx.clone(), &config)
            .with_battery(76)
            .with_slots(demo_day()),
    );
    let store = Arc::new(MemoryStore::new());
    let (_handle, mut events, _join) =
        SyncEngine::spawn(device, store, transport_rx, config);

    // corrupt frame injected alongside the real traffic
    event_tx
        .send(TransportEvent::Notification {
            characteristic: 0x0012,
            data: vec![0x5A, 0x06, 0x01, 0xDE, 0xAD, 0x00],
        })
        .await
        .unwrap();

    // the engine logs and drops it; the sync pass still completes
    loop {
        if let SyncEvent::ActivityFlushed { count } =
            timeout(GUARD, events.recv()).await.unwrap().unwrap()
        {
            assert_eq!(count, 144);
            break;
        }
    }
    assert!(logs_contain("dropping invalid frame"));
}

/// Transport that rejects writes to one characteristic and records the rest.
struct FlakyTransport {
    reject: Characteristic,
    written: Mutex<Vec<Characteristic>>,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn write(&self, characteristic: Characteristic, _bytes: &[u8]) -> Result<()> {
        if characteristic == self.reject {
            return Err(SyncError::transport("write rejected"));
        }
        self.written.lock().push(characteristic);
        Ok(())
    }

    async fn set_notify(&self, _characteristic: Characteristic, _enable: bool) -> Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_aborts_rest_of_transaction() {
    let config = SyncConfig::default();
    let (_event_tx, transport_rx) = mpsc::channel(16);
    let transport = Arc::new(FlakyTransport {
        reject: 0x0099,
        written: Mutex::new(Vec::new()),
    });
    let store = Arc::new(MemoryStore::new());
    let (handle, _events, _join) =
        SyncEngine::spawn(transport.clone(), store, transport_rx, config);

    handle
        .transactions()
        .submit(
            Transaction::builder("flaky")
                .write(0x0001, vec![0xAB])
                .write(0x0099, vec![0xAB])
                .write(0x0002, vec![0xAB])
                .build(),
        )
        .unwrap();
    handle
        .transactions()
        .submit(Transaction::builder("after").write(0x0003, vec![0xAB]).build())
        .unwrap();

    let mut written = Vec::new();
    for _ in 0..200 {
        written = transport.written.lock().clone();
        if written.contains(&0x0003) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // the write after the failure never happened, the next transaction did
    assert!(written.contains(&0x0001));
    assert!(!written.contains(&0x0002));
    assert!(written.contains(&0x0003));
}

/// Transport whose writes always fail, recording the attempted command ids.
struct DeadTransport {
    attempts: Mutex<Vec<u8>>,
}

#[async_trait]
impl Transport for DeadTransport {
    async fn write(&self, _characteristic: Characteristic, bytes: &[u8]) -> Result<()> {
        if let Ok(frame) = Frame::decode(bytes) {
            self.attempts.lock().push(frame.command_id());
        }
        Err(SyncError::transport("link dead"))
    }

    async fn set_notify(&self, _characteristic: Characteristic, _enable: bool) -> Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_category_request_retries() {
    let config = SyncConfig::default();
    let (_event_tx, transport_rx) = mpsc::channel(16);
    let transport = Arc::new(DeadTransport {
        attempts: Mutex::new(Vec::new()),
    });
    let store = Arc::new(MemoryStore::new());
    let (_handle, _events, _join) =
        SyncEngine::spawn(transport.clone(), store, transport_rx, config);

    // keepalive retries every 120s after each failed write
    tokio::time::sleep(Duration::from_secs(500)).await;

    let pings = transport
        .attempts
        .lock()
        .iter()
        .filter(|id| **id == command_id::PING)
        .count();
    assert!(pings >= 3, "expected repeated keepalive attempts, saw {pings}");
}
