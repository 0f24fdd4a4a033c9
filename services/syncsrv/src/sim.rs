//! In-process device simulator
//!
//! A scripted WL01 device behind the `Transport` seam: host frames written
//! to it are decoded and answered over the transport event channel the way
//! the real firmware answers, including streaming a requested slot range one
//! notification at a time. The `syncsrv` binary runs the engine against it,
//! and the integration tests use it to drive full sync passes.

use chrono::{Datelike, Local, Timelike};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use async_trait::async_trait;
use wearlink_proto::command::{command_id, LAST_SLOT_INDEX};
use wearlink_proto::{
    Frame, SleepMessage, SummaryMessage, DEVICE_RESPONSE_ID, HOST_REQUEST_ID, OP_GET, OP_SET,
};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::transport::{Characteristic, ConnectionState, Transport, TransportEvent};

/// Contents of one simulated ring-buffer slot
#[derive(Debug, Clone, Copy)]
pub struct SlotData {
    pub steps: u16,
    pub heart_rate: u8,
    pub inactive_seconds: u16,
}

struct DeviceInner {
    battery: u8,
    slots: Vec<SlotData>,
    sleep: Option<SleepMessage>,
    summary: Option<SummaryMessage>,
    writes: Vec<(Characteristic, Vec<u8>)>,
    notifies: Vec<(Characteristic, bool)>,
    finding: bool,
}

pub struct SimulatedDevice {
    events: mpsc::Sender<TransportEvent>,
    replies: mpsc::UnboundedSender<(u8, Vec<u8>)>,
    inner: Mutex<DeviceInner>,
}

impl SimulatedDevice {
    pub fn new(events: mpsc::Sender<TransportEvent>, config: &SyncConfig) -> Self {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<(u8, Vec<u8>)>();
        let forward = events.clone();
        let characteristic = config.data_characteristic;
        let max_frame_len = config.max_frame_len;
        // one long-lived forwarder keeps replies in write order across
        // back-to-back requests
        tokio::spawn(async move {
            while let Some((command, payload)) = reply_rx.recv().await {
                match Frame::encode(DEVICE_RESPONSE_ID, command, &payload, max_frame_len) {
                    Ok(data) => {
                        let event = TransportEvent::Notification {
                            characteristic,
                            data,
                        };
                        if forward.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "simulator reply does not fit a frame"),
                }
            }
        });
        Self {
            events,
            replies: reply_tx,
            inner: Mutex::new(DeviceInner {
                battery: 80,
                slots: Vec::new(),
                sleep: None,
                summary: None,
                writes: Vec::new(),
                notifies: Vec::new(),
                finding: false,
            }),
        }
    }

    pub fn with_battery(self, level: u8) -> Self {
        self.inner.lock().battery = level;
        self
    }

    /// Seed the ring buffer; slot index is the position in the vector.
    pub fn with_slots(self, slots: Vec<SlotData>) -> Self {
        self.inner.lock().slots = slots;
        self
    }

    pub fn with_sleep(self, record: SleepMessage) -> Self {
        self.inner.lock().sleep = Some(record);
        self
    }

    pub fn with_summary(self, summary: SummaryMessage) -> Self {
        self.inner.lock().summary = Some(summary);
        self
    }

    pub fn set_battery(&self, level: u8) {
        self.inner.lock().battery = level;
    }

    /// Every frame the host has written, in order.
    pub fn writes(&self) -> Vec<(Characteristic, Vec<u8>)> {
        self.inner.lock().writes.clone()
    }

    pub fn notifies(&self) -> Vec<(Characteristic, bool)> {
        self.inner.lock().notifies.clone()
    }

    pub fn find_device_active(&self) -> bool {
        self.inner.lock().finding
    }

    /// Report a link drop to the engine.
    pub async fn disconnect(&self) {
        let _ = self
            .events
            .send(TransportEvent::ConnectionState(
                ConnectionState::Disconnected,
            ))
            .await;
    }

    fn send_replies(&self, replies: Vec<(u8, Vec<u8>)>) {
        for reply in replies {
            if self.replies.send(reply).is_err() {
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for SimulatedDevice {
    async fn write(&self, characteristic: Characteristic, bytes: &[u8]) -> Result<()> {
        let frame = Frame::decode(bytes)?;
        if frame.request_id() != HOST_REQUEST_ID {
            return Err(SyncError::transport("frame does not carry the host request id"));
        }
        let payload = frame.payload().to_vec();
        let op = payload.first().copied().unwrap_or(0);

        let mut replies: Vec<(u8, Vec<u8>)> = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.writes.push((characteristic, bytes.to_vec()));
            match frame.command_id() {
                command_id::PING => {
                    replies.push((command_id::PING, vec![OP_GET, inner.battery]));
                }
                command_id::TIME => {
                    if op == OP_SET && payload.len() == 8 {
                        // ack a time push by echoing it
                        replies.push((command_id::TIME, payload.clone()));
                    } else {
                        replies.push((command_id::TIME, time_payload()));
                    }
                }
                command_id::ALARM => {
                    if op == OP_SET && payload.len() == 6 {
                        replies.push((command_id::ALARM, payload.clone()));
                    } else if payload.len() == 2 {
                        replies.push((command_id::ALARM, vec![OP_GET, payload[1], 0, 0, 8, 0]));
                    }
                }
                command_id::FIND_DEVICE => {
                    inner.finding = payload.get(1).copied().unwrap_or(0) != 0;
                }
                command_id::ACTIVITY_SLOTS => {
                    if payload.len() == 5 {
                        let from = usize::from(payload[1]) * 6 + usize::from(payload[2]) / 10;
                        let to = (usize::from(payload[3]) * 6 + usize::from(payload[4]) / 10)
                            .min(usize::from(LAST_SLOT_INDEX));
                        for slot in from..=to {
                            if let Some(data) = inner.slots.get(slot) {
                                replies.push((
                                    command_id::ACTIVITY_SLOTS,
                                    slot_payload(slot as u8, data),
                                ));
                            }
                        }
                    }
                }
                command_id::SLEEP_RECORDS => {
                    if let Some(record) = inner.sleep {
                        replies.push((command_id::SLEEP_RECORDS, sleep_payload(&record)));
                    }
                }
                command_id::DAY_SUMMARY => {
                    if let Some(summary) = inner.summary {
                        replies.push((command_id::DAY_SUMMARY, summary_payload(&summary)));
                    }
                }
                other => debug!(command = other, "simulator ignores unknown command"),
            }
        }
        self.send_replies(replies);
        Ok(())
    }

    async fn set_notify(&self, characteristic: Characteristic, enable: bool) -> Result<()> {
        self.inner.lock().notifies.push((characteristic, enable));
        Ok(())
    }
}

fn time_payload() -> Vec<u8> {
    let now = Local::now();
    let mut payload = vec![OP_GET];
    payload.extend_from_slice(&(now.year() as u16).to_le_bytes());
    payload.extend_from_slice(&[
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    ]);
    payload
}

fn slot_payload(slot: u8, data: &SlotData) -> Vec<u8> {
    let mut payload = vec![OP_GET, slot];
    payload.extend_from_slice(&data.steps.to_le_bytes());
    payload.push(data.heart_rate);
    payload.extend_from_slice(&data.inactive_seconds.to_le_bytes());
    payload
}

fn sleep_payload(record: &SleepMessage) -> Vec<u8> {
    let mut payload = vec![OP_GET];
    payload.extend_from_slice(&record.start_timestamp.to_le_bytes());
    for minutes in [
        record.fall_asleep_min,
        record.light_min,
        record.deep_min,
        record.rem_min,
        record.awake_min,
    ] {
        payload.extend_from_slice(&minutes.to_le_bytes());
    }
    payload
}

fn summary_payload(summary: &SummaryMessage) -> Vec<u8> {
    let mut payload = vec![OP_GET];
    payload.extend_from_slice(&summary.year.to_le_bytes());
    payload.push(summary.month);
    payload.push(summary.day);
    payload.extend_from_slice(&summary.steps.to_le_bytes());
    payload.extend_from_slice(&summary.distance_m.to_le_bytes());
    payload.extend_from_slice(&summary.calories.to_le_bytes());
    payload.push(summary.min_heart_rate);
    payload.push(summary.max_heart_rate);
    payload
}

/// A deterministic full day of slot data for demos and tests
pub fn demo_day() -> Vec<SlotData> {
    (0u16..144)
        .map(|slot| SlotData {
            steps: (slot * 37) % 400,
            heart_rate: 60 + (slot % 60) as u8,
            inactive_seconds: if slot % 6 == 0 { 600 } else { 0 },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wearlink_proto::Command;

    fn host_frame(command: &Command) -> Vec<u8> {
        Frame::encode(HOST_REQUEST_ID, command.command_id(), &command.to_payload(), 32).unwrap()
    }

    #[tokio::test]
    async fn test_replies_preserve_write_order() {
        let config = SyncConfig::default();
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let device = SimulatedDevice::new(event_tx, &config).with_sleep(SleepMessage {
            start_timestamp: 1_000_000,
            fall_asleep_min: 5,
            light_min: 60,
            deep_min: 30,
            rem_min: 20,
            awake_min: 2,
        });

        device
            .write(config.control_characteristic, &host_frame(&Command::Ping))
            .await
            .unwrap();
        device
            .write(
                config.control_characteristic,
                &host_frame(&Command::GetSleepRecords),
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            match event_rx.recv().await.unwrap() {
                TransportEvent::Notification { data, .. } => {
                    seen.push(Frame::decode(&data).unwrap().command_id());
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(seen, vec![command_id::PING, command_id::SLEEP_RECORDS]);
    }
}
