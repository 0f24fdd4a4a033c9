//! Sync engine
//!
//! One worker task per device owns every piece of mutable sync state: the
//! category timers, the ring-buffer drain, the transaction receiver and the
//! inbound transport events. The worker is the only writer, so no handler
//! ever observes another handler mid-update. Callers interact through
//! `SyncHandle`, whose methods are non-blocking enqueues onto the control
//! channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use wearlink_proto::{
    AlarmSetting, Command, DeviceMessage, DeviceTime, Frame, SleepMessage, SlotMessage,
    SummaryMessage, DEVICE_RESPONSE_ID, HOST_REQUEST_ID,
};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::ringbuf::{SlotDrain, SlotOutcome};
use crate::samples::{expand_sleep_record, summary_to_sample, KindMap};
use crate::scheduler::{SyncCategory, SyncTimers, TimerState};
use crate::storage::TelemetryStore;
use crate::transaction::{Action, Transaction, TransactionQueue};
use crate::transport::{ConnectionState, DeviceState, Transport, TransportEvent};

/// Pause between consecutive command writes in one transaction
const INTER_WRITE_DELAY: Duration = Duration::from_millis(100);

/// Control messages from the handle to the worker
#[derive(Debug)]
enum Control {
    Sync,
    Quit,
    FindDevice(bool),
    SetTime,
    SetAlarms(Vec<AlarmSetting>),
    FetchActivityData,
}

/// Engine outputs, consumed by the embedding application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Initialization transaction completed
    Initialized,
    /// Battery level changed (duplicate reports are suppressed)
    BatteryUpdated { level: u8 },
    /// A batch of activity samples reached the store
    ActivityFlushed { count: usize },
    /// A sleep record was expanded and stored
    SleepRecorded { start: i64 },
    /// A day summary arrived
    SummaryRecorded {
        year: u16,
        month: u8,
        day: u8,
        steps: u32,
    },
    /// The transport reported a disconnect; the worker has stopped
    DeviceOffline,
}

/// Cloneable handle to a running engine worker
#[derive(Debug, Clone)]
pub struct SyncHandle {
    control: mpsc::UnboundedSender<Control>,
    queue: TransactionQueue,
}

impl SyncHandle {
    /// Start a full sync pass: ring-buffer catch-up, sleep records, day
    /// summary. The keepalive cycle is not reset.
    pub fn sync(&self) -> Result<()> {
        self.send(Control::Sync)
    }

    /// Ask the worker to stop after draining pending transactions.
    pub fn quit(&self) -> Result<()> {
        self.send(Control::Quit)
    }

    pub fn on_find_device(&self, enable: bool) -> Result<()> {
        self.send(Control::FindDevice(enable))
    }

    /// Push the host's current wall-clock time to the device.
    pub fn on_set_time(&self) -> Result<()> {
        self.send(Control::SetTime)
    }

    pub fn on_set_alarms(&self, alarms: Vec<AlarmSetting>) -> Result<()> {
        self.send(Control::SetAlarms(alarms))
    }

    /// Re-enter ring-buffer catch-up without touching the other categories.
    pub fn on_fetch_activity_data(&self) -> Result<()> {
        self.send(Control::FetchActivityData)
    }

    /// Queue for submitting custom transactions.
    pub fn transactions(&self) -> TransactionQueue {
        self.queue.clone()
    }

    fn send(&self, control: Control) -> Result<()> {
        self.control
            .send(control)
            .map_err(|e| SyncError::engine_stopped(format!("control channel closed: {e}")))
    }
}

pub struct SyncEngine;

impl SyncEngine {
    /// Spawn the worker task for one device. Returns the control handle, the
    /// event stream, and the worker's join handle.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TelemetryStore>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        config: SyncConfig,
    ) -> (SyncHandle, mpsc::Receiver<SyncEvent>, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (queue, txn_rx) = TransactionQueue::new();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let handle = SyncHandle {
            control: control_tx,
            queue: queue.clone(),
        };

        let worker = Worker {
            queue,
            timers: SyncTimers::new(Instant::now(), &config),
            drain: SlotDrain::new(KindMap::wl01()),
            transport,
            store,
            config,
            control_rx,
            txn_rx,
            transport_rx,
            events: event_tx,
            kind_map: KindMap::wl01(),
            device_state: DeviceState::Connecting,
            last_battery: None,
        };
        let join = tokio::spawn(worker.run());
        (handle, event_rx, join)
    }
}

struct Worker {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TelemetryStore>,
    config: SyncConfig,
    timers: SyncTimers,
    drain: SlotDrain,
    control_rx: mpsc::UnboundedReceiver<Control>,
    queue: TransactionQueue,
    txn_rx: mpsc::UnboundedReceiver<Transaction>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    events: mpsc::Sender<SyncEvent>,
    kind_map: KindMap,
    device_state: DeviceState,
    last_battery: Option<u8>,
}

impl Worker {
    async fn run(mut self) {
        info!(device = %self.config.device_id, "sync worker starting");
        self.initialize().await;

        let now = Instant::now();
        self.timers.timer_mut(SyncCategory::Keepalive).arm_now(now);
        self.start_sync(now);

        loop {
            let wake = self.timers.next_wake();
            tokio::select! {
                _ = sleep_until(wake) => self.on_timer(),
                Some(control) = self.control_rx.recv() => {
                    if !self.handle_control(control).await {
                        break;
                    }
                }
                Some(txn) = self.txn_rx.recv() => {
                    self.run_transaction(&txn).await;
                    while let Ok(txn) = self.txn_rx.try_recv() {
                        self.run_transaction(&txn).await;
                    }
                }
                event = self.transport_rx.recv() => match event {
                    Some(event) => {
                        if !self.handle_transport(event).await {
                            break;
                        }
                    }
                    None => {
                        warn!(device = %self.config.device_id, "transport closed");
                        self.emit(SyncEvent::DeviceOffline).await;
                        break;
                    }
                },
            }
        }
        info!(device = %self.config.device_id, "sync worker stopped");
    }

    /// Enable notifications, push the host time, mark the device ready.
    async fn initialize(&mut self) {
        let mut builder = Transaction::builder("initialize")
            .notify(self.config.control_characteristic, true)
            .notify(self.config.data_characteristic, true);
        match current_device_time().and_then(|t| self.encode(&Command::SetTime(t))) {
            Ok(bytes) => {
                builder = builder.write(self.config.control_characteristic, bytes);
            }
            Err(e) => warn!(error = %e, "time push skipped during initialize"),
        }
        let txn = builder.device_state(DeviceState::Initialized).build();
        self.run_transaction(&txn).await;
    }

    fn start_sync(&mut self, now: Instant) {
        info!(device = %self.config.device_id, "starting sync pass");
        self.drain.begin_catch_up();
        self.timers.arm_sync(now);
    }

    fn on_timer(&mut self) {
        let now = Instant::now();
        for category in self.timers.due(now) {
            if self.timers.timer(category).state() == TimerState::AwaitingResponse {
                warn!(?category, "response timed out, retrying");
                self.timers.timer_mut(category).on_timeout(now);
            }
            self.fire(category);
        }
    }

    fn fire(&mut self, category: SyncCategory) {
        match category {
            SyncCategory::Keepalive => self.send_for(category, &Command::Ping),
            SyncCategory::Sleep => self.send_for(category, &Command::GetSleepRecords),
            SyncCategory::Summary => self.send_for(category, &Command::GetDaySummary),
            SyncCategory::RingBuffer => match self.drain.next_request() {
                Some(range) => self.send_for(category, &Command::GetActivitySlots(range)),
                // drain is not catching up; nothing left to request
                None => self.timers.timer_mut(category).disable(Instant::now()),
            },
        }
    }

    /// Queue a category's request transaction. Submission marks the timer
    /// awaiting a response; if the transaction later aborts on the link, its
    /// owner tag routes the failure back into the retry cadence.
    fn send_for(&mut self, category: SyncCategory, command: &Command) {
        let now = Instant::now();
        match self.encode(command) {
            Ok(bytes) => {
                let txn = Transaction::builder(request_name(category))
                    .owned_by(category)
                    .write(self.config.control_characteristic, bytes)
                    .build();
                match self.queue.submit(txn) {
                    Ok(()) => self.timers.timer_mut(category).on_sent(now),
                    Err(e) => {
                        warn!(?category, error = %e, "request not queued");
                        self.timers.timer_mut(category).on_timeout(now);
                    }
                }
            }
            Err(e) => {
                warn!(?category, error = %e, "request not encoded");
                self.timers.timer_mut(category).on_timeout(now);
            }
        }
    }

    fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        Ok(Frame::encode(
            HOST_REQUEST_ID,
            command.command_id(),
            &command.to_payload(),
            self.config.max_frame_len,
        )?)
    }

    /// Returns false when the worker should stop.
    async fn handle_control(&mut self, control: Control) -> bool {
        match control {
            Control::Sync => self.start_sync(Instant::now()),
            Control::Quit => {
                info!(device = %self.config.device_id, "quit requested, draining transactions");
                while let Ok(txn) = self.txn_rx.try_recv() {
                    self.run_transaction(&txn).await;
                }
                return false;
            }
            Control::FindDevice(enable) => {
                match self.encode(&Command::FindDevice { enable }) {
                    Ok(bytes) => {
                        let txn = Transaction::builder("find_device")
                            .write(self.config.control_characteristic, bytes)
                            .build();
                        self.run_transaction(&txn).await;
                    }
                    Err(e) => warn!(error = %e, "find_device not sent"),
                }
            }
            Control::SetTime => {
                match current_device_time().and_then(|t| self.encode(&Command::SetTime(t))) {
                    Ok(bytes) => {
                        let txn = Transaction::builder("set_time")
                            .write(self.config.control_characteristic, bytes)
                            .build();
                        self.run_transaction(&txn).await;
                    }
                    Err(e) => warn!(error = %e, "set_time not sent"),
                }
            }
            Control::SetAlarms(alarms) => {
                let mut builder = Transaction::builder("set_alarms");
                for alarm in alarms {
                    match self.encode(&Command::SetAlarm(alarm)) {
                        Ok(bytes) => {
                            builder = builder
                                .write(self.config.control_characteristic, bytes)
                                .wait(INTER_WRITE_DELAY);
                        }
                        Err(e) => warn!(index = alarm.index(), error = %e, "alarm skipped"),
                    }
                }
                self.run_transaction(&builder.build()).await;
            }
            Control::FetchActivityData => {
                self.drain.begin_catch_up();
                self.timers
                    .timer_mut(SyncCategory::RingBuffer)
                    .arm_now(Instant::now());
            }
        }
        true
    }

    /// Run every action of a transaction in order; the first failure aborts
    /// the remainder.
    async fn run_transaction(&mut self, txn: &Transaction) {
        debug!(transaction = txn.name(), actions = txn.actions().len(), "running transaction");
        for action in txn.actions() {
            let result = match action {
                Action::WriteFrame {
                    characteristic,
                    bytes,
                } => self.transport.write(*characteristic, bytes).await,
                Action::Wait(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(())
                }
                Action::SetNotify {
                    characteristic,
                    enable,
                } => self.transport.set_notify(*characteristic, *enable).await,
                Action::SetDeviceState(state) => {
                    self.set_device_state(*state).await;
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!(transaction = txn.name(), error = %e, "transaction aborted");
                if let Some(owner) = txn.owner() {
                    // failed category request re-enters its retry cadence
                    self.timers.timer_mut(owner).on_timeout(Instant::now());
                }
                return;
            }
        }
    }

    async fn set_device_state(&mut self, state: DeviceState) {
        if self.device_state == state {
            return;
        }
        debug!(?state, "device state changed");
        self.device_state = state;
        if state == DeviceState::Initialized {
            self.emit(SyncEvent::Initialized).await;
        }
    }

    /// Returns false when the worker should stop.
    async fn handle_transport(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::ConnectionState(ConnectionState::Disconnected) => {
                warn!(device = %self.config.device_id, "device disconnected");
                self.emit(SyncEvent::DeviceOffline).await;
                false
            }
            TransportEvent::ConnectionState(ConnectionState::Connected) => {
                debug!("link connected");
                true
            }
            TransportEvent::Notification {
                characteristic,
                data,
            } => {
                self.handle_notification(characteristic, &data).await;
                true
            }
        }
    }

    /// Decode and dispatch one notification. Malformed frames cost only
    /// themselves: log and drop, the connection stays up.
    async fn handle_notification(&mut self, characteristic: u16, data: &[u8]) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(characteristic, error = %e, "dropping invalid frame");
                return;
            }
        };
        if frame.request_id() != DEVICE_RESPONSE_ID {
            warn!(
                request_id = frame.request_id(),
                "dropping frame with non-device request id"
            );
            return;
        }
        match DeviceMessage::parse(frame.command_id(), frame.payload()) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                warn!(command_id = frame.command_id(), error = %e, "dropping invalid payload");
            }
        }
    }

    async fn handle_message(&mut self, message: DeviceMessage) {
        let now = Instant::now();
        match message {
            DeviceMessage::Battery { level } => {
                self.timers.timer_mut(SyncCategory::Keepalive).on_response(now);
                if self.last_battery != Some(level) {
                    self.last_battery = Some(level);
                    self.emit(SyncEvent::BatteryUpdated { level }).await;
                }
            }
            DeviceMessage::Time(time) => {
                debug!(
                    "device reports {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    time.year(),
                    time.month(),
                    time.day(),
                    time.hour(),
                    time.minute(),
                    time.second()
                );
            }
            DeviceMessage::Alarm(alarm) => {
                debug!(index = alarm.index(), enabled = alarm.enabled(), "alarm acknowledged");
            }
            DeviceMessage::Slot(slot) => self.handle_slot(slot).await,
            DeviceMessage::Sleep(record) => self.handle_sleep(record).await,
            DeviceMessage::Summary(summary) => self.handle_summary(summary).await,
        }
    }

    async fn handle_slot(&mut self, slot: SlotMessage) {
        let now_local = Local::now();
        let now = Instant::now();
        match self.drain.on_slot(slot, &now_local) {
            SlotOutcome::Buffered => {
                // mid-range; push the stall deadline out while slots flow
                self.timers.timer_mut(SyncCategory::RingBuffer).on_sent(now);
            }
            SlotOutcome::RequestNext => {
                if let Some(range) = self.drain.next_request() {
                    self.send_for(SyncCategory::RingBuffer, &Command::GetActivitySlots(range));
                }
            }
            SlotOutcome::Flush(samples) => {
                self.timers.timer_mut(SyncCategory::RingBuffer).disable(now);
                let count = samples.len();
                match self.store.append_samples(&samples).await {
                    Ok(()) => {
                        info!(count, "activity samples flushed");
                        self.emit(SyncEvent::ActivityFlushed { count }).await;
                    }
                    Err(e) => warn!(count, error = %e, "activity flush failed"),
                }
            }
            SlotOutcome::Duplicate | SlotOutcome::Skipped => {}
        }
    }

    async fn handle_sleep(&mut self, record: SleepMessage) {
        self.timers
            .timer_mut(SyncCategory::Sleep)
            .on_response(Instant::now());
        let (base, overlays) = expand_sleep_record(&record, &self.kind_map);
        let stored = self.store.append_samples(std::slice::from_ref(&base)).await;
        let overlaid = self.store.append_overlays(&overlays).await;
        match stored.and(overlaid) {
            Ok(()) => {
                info!(start = base.timestamp, phases = overlays.len(), "sleep record stored");
                self.emit(SyncEvent::SleepRecorded {
                    start: base.timestamp,
                })
                .await;
            }
            Err(e) => warn!(error = %e, "sleep record not stored"),
        }
    }

    async fn handle_summary(&mut self, summary: SummaryMessage) {
        self.timers
            .timer_mut(SyncCategory::Summary)
            .on_response(Instant::now());
        match summary_to_sample(&summary, &self.kind_map) {
            Some(sample) => {
                if let Err(e) = self.store.append_samples(std::slice::from_ref(&sample)).await {
                    warn!(error = %e, "day summary not stored");
                }
            }
            None => warn!(
                year = summary.year,
                month = summary.month,
                day = summary.day,
                "day summary has no valid date, not stored"
            ),
        }
        info!(
            year = summary.year,
            month = summary.month,
            day = summary.day,
            steps = summary.steps,
            "day summary received"
        );
        self.emit(SyncEvent::SummaryRecorded {
            year: summary.year,
            month: summary.month,
            day: summary.day,
            steps: summary.steps,
        })
        .await;
    }

    async fn emit(&self, event: SyncEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

fn request_name(category: SyncCategory) -> &'static str {
    match category {
        SyncCategory::Keepalive => "keepalive",
        SyncCategory::RingBuffer => "slot_request",
        SyncCategory::Sleep => "sleep_request",
        SyncCategory::Summary => "summary_request",
    }
}

/// Host wall-clock time as a device time command payload
fn current_device_time() -> Result<DeviceTime> {
    let now = Local::now();
    Ok(DeviceTime::new(
        now.year() as u16,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    )?)
}
