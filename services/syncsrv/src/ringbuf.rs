//! Ring-buffer drain
//!
//! The device keeps one day of telemetry in 144 ten-minute slots. Catch-up
//! walks the ring hour by hour: request `[last_received + 1 .. same hour
//! :59]`, accept slots strictly in sequence, and on slot 143 convert the
//! whole buffer into one sorted flush batch. After that the drain goes live
//! and every incoming slot flushes on its own.
//!
//! Slot indices are wall-clock positions, not ages: a slot at or after the
//! current wall-clock slot has not been written today yet, so its data is
//! yesterday's and its timestamp moves back a day.

use chrono::{DateTime, Local, Timelike};
use tracing::{debug, warn};
use wearlink_proto::{SlotMessage, SlotRange};

use crate::samples::{raw_kind, KindMap, Sample};

/// Ten-minute slots in one day
pub const SLOTS_PER_DAY: u8 = 144;

/// Highest slot index; receiving it completes a catch-up
pub const LAST_SLOT: u8 = SLOTS_PER_DAY - 1;

const SLOT_SECONDS: i64 = 600;
const DAY_SECONDS: i64 = 86_400;

/// Ring-buffer slot index for a wall-clock time
pub fn now_slot(now: &DateTime<Local>) -> u8 {
    (now.hour() * 6 + now.minute() / 10) as u8
}

/// Epoch timestamp of a slot, corrected across the day boundary: indices at
/// or after the current slot belong to yesterday.
pub fn slot_timestamp(now: &DateTime<Local>, slot: u8) -> i64 {
    let seconds_today = i64::from(now.hour()) * 3600
        + i64::from(now.minute()) * 60
        + i64::from(now.second());
    let midnight = now.timestamp() - seconds_today;
    let mut ts = midnight + i64::from(slot) * SLOT_SECONDS;
    if slot >= now_slot(now) {
        ts -= DAY_SECONDS;
    }
    ts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// No drain started yet
    Idle,
    /// Walking the ring toward slot 143
    CatchUp,
    /// Day drained; slots arrive as live updates
    Live,
}

/// What the engine should do with a processed slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    /// Accepted into the catch-up buffer; more slots of this range expected
    Buffered,
    /// Requested range exhausted; ask for the next one
    RequestNext,
    /// Samples ready for storage (the full day on slot 143, or one live
    /// sample)
    Flush(Vec<Sample>),
    /// Slot index at or below the last accepted one; dropped
    Duplicate,
    /// Slot index skipped ahead of the sequence; dropped, drain continues
    Skipped,
}

struct BufferedSlot {
    timestamp: i64,
    message: SlotMessage,
}

/// Sequencing state machine for one device's ring buffer
pub struct SlotDrain {
    state: DrainState,
    last_received: Option<u8>,
    last_requested: u8,
    buffer: Vec<BufferedSlot>,
    kind_map: KindMap,
}

impl SlotDrain {
    pub fn new(kind_map: KindMap) -> Self {
        Self {
            state: DrainState::Idle,
            last_received: None,
            last_requested: 0,
            buffer: Vec::new(),
            kind_map,
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    /// Restart catch-up from slot 0, discarding any partial buffer.
    pub fn begin_catch_up(&mut self) {
        if !self.buffer.is_empty() {
            debug!(
                buffered = self.buffer.len(),
                "discarding partial drain buffer"
            );
        }
        self.state = DrainState::CatchUp;
        self.last_received = None;
        self.last_requested = 0;
        self.buffer.clear();
    }

    /// Next range to request: from the slot after the last accepted one to
    /// the end of that hour. `None` outside of catch-up.
    pub fn next_request(&mut self) -> Option<SlotRange> {
        if self.state != DrainState::CatchUp {
            return None;
        }
        let from = self.last_received.map_or(0, |slot| slot + 1).min(LAST_SLOT);
        let hour = from / 6;
        self.last_requested = hour * 6 + 5;
        // fields are in domain by construction, from/to minutes included
        SlotRange::new(hour, (from % 6) * 10, hour, 59).ok()
    }

    /// Process one slot message received at wall-clock time `now`.
    pub fn on_slot(&mut self, message: SlotMessage, now: &DateTime<Local>) -> SlotOutcome {
        match self.state {
            DrainState::Idle => {
                warn!(slot = message.slot, "slot received before any sync; dropped");
                SlotOutcome::Skipped
            }
            DrainState::Live => SlotOutcome::Flush(vec![self.to_sample(&message, now)]),
            DrainState::CatchUp => self.on_catch_up_slot(message, now),
        }
    }

    fn on_catch_up_slot(&mut self, message: SlotMessage, now: &DateTime<Local>) -> SlotOutcome {
        let expected = self.last_received.map_or(0, |slot| slot + 1);
        if message.slot < expected {
            debug!(slot = message.slot, expected, "duplicate slot dropped");
            return SlotOutcome::Duplicate;
        }
        if message.slot > expected {
            warn!(
                slot = message.slot,
                expected, "slot sequence violation; record skipped"
            );
            return SlotOutcome::Skipped;
        }

        self.buffer.push(BufferedSlot {
            timestamp: slot_timestamp(now, message.slot),
            message,
        });
        self.last_received = Some(message.slot);

        if message.slot == LAST_SLOT {
            return SlotOutcome::Flush(self.finish_catch_up());
        }
        if message.slot == self.last_requested {
            return SlotOutcome::RequestNext;
        }
        SlotOutcome::Buffered
    }

    fn finish_catch_up(&mut self) -> Vec<Sample> {
        self.buffer.sort_by_key(|slot| slot.timestamp);
        let batch: Vec<Sample> = self
            .buffer
            .iter()
            .map(|slot| self.sample_at(slot.timestamp, &slot.message))
            .collect();
        self.buffer.clear();
        self.state = DrainState::Live;
        batch
    }

    fn to_sample(&self, message: &SlotMessage, now: &DateTime<Local>) -> Sample {
        self.sample_at(slot_timestamp(now, message.slot), message)
    }

    fn sample_at(&self, timestamp: i64, message: &SlotMessage) -> Sample {
        let heart_rate = match message.heart_rate {
            0 | 255 => None,
            bpm => Some(bpm),
        };
        Sample {
            timestamp,
            raw_kind: raw_kind::ACTIVITY,
            kind: self.kind_map.normalize(raw_kind::ACTIVITY),
            steps: u32::from(message.steps),
            heart_rate,
            inactive_seconds: message.inactive_seconds,
            distance_m: None,
            calories: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 15, hour, minute, 0).unwrap()
    }

    fn slot_msg(slot: u8) -> SlotMessage {
        SlotMessage {
            slot,
            steps: u16::from(slot) * 3,
            heart_rate: 70,
            inactive_seconds: 0,
        }
    }

    fn drain() -> SlotDrain {
        SlotDrain::new(KindMap::wl01())
    }

    #[test]
    fn test_now_slot() {
        assert_eq!(now_slot(&at(0, 0)), 0);
        assert_eq!(now_slot(&at(0, 9)), 0);
        assert_eq!(now_slot(&at(8, 10)), 49);
        assert_eq!(now_slot(&at(23, 59)), 143);
    }

    #[test]
    fn test_day_boundary_correction() {
        // 08:15 -> current slot 49; slot 48 is this morning, slot 49 and up
        // are yesterday
        let now = at(8, 15);
        let slot48 = slot_timestamp(&now, 48);
        let slot49 = slot_timestamp(&now, 49);
        let slot50 = slot_timestamp(&now, 50);
        assert_eq!(slot48, slot49 + DAY_SECONDS - SLOT_SECONDS);
        assert_eq!(slot50 - slot49, SLOT_SECONDS);
        // yesterday's slot 49 is the oldest data in the ring
        assert!(slot49 < slot_timestamp(&now, 0));
    }

    #[test]
    fn test_first_request_covers_first_hour() {
        let mut drain = drain();
        drain.begin_catch_up();
        let range = drain.next_request().unwrap();
        assert_eq!(
            (range.from_hour(), range.from_minute(), range.to_hour(), range.to_minute()),
            (0, 0, 0, 59)
        );
    }

    #[test]
    fn test_request_resumes_mid_hour() {
        let now = at(12, 0);
        let mut drain = drain();
        drain.begin_catch_up();
        drain.next_request().unwrap();
        for slot in 0..=3 {
            drain.on_slot(slot_msg(slot), &now);
        }
        let range = drain.next_request().unwrap();
        assert_eq!((range.from_hour(), range.from_minute()), (0, 40));
    }

    #[test]
    fn test_full_catch_up_single_sorted_flush() {
        let now = at(8, 15);
        let mut drain = drain();
        drain.begin_catch_up();

        let mut flushes = 0;
        let mut batch = Vec::new();
        while drain.state() == DrainState::CatchUp {
            let range = drain.next_request().unwrap();
            let from = range.from_hour() * 6 + range.from_minute() / 10;
            let to = range.to_hour() * 6 + 5;
            for slot in from..=to {
                match drain.on_slot(slot_msg(slot), &now) {
                    SlotOutcome::Flush(samples) => {
                        flushes += 1;
                        batch = samples;
                    }
                    SlotOutcome::Buffered | SlotOutcome::RequestNext => {}
                    other => panic!("unexpected outcome {other:?}"),
                }
            }
        }

        assert_eq!(flushes, 1);
        assert_eq!(batch.len(), usize::from(SLOTS_PER_DAY));
        // contiguous ascending timestamps spanning exactly one day
        for pair in batch.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, SLOT_SECONDS);
        }
        assert_eq!(batch[0].raw_kind, raw_kind::ACTIVITY);
        assert_eq!(batch[0].kind, crate::samples::NormalizedKind::Activity);
        assert_eq!(drain.state(), DrainState::Live);
        assert!(drain.next_request().is_none());
    }

    #[test]
    fn test_duplicates_dropped_not_buffered() {
        let now = at(12, 0);
        let mut drain = drain();
        drain.begin_catch_up();
        drain.next_request();
        assert_eq!(drain.on_slot(slot_msg(0), &now), SlotOutcome::Buffered);
        assert_eq!(drain.on_slot(slot_msg(1), &now), SlotOutcome::Buffered);
        assert_eq!(drain.on_slot(slot_msg(1), &now), SlotOutcome::Duplicate);
        assert_eq!(drain.on_slot(slot_msg(0), &now), SlotOutcome::Duplicate);
        // sequencing position unchanged
        assert_eq!(drain.on_slot(slot_msg(2), &now), SlotOutcome::Buffered);
        assert_eq!(drain.buffer.len(), 3);
    }

    #[test]
    fn test_skip_ahead_logged_and_dropped() {
        let now = at(12, 0);
        let mut drain = drain();
        drain.begin_catch_up();
        drain.next_request();
        drain.on_slot(slot_msg(0), &now);
        assert_eq!(drain.on_slot(slot_msg(5), &now), SlotOutcome::Skipped);
        // drain still waits for slot 1
        assert_eq!(drain.on_slot(slot_msg(1), &now), SlotOutcome::Buffered);
    }

    #[test]
    fn test_live_slot_flushes_alone() {
        let now = at(8, 15);
        let mut drain = drain();
        drain.begin_catch_up();
        while drain.state() == DrainState::CatchUp {
            drain.next_request();
            let from = drain.last_received.map_or(0, |s| s + 1);
            let to = (from / 6) * 6 + 5;
            for slot in from..=to {
                drain.on_slot(slot_msg(slot), &now);
            }
        }

        let outcome = drain.on_slot(slot_msg(48), &at(8, 25));
        match outcome {
            SlotOutcome::Flush(samples) => {
                assert_eq!(samples.len(), 1);
                assert_eq!(samples[0].steps, 144);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_slot_before_sync_is_dropped() {
        let now = at(12, 0);
        let mut drain = drain();
        assert_eq!(drain.on_slot(slot_msg(10), &now), SlotOutcome::Skipped);
    }
}
