//! Canonical samples and overlay merge
//!
//! Device-family raw activity kinds are normalized through a `KindMap`
//! lookup table; unmapped bytes become `Unknown` rather than an error, so a
//! firmware update adding kinds degrades instead of breaking. Overlays
//! reclassify stored samples at merge time without rewriting them: the
//! samples stay as appended, overlays are applied in persisted order and the
//! last match wins.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use wearlink_proto::{SleepMessage, SummaryMessage};

/// Normalized activity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalizedKind {
    Unknown,
    Activity,
    LightSleep,
    DeepSleep,
    RemSleep,
    Awake,
    NotWorn,
}

/// Raw kind bytes of the WL01 device family
pub mod raw_kind {
    pub const ACTIVITY: u8 = 0x10;
    pub const ACTIVITY_INTENSE: u8 = 0x11;
    pub const LIGHT_SLEEP: u8 = 0x20;
    pub const DEEP_SLEEP: u8 = 0x21;
    pub const REM_SLEEP: u8 = 0x22;
    pub const AWAKE: u8 = 0x23;
    pub const NOT_WORN: u8 = 0x30;
}

/// One canonical telemetry sample, keyed by epoch-second timestamp
///
/// Carries the device's raw kind byte alongside the normalized kind so the
/// original classification survives storage; optional fields stay `None`
/// for sources that do not report them (ring slots carry no distance, sleep
/// bases carry no steps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    pub raw_kind: u8,
    pub kind: NormalizedKind,
    pub steps: u32,
    pub heart_rate: Option<u8>,
    pub inactive_seconds: u16,
    pub distance_m: Option<u32>,
    pub calories: Option<u32>,
}

/// Reclassification of a time range, applied to samples at read time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    /// Inclusive range start, epoch seconds
    pub from: i64,
    /// Inclusive range end, epoch seconds
    pub to: i64,
    pub raw_kind: u8,
    pub kind: NormalizedKind,
}

/// Raw-to-normalized kind table for one device family
#[derive(Debug, Clone)]
pub struct KindMap {
    entries: Vec<(u8, NormalizedKind)>,
}

impl KindMap {
    pub fn new(entries: impl IntoIterator<Item = (u8, NormalizedKind)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Table for the WL01 family.
    pub fn wl01() -> Self {
        Self::new([
            (raw_kind::ACTIVITY, NormalizedKind::Activity),
            (raw_kind::ACTIVITY_INTENSE, NormalizedKind::Activity),
            (raw_kind::LIGHT_SLEEP, NormalizedKind::LightSleep),
            (raw_kind::DEEP_SLEEP, NormalizedKind::DeepSleep),
            (raw_kind::REM_SLEEP, NormalizedKind::RemSleep),
            (raw_kind::AWAKE, NormalizedKind::Awake),
            (raw_kind::NOT_WORN, NormalizedKind::NotWorn),
        ])
    }

    /// Total lookup: bytes without an entry normalize to `Unknown`.
    pub fn normalize(&self, raw: u8) -> NormalizedKind {
        self.entries
            .iter()
            .find(|(byte, _)| *byte == raw)
            .map(|(_, kind)| *kind)
            .unwrap_or(NormalizedKind::Unknown)
    }
}

/// Apply overlays to samples in place. Overlays are scanned in the given
/// (persisted) order; for a sample whose timestamp falls in `[from, to]` the
/// last matching overlay wins. Running this twice over the same inputs
/// changes nothing.
pub fn apply_overlays(samples: &mut [Sample], overlays: &[Overlay]) {
    for sample in samples.iter_mut() {
        for overlay in overlays {
            if sample.timestamp >= overlay.from && sample.timestamp <= overlay.to {
                sample.kind = overlay.kind;
            }
        }
    }
}

/// Expand a device sleep record into its base sample and the consecutive
/// phase overlays. Intervals run back to back from the record start;
/// zero-length intervals are skipped.
pub fn expand_sleep_record(record: &SleepMessage, map: &KindMap) -> (Sample, Vec<Overlay>) {
    let start = i64::from(record.start_timestamp);
    let phases = [
        (record.fall_asleep_min, raw_kind::LIGHT_SLEEP),
        (record.light_min, raw_kind::LIGHT_SLEEP),
        (record.deep_min, raw_kind::DEEP_SLEEP),
        (record.rem_min, raw_kind::REM_SLEEP),
        (record.awake_min, raw_kind::AWAKE),
    ];

    let mut overlays = Vec::new();
    let mut cursor = start;
    for (minutes, raw) in phases {
        if minutes == 0 {
            continue;
        }
        let end = cursor + i64::from(minutes) * 60;
        overlays.push(Overlay {
            from: cursor,
            to: end,
            raw_kind: raw,
            kind: map.normalize(raw),
        });
        cursor = end;
    }

    let base = Sample {
        timestamp: start,
        raw_kind: raw_kind::LIGHT_SLEEP,
        kind: map.normalize(raw_kind::LIGHT_SLEEP),
        steps: 0,
        heart_rate: None,
        inactive_seconds: 0,
        distance_m: None,
        calories: None,
    };
    (base, overlays)
}

/// Convert a day summary into its canonical sample at local midnight of the
/// reported date. `None` when that date has no local midnight.
pub fn summary_to_sample(summary: &SummaryMessage, map: &KindMap) -> Option<Sample> {
    let midnight = Local
        .with_ymd_and_hms(
            i32::from(summary.year),
            u32::from(summary.month),
            u32::from(summary.day),
            0,
            0,
            0,
        )
        .earliest()?;
    Some(Sample {
        timestamp: midnight.timestamp(),
        raw_kind: raw_kind::ACTIVITY,
        kind: map.normalize(raw_kind::ACTIVITY),
        steps: summary.steps,
        heart_rate: None,
        inactive_seconds: 0,
        distance_m: Some(summary.distance_m),
        calories: Some(summary.calories),
    })
}
