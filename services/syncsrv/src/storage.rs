//! Telemetry storage
//!
//! `TelemetryStore` is the persistence seam: at-least-once appends,
//! idempotent on the sample timestamp, with overlays kept in persisted order
//! because merge precedence depends on it. `MemoryStore` is the in-tree
//! implementation; a database-backed store plugs in behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::Result;
use crate::samples::{apply_overlays, Overlay, Sample};

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Append samples; re-appending a timestamp overwrites that sample.
    async fn append_samples(&self, samples: &[Sample]) -> Result<()>;

    /// Append overlays, preserving submission order.
    async fn append_overlays(&self, overlays: &[Overlay]) -> Result<()>;

    /// Samples with timestamps in `[from, to]`, ascending.
    async fn query_samples(&self, from: i64, to: i64) -> Result<Vec<Sample>>;

    /// Overlays intersecting `[from, to]`, in persisted order.
    async fn query_overlays(&self, from: i64, to: i64) -> Result<Vec<Overlay>>;

    /// Samples with overlays applied at read time.
    async fn query_merged(&self, from: i64, to: i64) -> Result<Vec<Sample>> {
        let mut samples = self.query_samples(from, to).await?;
        let overlays = self.query_overlays(from, to).await?;
        apply_overlays(&mut samples, &overlays);
        Ok(samples)
    }
}

/// In-memory reference store
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: DashMap<i64, Sample>,
    overlays: RwLock<Vec<Overlay>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn append_samples(&self, samples: &[Sample]) -> Result<()> {
        for sample in samples {
            self.samples.insert(sample.timestamp, *sample);
        }
        Ok(())
    }

    async fn append_overlays(&self, overlays: &[Overlay]) -> Result<()> {
        self.overlays.write().extend_from_slice(overlays);
        Ok(())
    }

    async fn query_samples(&self, from: i64, to: i64) -> Result<Vec<Sample>> {
        let mut result: Vec<Sample> = self
            .samples
            .iter()
            .filter(|entry| *entry.key() >= from && *entry.key() <= to)
            .map(|entry| *entry.value())
            .collect();
        result.sort_by_key(|sample| sample.timestamp);
        Ok(result)
    }

    async fn query_overlays(&self, from: i64, to: i64) -> Result<Vec<Overlay>> {
        Ok(self
            .overlays
            .read()
            .iter()
            .filter(|overlay| overlay.from <= to && overlay.to >= from)
            .copied()
            .collect())
    }
}
