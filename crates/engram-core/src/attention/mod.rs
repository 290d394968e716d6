//! Attention gate (working memory).
//!
//! Admits a capacity-bounded active set from incoming items. Capacity is
//! recomputed every admission cycle as base +/- variance, never leaving
//! Miller's 7 +/- 2 range. Candidates are ranked by a composite of recency
//! decay and externally supplied salience; ties break by arrival order.
//! Items that lose the competition are not deleted: they return to a
//! pending pool and compete again next cycle.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::AttentionConfig;
use crate::types::{MemoryItem, MemoryStage};

/// Result of one admission cycle.
#[derive(Debug, Clone)]
pub struct AdmissionResult {
    /// Capacity in effect for this cycle, always within [5, 9].
    pub capacity: usize,
    /// The admitted active set, highest score first.
    pub admitted: Vec<MemoryItem>,
    /// Items evicted to the pending pool this cycle.
    pub evicted: Vec<MemoryItem>,
}

/// Capacity-bounded attention gate over a sliding time window.
pub struct AttentionGate {
    config: AttentionConfig,
    rng: StdRng,
    pending: Vec<MemoryItem>,
}

impl AttentionGate {
    /// Create a gate from config. The RNG is seeded from
    /// `config.rng_seed`, so identical inputs and seed produce identical
    /// admission results.
    pub fn new(config: AttentionConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.rng_seed);
        Self {
            config,
            rng,
            pending: Vec::new(),
        }
    }

    /// Draw this cycle's capacity: base +/- variance, clamped into the
    /// configured bounds. The bounds themselves were validated into [5, 9]
    /// at startup.
    fn draw_capacity(&mut self) -> usize {
        let variance = self.config.capacity_variance as i64;
        let delta = self.rng.gen_range(-variance..=variance);
        let capacity = self.config.base_capacity as i64 + delta;
        capacity.clamp(
            self.config.min_capacity as i64,
            self.config.max_capacity as i64,
        ) as usize
    }

    /// Composite admission score: recency decay times salience.
    fn score(&self, item: &MemoryItem, now: DateTime<Utc>) -> f64 {
        let recency = (-item.age_seconds(now) / self.config.recency_decay_secs).exp();
        recency * item.salience()
    }

    /// Run one admission cycle over new candidates plus the pending pool.
    ///
    /// Empty input with an empty pool yields an empty set. Fewer
    /// candidates than capacity admits them all.
    pub fn admit(&mut self, candidates: Vec<MemoryItem>, now: DateTime<Utc>) -> AdmissionResult {
        let capacity = self.draw_capacity();

        // Pending items from earlier cycles compete again, after the new
        // arrivals so that ties keep favoring arrival order. Duplicate
        // ids keep their first occurrence.
        let mut pool: Vec<MemoryItem> = candidates;
        pool.append(&mut self.pending);
        let mut seen = std::collections::HashSet::new();
        pool.retain(|item| seen.insert(item.id.clone()));

        if pool.is_empty() {
            return AdmissionResult {
                capacity,
                admitted: Vec::new(),
                evicted: Vec::new(),
            };
        }

        // Stable sort: equal scores keep arrival order.
        let mut scored: Vec<(OrderedFloat<f64>, MemoryItem)> = pool
            .into_iter()
            .map(|item| (OrderedFloat(self.score(&item, now)), item))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut admitted = Vec::with_capacity(capacity);
        let mut evicted = Vec::new();
        for (rank, (_, mut item)) in scored.into_iter().enumerate() {
            if rank < capacity {
                item.stage = MemoryStage::Active;
                admitted.push(item);
            } else {
                item.stage = MemoryStage::Pending;
                evicted.push(item);
            }
        }

        tracing::debug!(
            capacity,
            admitted = admitted.len(),
            evicted = evicted.len(),
            "admission cycle"
        );

        self.pending = evicted.clone();
        AdmissionResult {
            capacity,
            admitted,
            evicted,
        }
    }

    /// The current pending pool (evicted but re-admissible items).
    pub fn pending(&self) -> &[MemoryItem] {
        &self.pending
    }
}
