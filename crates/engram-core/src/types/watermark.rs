//! Per-stage watermarks for idempotent incremental processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Pipeline stage names, used as watermark and run-lock keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Attention gate (working memory).
    Attention,
    /// Episode builder (short-term memory).
    Episode,
    /// Consolidation engine.
    Consolidation,
    /// Semantic network builder (long-term memory).
    Semantic,
}

impl Stage {
    /// All stages in downstream order.
    pub fn all() -> [Stage; 4] {
        [Stage::Attention, Stage::Episode, Stage::Consolidation, Stage::Semantic]
    }
}

/// Incremental-processing cursor for one stage.
///
/// A record is selected for work when it is strictly newer than
/// `last_processed_at`, or when it sits exactly at the cursor but its
/// content hash differs from the recorded one (which catches a
/// correction to the boundary record after a partial run). Everything
/// older has been fully processed; replaying it is prevented here and
/// made harmless by keyed upserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkRecord {
    /// Stage this watermark belongs to.
    pub stage: Stage,
    /// Timestamp of the newest record fully processed.
    pub last_processed_at: DateTime<Utc>,
    /// Content hash of the newest processed record.
    pub content_hash: String,
}

impl WatermarkRecord {
    /// A watermark at the epoch, selecting everything.
    pub fn initial(stage: Stage) -> Self {
        Self {
            stage,
            last_processed_at: DateTime::<Utc>::MIN_UTC,
            content_hash: String::new(),
        }
    }

    /// Whether a record with the given timestamp and hash needs processing.
    pub fn selects(&self, record_at: DateTime<Utc>, record_hash: &str) -> bool {
        record_at > self.last_processed_at
            || (record_at == self.last_processed_at && record_hash != self.content_hash)
    }
}

/// MD5 content hash, hex-encoded.
///
/// Used both for watermark comparison and for integrity checks on stored
/// records.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}
