//! Durable pipeline store.
//!
//! SQLite-backed persistence for every stage's output, plus the
//! cross-cutting tables: watermarks, TTL'd run locks, quarantine, and
//! dead letters. Connections come from a bounded deadpool; exhaustion
//! blocks until the configured wait timeout, then errors.
//!
//! The store is the only shared mutable resource in the pipeline. All
//! writers go through transactions; strength/weight columns carry CHECK
//! constraints so an out-of-contract value can never be persisted.

use chrono::{DateTime, Duration, Utc};
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime, Timeouts};
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;

use crate::config::StoreConfig;
use crate::consolidation::Association;
use crate::error::{EngramError, EngramResult, ErrorCode};
use crate::types::{
    content_hash, AgeCategory, ConsolidatedMemory, Episode, EpisodeState, MemoryItem, MemoryStage,
    SchematizationState, SemanticNode, Stage, WatermarkRecord,
};

/// Target table for a write-back batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritebackTable {
    Items,
    Episodes,
    Consolidated,
    Associations,
    SemanticNodes,
}

impl WritebackTable {
    /// SQL table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            WritebackTable::Items => "memory_items",
            WritebackTable::Episodes => "episodes",
            WritebackTable::Consolidated => "consolidated_memories",
            WritebackTable::Associations => "associations",
            WritebackTable::SemanticNodes => "semantic_nodes",
        }
    }
}

/// A record headed for the durable store. Upserts are keyed by the
/// record's stable id, so re-applying a batch is a no-op.
#[derive(Debug, Clone)]
pub enum StoreRecord {
    Item(MemoryItem),
    Episode(Episode),
    Consolidated(ConsolidatedMemory),
    Association(Association),
    Node(SemanticNode),
}

impl StoreRecord {
    /// Stable id the upsert is keyed by.
    pub fn id(&self) -> String {
        match self {
            StoreRecord::Item(item) => item.id.clone(),
            StoreRecord::Episode(episode) => episode.id.clone(),
            StoreRecord::Consolidated(memory) => memory.id.clone(),
            StoreRecord::Association(assoc) => format!("{}->{}", assoc.from, assoc.to),
            StoreRecord::Node(node) => node.id.clone(),
        }
    }

    /// Timestamp used to advance the stage watermark after a successful
    /// write.
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            StoreRecord::Item(item) => item.created_at,
            StoreRecord::Episode(episode) => episode.created_at,
            StoreRecord::Consolidated(memory) => memory.consolidated_at,
            StoreRecord::Association(_) => Utc::now(),
            StoreRecord::Node(node) => node.updated_at,
        }
    }

    fn matches(&self, table: WritebackTable) -> bool {
        matches!(
            (self, table),
            (StoreRecord::Item(_), WritebackTable::Items)
                | (StoreRecord::Episode(_), WritebackTable::Episodes)
                | (StoreRecord::Consolidated(_), WritebackTable::Consolidated)
                | (StoreRecord::Association(_), WritebackTable::Associations)
                | (StoreRecord::Node(_), WritebackTable::SemanticNodes)
        )
    }
}

/// Pooled SQLite store for the whole pipeline.
pub struct PipelineStore {
    pool: Pool,
}

impl PipelineStore {
    /// Open (or create) the store at the configured path with a bounded
    /// connection pool.
    pub async fn open(config: &StoreConfig) -> EngramResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts = Timeouts {
            wait: Some(std::time::Duration::from_secs(config.pool_wait_timeout_secs)),
            ..Timeouts::default()
        };
        let mut cfg = Config::new(&config.db_path);
        cfg.pool = Some(pool_config);
        let pool = cfg
            .create_pool(Runtime::Tokio1)
            .map_err(|e| EngramError::database(format!("failed to create pool: {}", e)))?;

        let store = Self { pool };
        store.with_conn(|conn| init_schema(conn)).await?;
        Ok(store)
    }

    /// In-memory store for tests. Pool size is pinned to one connection
    /// so every caller sees the same database.
    pub async fn open_in_memory() -> EngramResult<Self> {
        let mut pool_config = PoolConfig::new(1);
        pool_config.timeouts = Timeouts {
            wait: Some(std::time::Duration::from_secs(30)),
            ..Timeouts::default()
        };
        let mut cfg = Config::new(":memory:");
        cfg.pool = Some(pool_config);
        let pool = cfg
            .create_pool(Runtime::Tokio1)
            .map_err(|e| EngramError::database(format!("failed to create pool: {}", e)))?;
        let store = Self { pool };
        store.with_conn(|conn| init_schema(conn)).await?;
        Ok(store)
    }

    /// Run a closure on a pooled connection.
    async fn with_conn<T, F>(&self, f: F) -> EngramResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> EngramResult<T> + Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            EngramError::pool_exhausted(format!("connection pool unavailable: {}", e))
        })?;
        conn.interact(f)
            .await
            .map_err(|e| EngramError::database(format!("connection task failed: {}", e)))?
    }

    // ---- watermarks ----

    /// Get the watermark for a stage, if one has been set.
    pub async fn get_watermark(&self, stage: Stage) -> EngramResult<Option<WatermarkRecord>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT last_processed_at, content_hash FROM watermarks WHERE stage = ?1",
                    params![stage.to_string()],
                    |row| {
                        let at: String = row.get(0)?;
                        let hash: String = row.get(1)?;
                        Ok((at, hash))
                    },
                )
                .optional()?;
            match row {
                Some((at, hash)) => Ok(Some(WatermarkRecord {
                    stage,
                    last_processed_at: parse_ts(&at)?,
                    content_hash: hash,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    /// Set (upsert) the watermark for a stage.
    pub async fn set_watermark(
        &self,
        stage: Stage,
        last_processed_at: DateTime<Utc>,
        hash: String,
    ) -> EngramResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO watermarks (stage, last_processed_at, content_hash)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(stage) DO UPDATE SET
                     last_processed_at = excluded.last_processed_at,
                     content_hash = excluded.content_hash",
                params![stage.to_string(), last_processed_at.to_rfc3339(), hash],
            )?;
            Ok(())
        })
        .await
    }

    // ---- run locks ----

    /// Try to acquire the advisory run lock for a stage.
    ///
    /// Returns false when another live holder has it. An expired lock
    /// (crashed holder) is taken over silently: the TTL is what keeps a
    /// crash from deadlocking future runs.
    pub async fn acquire_run_lock(&self, stage: Stage, ttl: Duration) -> EngramResult<bool> {
        let holder = uuid::Uuid::new_v4().to_string();
        self.with_conn(move |conn| {
            let now = Utc::now();
            let expires = (now + ttl).to_rfc3339();
            let changed = conn.execute(
                "INSERT INTO run_locks (stage, holder, expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(stage) DO UPDATE SET
                     holder = excluded.holder,
                     expires_at = excluded.expires_at
                 WHERE run_locks.expires_at < ?4",
                params![stage.to_string(), holder, expires, now.to_rfc3339()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Release the run lock for a stage.
    pub async fn release_run_lock(&self, stage: Stage) -> EngramResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM run_locks WHERE stage = ?1",
                params![stage.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    // ---- write-back ----

    /// Upsert a batch of records in one transaction. All-or-nothing: any
    /// failure rolls the whole batch back.
    pub async fn upsert_batch(
        &self,
        table: WritebackTable,
        records: Vec<StoreRecord>,
    ) -> EngramResult<usize> {
        if let Some(bad) = records.iter().find(|r| !r.matches(table)) {
            return Err(EngramError::integrity(
                bad.id(),
                format!("record does not belong in table '{}'", table.table_name()),
            ));
        }
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| EngramError::Database {
                message: e.to_string(),
                code: ErrorCode::DbTransactionFailed,
                source: Some(Box::new(e)),
            })?;
            let mut written = 0;
            for record in &records {
                upsert_record(&tx, record)?;
                written += 1;
            }
            tx.commit().map_err(|e| EngramError::Database {
                message: e.to_string(),
                code: ErrorCode::DbTransactionFailed,
                source: Some(Box::new(e)),
            })?;
            Ok(written)
        })
        .await
    }

    // ---- fetches ----

    /// Items in a given stage, `created_at` ascending.
    pub async fn items_in_stage(&self, stage: MemoryStage) -> EngramResult<Vec<MemoryItem>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content_ref, created_at, sentiment, importance, stage, strength, coactivations, metadata
                 FROM memory_items WHERE stage = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![stage.to_string()], row_to_item)?;
            collect_rows(rows)
        })
        .await
    }

    /// Episodes in a given state, `created_at` ascending.
    pub async fn episodes_in_state(&self, state: EpisodeState) -> EngramResult<Vec<Episode>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, category, item_ids, window_start, window_end, recency_factor,
                        emotional_salience, strength, hebbian_potential, ready, state,
                        created_at, updated_at
                 FROM episodes WHERE state = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![state.to_string()], row_to_episode)?;
            collect_rows(rows)
        })
        .await
    }

    /// Every stored episode, `created_at` ascending.
    pub async fn all_episodes(&self) -> EngramResult<Vec<Episode>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, category, item_ids, window_start, window_end, recency_factor,
                        emotional_salience, strength, hebbian_potential, ready, state,
                        created_at, updated_at
                 FROM episodes ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_episode)?;
            collect_rows(rows)
        })
        .await
    }

    /// Consolidated memories, `consolidated_at` ascending.
    pub async fn all_consolidated(&self) -> EngramResult<Vec<ConsolidatedMemory>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, episode_id, consolidated_strength, semantic_category, created_at, consolidated_at
                 FROM consolidated_memories ORDER BY consolidated_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_consolidated)?;
            collect_rows(rows)
        })
        .await
    }

    /// Every semantic node.
    pub async fn all_semantic_nodes(&self) -> EngramResult<Vec<SemanticNode>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, cluster_id, competition_rank, access_frequency, retrieval_strength,
                        consolidated_strength, semantic_category, age_category,
                        schematization_state, created_at, updated_at
                 FROM semantic_nodes ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_node)?;
            collect_rows(rows)
        })
        .await
    }

    /// Every stored association edge.
    pub async fn all_associations(&self) -> EngramResult<Vec<Association>> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT from_id, to_id, weight FROM associations ORDER BY from_id")?;
            let rows = stmt.query_map([], |row| {
                Ok(Association {
                    from: row.get(0)?,
                    to: row.get(1)?,
                    weight: row.get(2)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Hard-delete semantic nodes by id (homeostatic pruning).
    pub async fn delete_semantic_nodes(&self, ids: Vec<String>) -> EngramResult<usize> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for id in &ids {
                deleted += tx.execute("DELETE FROM semantic_nodes WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }

    // ---- quarantine / dead letters ----

    /// Quarantine a record for this run. Returns true when the record's
    /// consecutive-run count reached the threshold and it was escalated
    /// to the dead-letter list.
    pub async fn quarantine_record(
        &self,
        stage: Stage,
        record_id: String,
        reason: String,
        escalation_threshold: u32,
    ) -> EngramResult<bool> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO quarantine (record_id, stage, reason, run_count, last_seen_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(record_id, stage) DO UPDATE SET
                     run_count = quarantine.run_count + 1,
                     reason = excluded.reason,
                     last_seen_at = excluded.last_seen_at",
                params![record_id, stage.to_string(), reason, now],
            )?;
            let run_count: u32 = conn.query_row(
                "SELECT run_count FROM quarantine WHERE record_id = ?1 AND stage = ?2",
                params![record_id, stage.to_string()],
                |row| row.get(0),
            )?;
            if run_count >= escalation_threshold {
                conn.execute(
                    "INSERT OR REPLACE INTO dead_letters (record_id, stage, reason, moved_at)
                     SELECT record_id, stage, reason, ?3 FROM quarantine
                     WHERE record_id = ?1 AND stage = ?2",
                    params![record_id, stage.to_string(), now],
                )?;
                conn.execute(
                    "DELETE FROM quarantine WHERE record_id = ?1 AND stage = ?2",
                    params![record_id, stage.to_string()],
                )?;
                tracing::error!(record_id, stage = %stage, run_count, "record escalated to dead letters");
                return Ok(true);
            }
            Ok(false)
        })
        .await
    }

    /// Clear a record's quarantine entry after it finally succeeds, so
    /// the consecutive-run count starts over.
    pub async fn clear_quarantine(&self, stage: Stage, record_id: String) -> EngramResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM quarantine WHERE record_id = ?1 AND stage = ?2",
                params![record_id, stage.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    /// Ids currently on the dead-letter list for a stage.
    pub async fn dead_letters(&self, stage: Stage) -> EngramResult<Vec<String>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record_id FROM dead_letters WHERE stage = ?1 ORDER BY record_id",
            )?;
            let rows = stmt.query_map(params![stage.to_string()], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Content hash over a serialized record, for watermark comparison.
    pub fn record_hash(record: &StoreRecord) -> String {
        let serialized = match record {
            StoreRecord::Item(item) => serde_json::to_string(item),
            StoreRecord::Episode(episode) => serde_json::to_string(episode),
            StoreRecord::Consolidated(memory) => serde_json::to_string(memory),
            StoreRecord::Association(assoc) => serde_json::to_string(assoc),
            StoreRecord::Node(node) => serde_json::to_string(node),
        };
        content_hash(&serialized.unwrap_or_default())
    }
}

fn init_schema(conn: &mut Connection) -> EngramResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memory_items (
            id TEXT PRIMARY KEY,
            content_ref TEXT NOT NULL,
            created_at TEXT NOT NULL,
            sentiment REAL NOT NULL CHECK(sentiment >= 0.0 AND sentiment <= 1.0),
            importance REAL NOT NULL CHECK(importance >= 0.0 AND importance <= 1.0),
            stage TEXT NOT NULL DEFAULT 'incoming',
            strength REAL NOT NULL CHECK(strength >= 0.0 AND strength <= 1.0),
            coactivations INTEGER NOT NULL DEFAULT 0,
            metadata TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_memory_items_created_at ON memory_items(created_at);
        CREATE INDEX IF NOT EXISTS idx_memory_items_stage ON memory_items(stage);

        CREATE TABLE IF NOT EXISTS episodes (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            item_ids TEXT NOT NULL,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            recency_factor REAL NOT NULL,
            emotional_salience REAL NOT NULL CHECK(emotional_salience >= 0.0 AND emotional_salience <= 1.0),
            strength REAL NOT NULL CHECK(strength >= 0.0 AND strength <= 1.0),
            hebbian_potential INTEGER NOT NULL DEFAULT 0,
            ready INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_state ON episodes(state);
        CREATE INDEX IF NOT EXISTS idx_episodes_category ON episodes(category);
        CREATE INDEX IF NOT EXISTS idx_episodes_created_at ON episodes(created_at);

        CREATE TABLE IF NOT EXISTS consolidated_memories (
            id TEXT PRIMARY KEY,
            episode_id TEXT NOT NULL UNIQUE,
            consolidated_strength REAL NOT NULL CHECK(consolidated_strength >= 0.0 AND consolidated_strength <= 1.0),
            semantic_category TEXT NOT NULL,
            created_at TEXT NOT NULL,
            consolidated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS associations (
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            weight REAL NOT NULL CHECK(weight >= 0.0 AND weight <= 1.0),
            PRIMARY KEY (from_id, to_id)
        );

        CREATE TABLE IF NOT EXISTS semantic_nodes (
            id TEXT PRIMARY KEY,
            cluster_id INTEGER NOT NULL,
            competition_rank INTEGER NOT NULL,
            access_frequency INTEGER NOT NULL DEFAULT 0,
            retrieval_strength REAL NOT NULL CHECK(retrieval_strength >= 0.0 AND retrieval_strength <= 1.0),
            consolidated_strength REAL NOT NULL CHECK(consolidated_strength >= 0.0 AND consolidated_strength <= 1.0),
            semantic_category TEXT NOT NULL,
            age_category TEXT NOT NULL,
            schematization_state TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_semantic_nodes_cluster ON semantic_nodes(cluster_id);

        CREATE TABLE IF NOT EXISTS watermarks (
            stage TEXT PRIMARY KEY,
            last_processed_at TEXT NOT NULL,
            content_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS run_locks (
            stage TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS quarantine (
            record_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            reason TEXT NOT NULL,
            run_count INTEGER NOT NULL DEFAULT 1,
            last_seen_at TEXT NOT NULL,
            PRIMARY KEY (record_id, stage)
        );

        CREATE TABLE IF NOT EXISTS dead_letters (
            record_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            reason TEXT NOT NULL,
            moved_at TEXT NOT NULL,
            PRIMARY KEY (record_id, stage)
        );
        ",
    )?;
    Ok(())
}

fn upsert_record(tx: &rusqlite::Transaction<'_>, record: &StoreRecord) -> EngramResult<()> {
    match record {
        StoreRecord::Item(item) => {
            let metadata = item
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO memory_items
                 (id, content_ref, created_at, sentiment, importance, stage, strength, coactivations, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     content_ref = excluded.content_ref,
                     sentiment = excluded.sentiment,
                     importance = excluded.importance,
                     stage = excluded.stage,
                     strength = excluded.strength,
                     coactivations = excluded.coactivations,
                     metadata = excluded.metadata",
                params![
                    item.id,
                    item.content_ref,
                    item.created_at.to_rfc3339(),
                    item.sentiment,
                    item.importance,
                    item.stage.to_string(),
                    item.strength,
                    item.coactivations,
                    metadata,
                ],
            )?;
        }
        StoreRecord::Episode(episode) => {
            tx.execute(
                "INSERT INTO episodes
                 (id, category, item_ids, window_start, window_end, recency_factor,
                  emotional_salience, strength, hebbian_potential, ready, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                     item_ids = excluded.item_ids,
                     window_end = excluded.window_end,
                     recency_factor = excluded.recency_factor,
                     emotional_salience = excluded.emotional_salience,
                     strength = excluded.strength,
                     hebbian_potential = excluded.hebbian_potential,
                     ready = excluded.ready,
                     state = excluded.state,
                     updated_at = excluded.updated_at",
                params![
                    episode.id,
                    episode.category,
                    serde_json::to_string(&episode.item_ids)?,
                    episode.window_start.to_rfc3339(),
                    episode.window_end.to_rfc3339(),
                    episode.recency_factor,
                    episode.emotional_salience,
                    episode.strength,
                    episode.hebbian_potential,
                    episode.ready_for_consolidation as i32,
                    episode.state.to_string(),
                    episode.created_at.to_rfc3339(),
                    episode.updated_at.to_rfc3339(),
                ],
            )?;
        }
        StoreRecord::Consolidated(memory) => {
            // episode_id is UNIQUE: an episode consolidates at most once,
            // enforced by the store as well as the state machine.
            tx.execute(
                "INSERT INTO consolidated_memories
                 (id, episode_id, consolidated_strength, semantic_category, created_at, consolidated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     consolidated_strength = excluded.consolidated_strength,
                     semantic_category = excluded.semantic_category",
                params![
                    memory.id,
                    memory.episode_id,
                    memory.consolidated_strength,
                    memory.semantic_category,
                    memory.created_at.to_rfc3339(),
                    memory.consolidated_at.to_rfc3339(),
                ],
            )?;
        }
        StoreRecord::Association(assoc) => {
            tx.execute(
                "INSERT INTO associations (from_id, to_id, weight)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(from_id, to_id) DO UPDATE SET weight = excluded.weight",
                params![assoc.from, assoc.to, assoc.weight],
            )?;
        }
        StoreRecord::Node(node) => {
            tx.execute(
                "INSERT INTO semantic_nodes
                 (id, cluster_id, competition_rank, access_frequency, retrieval_strength,
                  consolidated_strength, semantic_category, age_category, schematization_state,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     competition_rank = excluded.competition_rank,
                     access_frequency = excluded.access_frequency,
                     retrieval_strength = excluded.retrieval_strength,
                     consolidated_strength = excluded.consolidated_strength,
                     age_category = excluded.age_category,
                     schematization_state = excluded.schematization_state,
                     updated_at = excluded.updated_at,
                     cluster_id = excluded.cluster_id",
                params![
                    node.id,
                    node.cluster_id,
                    node.competition_rank,
                    node.access_frequency,
                    node.retrieval_strength,
                    node.consolidated_strength,
                    node.semantic_category,
                    node.age_category.to_string(),
                    node.schematization_state.to_string(),
                    node.created_at.to_rfc3339(),
                    node.updated_at.to_rfc3339(),
                ],
            )?;
        }
    }
    Ok(())
}

fn parse_ts(raw: &str) -> EngramResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngramError::database(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_enum<T: FromStr>(raw: &str, what: &str) -> EngramResult<T> {
    T::from_str(raw).map_err(|_| EngramError::database(format!("bad {} value '{}'", what, raw)))
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<EngramResult<T>>>,
) -> EngramResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<EngramResult<MemoryItem>> {
    let id: String = row.get(0)?;
    let content_ref: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let sentiment: f64 = row.get(3)?;
    let importance: f64 = row.get(4)?;
    let stage: String = row.get(5)?;
    let strength: f64 = row.get(6)?;
    let coactivations: u32 = row.get(7)?;
    let metadata: Option<String> = row.get(8)?;
    Ok((|| -> EngramResult<MemoryItem> {
        Ok(MemoryItem {
            id,
            content_ref,
            created_at: parse_ts(&created_at)?,
            sentiment,
            importance,
            stage: parse_enum(&stage, "memory stage")?,
            strength,
            coactivations,
            metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
        })
    })())
}

fn row_to_episode(row: &rusqlite::Row<'_>) -> rusqlite::Result<EngramResult<Episode>> {
    let id: String = row.get(0)?;
    let category: String = row.get(1)?;
    let item_ids: String = row.get(2)?;
    let window_start: String = row.get(3)?;
    let window_end: String = row.get(4)?;
    let recency_factor: f64 = row.get(5)?;
    let emotional_salience: f64 = row.get(6)?;
    let strength: f64 = row.get(7)?;
    let hebbian_potential: u32 = row.get(8)?;
    let ready: i32 = row.get(9)?;
    let state: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok((|| -> EngramResult<Episode> {
        Ok(Episode {
            id,
            category,
            item_ids: serde_json::from_str(&item_ids)?,
            window_start: parse_ts(&window_start)?,
            window_end: parse_ts(&window_end)?,
            recency_factor,
            emotional_salience,
            strength,
            hebbian_potential,
            ready_for_consolidation: ready != 0,
            state: parse_enum(&state, "episode state")?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    })())
}

fn row_to_consolidated(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<EngramResult<ConsolidatedMemory>> {
    let id: String = row.get(0)?;
    let episode_id: String = row.get(1)?;
    let consolidated_strength: f64 = row.get(2)?;
    let semantic_category: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let consolidated_at: String = row.get(5)?;
    Ok((|| -> EngramResult<ConsolidatedMemory> {
        Ok(ConsolidatedMemory {
            id,
            episode_id,
            consolidated_strength,
            semantic_category,
            created_at: parse_ts(&created_at)?,
            consolidated_at: parse_ts(&consolidated_at)?,
        })
    })())
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<EngramResult<SemanticNode>> {
    let id: String = row.get(0)?;
    let cluster_id: u32 = row.get(1)?;
    let competition_rank: u32 = row.get(2)?;
    let access_frequency: u32 = row.get(3)?;
    let retrieval_strength: f64 = row.get(4)?;
    let consolidated_strength: f64 = row.get(5)?;
    let semantic_category: String = row.get(6)?;
    let age_category: String = row.get(7)?;
    let schematization_state: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok((|| -> EngramResult<SemanticNode> {
        Ok(SemanticNode {
            id,
            cluster_id,
            competition_rank,
            access_frequency,
            retrieval_strength,
            consolidated_strength,
            semantic_category,
            age_category: parse_enum::<AgeCategory>(&age_category, "age category")?,
            schematization_state: parse_enum::<SchematizationState>(
                &schematization_state,
                "schematization state",
            )?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    })())
}
