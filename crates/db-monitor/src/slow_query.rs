//! Slow-query capture: a bounded pending queue fed by the monitor and a
//! background writer that drains it to `slow_query_logs` in batched inserts.
//!
//! The queue never blocks the query path: overflow drops the oldest pending
//! event. A failed flush discards its batch and bumps an error counter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use market_core::timefmt::format_ts;
use serde::Serialize;
use sqlx::AnyPool;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
const PATTERN_TEMPLATE_LIMIT: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct SlowQueryEvent {
    pub query_hash: String,
    pub query_template: String,
    pub original_query: String,
    pub duration: f64,
    pub affected_rows: u64,
    pub table_names: Vec<String>,
    pub operation_type: String,
    pub execution_timestamp: DateTime<Utc>,
}

/// Bounded drop-oldest queue between the monitor (producers) and the single
/// background flusher.
pub struct SlowQueryQueue {
    pending: Mutex<VecDeque<SlowQueryEvent>>,
    capacity: usize,
    batch_size: usize,
    batch_full: Notify,
    dropped: AtomicU64,
}

impl SlowQueryQueue {
    pub fn new(capacity: usize, batch_size: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity,
            batch_size,
            batch_full: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, event: SlowQueryEvent) {
        let notify = {
            let mut pending = self.pending.lock().expect("queue mutex poisoned");
            pending.push_back(event);
            if pending.len() > self.capacity {
                pending.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            pending.len() >= self.batch_size
        };
        if notify {
            self.batch_full.notify_one();
        }
    }

    pub fn drain(&self, max: usize) -> Vec<SlowQueryEvent> {
        let mut pending = self.pending.lock().expect("queue mutex poisoned");
        let take = pending.len().min(max);
        pending.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Resolves when the pending queue reaches a full batch.
    pub async fn batch_ready(&self) {
        self.batch_full.notified().await;
    }
}

pub struct SlowQueryWriter {
    pool: AnyPool,
    queue: Arc<SlowQueryQueue>,
    flush_interval_secs: u64,
    flush_errors: AtomicU64,
    saved: AtomicU64,
}

impl SlowQueryWriter {
    pub fn new(pool: AnyPool, queue: Arc<SlowQueryQueue>, flush_interval_secs: u64) -> Self {
        Self {
            pool,
            queue,
            flush_interval_secs,
            flush_errors: AtomicU64::new(0),
            saved: AtomicU64::new(0),
        }
    }

    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS slow_query_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_hash TEXT NOT NULL,
                query_template TEXT NOT NULL,
                original_query TEXT NOT NULL,
                duration REAL NOT NULL,
                affected_rows INTEGER NOT NULL DEFAULT 0,
                table_names TEXT,
                operation_type TEXT,
                execution_timestamp TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_slow_query_hash_ts
             ON slow_query_logs (query_hash, execution_timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_slow_query_duration_ts
             ON slow_query_logs (duration, execution_timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drain one batch and persist it with a single multi-row insert.
    /// Returns the number of rows written; a failed insert discards the
    /// batch.
    pub async fn flush_once(&self) -> usize {
        let events = self.queue.drain(self.queue.batch_size());
        if events.is_empty() {
            return 0;
        }

        let mut sql = String::from(
            "INSERT INTO slow_query_logs \
             (query_hash, query_template, original_query, duration, affected_rows, \
              table_names, operation_type, execution_timestamp, created_at) VALUES ",
        );
        sql.push_str(
            &std::iter::repeat("(?, ?, ?, ?, ?, ?, ?, ?, ?)")
                .take(events.len())
                .collect::<Vec<_>>()
                .join(", "),
        );

        let now = format_ts(Utc::now());
        let mut query = sqlx::query(&sql);
        for event in &events {
            query = query
                .bind(&event.query_hash)
                .bind(&event.query_template)
                .bind(&event.original_query)
                .bind(event.duration)
                .bind(event.affected_rows as i64)
                .bind(serde_json::to_string(&event.table_names).unwrap_or_default())
                .bind(&event.operation_type)
                .bind(format_ts(event.execution_timestamp))
                .bind(&now);
        }

        match query.execute(&self.pool).await {
            Ok(_) => {
                let count = events.len();
                self.saved.fetch_add(count as u64, Ordering::Relaxed);
                tracing::info!(count, "slow query batch saved");
                count
            }
            Err(e) => {
                // Batch is lost by design; the caller's query path must not stall
                self.flush_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, count = events.len(), "slow query batch save failed");
                0
            }
        }
    }

    /// Periodic flush loop: every `flush_interval_secs`, when a batch fills,
    /// and once more on cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.flush_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush_once().await;
                    tracing::debug!("slow query writer drained and stopped");
                    break;
                }
                _ = self.queue.batch_ready() => {
                    self.flush_once().await;
                }
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
            }
        }
    }

    pub fn flush_error_count(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }

    pub fn saved_count(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }
}

// -------------------------------------------------------------------
// Persisted-log analytics
// -------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SlowQueryRow {
    pub id: i64,
    pub query_hash: String,
    pub query_template: String,
    pub original_query: String,
    pub duration: f64,
    pub affected_rows: i64,
    pub table_names: Option<String>,
    pub operation_type: Option<String>,
    pub execution_timestamp: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct SlowQueryFilter {
    pub min_duration: Option<f64>,
    pub operation_type: Option<String>,
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub operation_type: String,
    pub count: i64,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SlowQueryStatistics {
    pub total_count: i64,
    pub avg_duration: f64,
    pub max_duration: f64,
    pub min_duration: f64,
    pub by_operation: Vec<OperationStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryPatternEntry {
    pub query_hash: String,
    pub query_template: String,
    pub occurrence_count: i64,
    pub avg_duration: f64,
    pub max_duration: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct QueryPatternAnalysis {
    pub most_frequent_patterns: Vec<QueryPatternEntry>,
    pub slowest_patterns: Vec<QueryPatternEntry>,
}

/// Read-side access to the persisted slow-query log.
pub struct SlowQueryStore {
    pool: AnyPool,
}

impl SlowQueryStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn recent(
        &self,
        hours: i64,
        limit: i64,
        filter: &SlowQueryFilter,
    ) -> Result<Vec<SlowQueryRow>, sqlx::Error> {
        let cutoff = format_ts(Utc::now() - Duration::hours(hours));

        let mut sql = String::from(
            "SELECT id, query_hash, query_template, original_query, duration, \
             affected_rows, table_names, operation_type, execution_timestamp, created_at \
             FROM slow_query_logs WHERE execution_timestamp >= ?",
        );
        if filter.min_duration.is_some() {
            sql.push_str(" AND duration >= ?");
        }
        if filter.operation_type.is_some() {
            sql.push_str(" AND operation_type = ?");
        }
        if filter.table_name.is_some() {
            sql.push_str(" AND table_names LIKE ?");
        }
        sql.push_str(" ORDER BY duration DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, SlowQueryRow>(&sql).bind(cutoff);
        if let Some(min) = filter.min_duration {
            query = query.bind(min);
        }
        if let Some(op) = &filter.operation_type {
            query = query.bind(op.to_lowercase());
        }
        if let Some(table) = &filter.table_name {
            query = query.bind(format!("%{}%", table));
        }
        query.bind(limit).fetch_all(&self.pool).await
    }

    pub async fn statistics(&self, hours: i64) -> Result<SlowQueryStatistics, sqlx::Error> {
        let cutoff = format_ts(Utc::now() - Duration::hours(hours));

        let totals: (i64, Option<f64>, Option<f64>, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*), AVG(duration), MAX(duration), MIN(duration)
             FROM slow_query_logs WHERE execution_timestamp >= ?",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        let by_operation: Vec<(String, i64, f64)> = sqlx::query_as(
            "SELECT COALESCE(operation_type, 'other'), COUNT(*), AVG(duration)
             FROM slow_query_logs WHERE execution_timestamp >= ?
             GROUP BY operation_type ORDER BY COUNT(*) DESC",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(SlowQueryStatistics {
            total_count: totals.0,
            avg_duration: totals.1.unwrap_or(0.0),
            max_duration: totals.2.unwrap_or(0.0),
            min_duration: totals.3.unwrap_or(0.0),
            by_operation: by_operation
                .into_iter()
                .map(|(operation_type, count, avg_duration)| OperationStats {
                    operation_type,
                    count,
                    avg_duration,
                })
                .collect(),
        })
    }

    pub async fn pattern_analysis(&self, hours: i64) -> Result<QueryPatternAnalysis, sqlx::Error> {
        let cutoff = format_ts(Utc::now() - Duration::hours(hours));
        Ok(QueryPatternAnalysis {
            most_frequent_patterns: self.fetch_patterns(&cutoff, "occurrence_count").await?,
            slowest_patterns: self.fetch_patterns(&cutoff, "avg_duration").await?,
        })
    }

    async fn fetch_patterns(
        &self,
        cutoff: &str,
        order: &str,
    ) -> Result<Vec<QueryPatternEntry>, sqlx::Error> {
        let sql = format!(
            "SELECT query_hash, query_template, COUNT(*) AS occurrence_count, \
             AVG(duration) AS avg_duration, MAX(duration) AS max_duration \
             FROM slow_query_logs WHERE execution_timestamp >= ? \
             GROUP BY query_hash, query_template ORDER BY {} DESC LIMIT 20",
            order
        );
        let rows: Vec<(String, String, i64, f64, f64)> = sqlx::query_as(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(
                |(query_hash, template, occurrence_count, avg_duration, max_duration)| {
                    QueryPatternEntry {
                        query_hash,
                        query_template: template.chars().take(PATTERN_TEMPLATE_LIMIT).collect(),
                        occurrence_count,
                        avg_duration,
                        max_duration,
                    }
                },
            )
            .collect())
    }

    /// Delete log rows older than `days`. Returns the number deleted.
    pub async fn cleanup_old_logs(&self, days: i64) -> Result<u64, sqlx::Error> {
        let cutoff = format_ts(Utc::now() - Duration::days(days));
        let result = sqlx::query("DELETE FROM slow_query_logs WHERE execution_timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, days, "old slow query logs cleaned");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(hash: &str, duration: f64) -> SlowQueryEvent {
        SlowQueryEvent {
            query_hash: hash.to_string(),
            query_template: "SELECT * FROM T WHERE ID = ?".to_string(),
            original_query: format!("SELECT * FROM t WHERE id = {}", duration),
            duration,
            affected_rows: 1,
            table_names: vec!["t".to_string()],
            operation_type: "select".to_string(),
            execution_timestamp: Utc::now(),
        }
    }

    async fn test_pool() -> AnyPool {
        sqlx::any::install_default_drivers();
        sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite")
    }

    #[test]
    fn test_queue_drops_oldest_on_overflow() {
        let queue = SlowQueryQueue::new(3, 100);
        for i in 0..5 {
            queue.push(event(&format!("h{}", i), i as f64));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);
        let events = queue.drain(10);
        assert_eq!(events[0].query_hash, "h2");
        assert_eq!(events[2].query_hash, "h4");
    }

    #[test]
    fn test_queue_drain_respects_batch_limit() {
        let queue = SlowQueryQueue::new(100, 10);
        for i in 0..7 {
            queue.push(event(&format!("h{}", i), 1.5));
        }
        assert_eq!(queue.drain(5).len(), 5);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_persists_batch() {
        let pool = test_pool().await;
        let queue = Arc::new(SlowQueryQueue::new(1000, 100));
        let writer = SlowQueryWriter::new(pool.clone(), queue.clone(), 30);
        writer.init_schema().await.unwrap();

        queue.push(event("abc123def456", 2.3));
        queue.push(event("abc123def456", 1.4));
        let written = writer.flush_once().await;
        assert_eq!(written, 2);
        assert_eq!(writer.saved_count(), 2);
        assert!(queue.is_empty());

        let store = SlowQueryStore::new(pool);
        let rows = store.recent(1, 10, &SlowQueryFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 2);
        // Ordered by duration descending
        assert!((rows[0].duration - 2.3).abs() < 1e-9);
        assert_eq!(rows[0].query_hash, "abc123def456");
    }

    #[tokio::test]
    async fn test_flush_failure_discards_batch() {
        let pool = test_pool().await;
        let queue = Arc::new(SlowQueryQueue::new(1000, 100));
        let writer = SlowQueryWriter::new(pool, queue.clone(), 30);
        // Schema intentionally missing: the insert fails

        queue.push(event("deadbeef0000", 3.0));
        let written = writer.flush_once().await;
        assert_eq!(written, 0);
        assert_eq!(writer.flush_error_count(), 1);
        // Batch discarded, not re-queued
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_statistics_and_patterns() {
        let pool = test_pool().await;
        let queue = Arc::new(SlowQueryQueue::new(1000, 100));
        let writer = SlowQueryWriter::new(pool.clone(), queue.clone(), 30);
        writer.init_schema().await.unwrap();

        queue.push(event("hash_a", 1.5));
        queue.push(event("hash_a", 2.5));
        let mut update = event("hash_b", 4.0);
        update.operation_type = "update".to_string();
        update.query_template = "UPDATE T SET A = ?".to_string();
        queue.push(update);
        writer.flush_once().await;

        let store = SlowQueryStore::new(pool);
        let stats = store.statistics(24).await.unwrap();
        assert_eq!(stats.total_count, 3);
        assert!((stats.max_duration - 4.0).abs() < 1e-9);
        assert!((stats.min_duration - 1.5).abs() < 1e-9);
        assert_eq!(stats.by_operation.len(), 2);

        let patterns = store.pattern_analysis(24).await.unwrap();
        assert_eq!(patterns.most_frequent_patterns[0].query_hash, "hash_a");
        assert_eq!(patterns.most_frequent_patterns[0].occurrence_count, 2);
        assert_eq!(patterns.slowest_patterns[0].query_hash, "hash_b");
    }

    #[tokio::test]
    async fn test_cleanup_old_logs() {
        let pool = test_pool().await;
        let queue = Arc::new(SlowQueryQueue::new(1000, 100));
        let writer = SlowQueryWriter::new(pool.clone(), queue.clone(), 30);
        writer.init_schema().await.unwrap();

        let mut old = event("old_hash", 2.0);
        old.execution_timestamp = Utc::now() - Duration::days(60);
        queue.push(old);
        queue.push(event("new_hash", 2.0));
        writer.flush_once().await;

        let store = SlowQueryStore::new(pool);
        assert_eq!(store.cleanup_old_logs(30).await.unwrap(), 1);
        let rows = store
            .recent(24 * 90, 10, &SlowQueryFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].query_hash, "new_hash");
    }
}
