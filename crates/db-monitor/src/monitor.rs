//! Query-timing interception and in-memory per-template metrics.
//!
//! All stores route their statements through `QueryMonitor::begin` /
//! `QueryTimer::finish`, the single site where timing, normalisation and
//! slow-query capture are co-located. A timer dropped without `finish`
//! (statement errored) records nothing, so a query never contributes twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alert_dispatcher::{Alert, AlertDispatcher, AlertLevel};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::normalize::{extract_operation, extract_table_names, normalize_query, query_hash};
use crate::slow_query::{SlowQueryEvent, SlowQueryQueue};

pub const CRITICAL_QUERY_SECONDS: f64 = 5.0;
pub const WARNING_QUERY_SECONDS: f64 = 2.0;
const ORIGINAL_QUERY_LIMIT: usize = 2000;
const TEMPLATE_PREVIEW_LIMIT: usize = 100;
const TOP_QUERIES: usize = 5;

/// Per-template metrics, keyed by query hash. Lost on restart.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetric {
    pub query_hash: String,
    pub query_template: String,
    pub execution_count: u64,
    pub total_duration: f64,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub last_execution: DateTime<Utc>,
    pub slow_query_count: u64,
    pub affected_rows: u64,
    pub table_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConnectionCounters {
    pub connects: u64,
    pub disconnects: u64,
    pub checkouts: u64,
    pub checkins: u64,
    pub failed_connections: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuerySummaryEntry {
    pub query_hash: String,
    pub query_template: String,
    pub execution_count: u64,
    pub avg_duration: f64,
    pub max_duration: f64,
    pub total_duration: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total_queries: u64,
    pub unique_query_patterns: usize,
    pub slow_queries: u64,
    pub slow_query_rate: f64,
    pub avg_query_time: f64,
    pub counters: ConnectionCounters,
    pub slowest_queries: Vec<QuerySummaryEntry>,
    pub most_frequent_queries: Vec<QuerySummaryEntry>,
}

pub struct QueryMonitor {
    slow_query_threshold: f64,
    metrics: Mutex<HashMap<String, QueryMetric>>,
    counters: Mutex<ConnectionCounters>,
    slow_queue: Arc<SlowQueryQueue>,
    alerts: Option<Arc<AlertDispatcher>>,
}

/// Timing guard handed out by `QueryMonitor::begin`.
pub struct QueryTimer<'a> {
    monitor: &'a QueryMonitor,
    sql: String,
    start: Instant,
}

impl QueryTimer<'_> {
    /// Close the observation. Consumes the timer; an errored statement
    /// drops the timer instead and leaves the metrics untouched.
    pub fn finish(self, affected_rows: u64) {
        self.monitor
            .record_execution(&self.sql, self.start.elapsed(), affected_rows);
    }
}

impl QueryMonitor {
    pub fn new(slow_query_threshold: f64, slow_queue: Arc<SlowQueryQueue>) -> Self {
        Self {
            slow_query_threshold,
            metrics: Mutex::new(HashMap::new()),
            counters: Mutex::new(ConnectionCounters::default()),
            slow_queue,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<AlertDispatcher>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn slow_query_threshold(&self) -> f64 {
        self.slow_query_threshold
    }

    pub fn begin(&self, sql: &str) -> QueryTimer<'_> {
        QueryTimer {
            monitor: self,
            sql: sql.to_string(),
            start: Instant::now(),
        }
    }

    /// Record one completed statement execution.
    pub fn record_execution(&self, sql: &str, duration: Duration, affected_rows: u64) {
        let seconds = duration.as_secs_f64();
        let hash = query_hash(sql);
        let template = normalize_query(sql);
        let tables = extract_table_names(sql);
        let is_slow = seconds > self.slow_query_threshold;

        {
            let mut metrics = self.metrics.lock().expect("metrics mutex poisoned");
            match metrics.get_mut(&hash) {
                Some(metric) => {
                    metric.execution_count += 1;
                    metric.total_duration += seconds;
                    metric.avg_duration = metric.total_duration / metric.execution_count as f64;
                    metric.min_duration = metric.min_duration.min(seconds);
                    metric.max_duration = metric.max_duration.max(seconds);
                    metric.last_execution = Utc::now();
                    metric.affected_rows += affected_rows;
                    if is_slow {
                        metric.slow_query_count += 1;
                    }
                }
                None => {
                    metrics.insert(
                        hash.clone(),
                        QueryMetric {
                            query_hash: hash.clone(),
                            query_template: template.clone(),
                            execution_count: 1,
                            total_duration: seconds,
                            avg_duration: seconds,
                            min_duration: seconds,
                            max_duration: seconds,
                            last_execution: Utc::now(),
                            slow_query_count: if is_slow { 1 } else { 0 },
                            affected_rows,
                            table_names: tables.clone(),
                        },
                    );
                }
            }
        }

        if is_slow {
            self.capture_slow_query(sql, &hash, &template, tables, seconds, affected_rows);
        }
    }

    fn capture_slow_query(
        &self,
        sql: &str,
        hash: &str,
        template: &str,
        table_names: Vec<String>,
        seconds: f64,
        affected_rows: u64,
    ) {
        let original: String = sql.chars().take(ORIGINAL_QUERY_LIMIT).collect();

        self.slow_queue.push(SlowQueryEvent {
            query_hash: hash.to_string(),
            query_template: template.to_string(),
            original_query: original,
            duration: seconds,
            affected_rows,
            table_names,
            operation_type: extract_operation(sql).to_string(),
            execution_timestamp: Utc::now(),
        });

        tracing::warn!(
            query_hash = hash,
            duration = seconds,
            affected_rows,
            "slow query detected"
        );

        // Severity alerts must never block the query path
        if let Some(alerts) = &self.alerts {
            let details = json!({
                "query_hash": hash,
                "duration": seconds,
                "affected_rows": affected_rows,
            });
            let alert = if seconds > CRITICAL_QUERY_SECONDS {
                Some(
                    Alert::new(
                        AlertLevel::Critical,
                        "Critical Slow Query Detected",
                        format!("Query took {:.2} seconds to execute", seconds),
                        "database",
                    )
                    .with_details(details),
                )
            } else if seconds > WARNING_QUERY_SECONDS {
                Some(
                    Alert::new(
                        AlertLevel::Warning,
                        "Slow Query Detected",
                        format!("Query took {:.2} seconds to execute", seconds),
                        "database",
                    )
                    .with_details(details),
                )
            } else {
                None
            };
            if let Some(alert) = alert {
                alerts.dispatch_detached(alert);
            }
        }
    }

    // ---------------------------------------------------------------
    // Connection lifecycle counters
    // ---------------------------------------------------------------

    pub fn record_connect(&self) {
        self.counters.lock().expect("counters mutex poisoned").connects += 1;
    }

    pub fn record_disconnect(&self) {
        self.counters.lock().expect("counters mutex poisoned").disconnects += 1;
    }

    pub fn record_checkout(&self) {
        self.counters.lock().expect("counters mutex poisoned").checkouts += 1;
    }

    pub fn record_checkin(&self) {
        self.counters.lock().expect("counters mutex poisoned").checkins += 1;
    }

    pub fn record_failed_connection(&self) {
        self.counters
            .lock()
            .expect("counters mutex poisoned")
            .failed_connections += 1;
    }

    pub fn counters(&self) -> ConnectionCounters {
        *self.counters.lock().expect("counters mutex poisoned")
    }

    // ---------------------------------------------------------------
    // Reporting
    // ---------------------------------------------------------------

    pub fn metric(&self, hash: &str) -> Option<QueryMetric> {
        self.metrics
            .lock()
            .expect("metrics mutex poisoned")
            .get(hash)
            .cloned()
    }

    pub fn metric_for_query(&self, sql: &str) -> Option<QueryMetric> {
        self.metric(&query_hash(sql))
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        let metrics = self.metrics.lock().expect("metrics mutex poisoned");

        let total_queries: u64 = metrics.values().map(|m| m.execution_count).sum();
        let slow_queries: u64 = metrics.values().map(|m| m.slow_query_count).sum();
        let avg_query_time = if total_queries > 0 {
            metrics.values().map(|m| m.total_duration).sum::<f64>() / total_queries as f64
        } else {
            0.0
        };

        let entry = |m: &QueryMetric| {
            let template: String = m.query_template.chars().take(TEMPLATE_PREVIEW_LIMIT).collect();
            QuerySummaryEntry {
                query_hash: m.query_hash.clone(),
                query_template: template,
                execution_count: m.execution_count,
                avg_duration: m.avg_duration,
                max_duration: m.max_duration,
                total_duration: m.total_duration,
            }
        };

        let mut slowest: Vec<&QueryMetric> = metrics.values().collect();
        slowest.sort_by(|a, b| b.max_duration.total_cmp(&a.max_duration));
        let slowest_queries = slowest.iter().take(TOP_QUERIES).map(|m| entry(m)).collect();

        let mut frequent: Vec<&QueryMetric> = metrics.values().collect();
        frequent.sort_by(|a, b| b.execution_count.cmp(&a.execution_count));
        let most_frequent_queries = frequent.iter().take(TOP_QUERIES).map(|m| entry(m)).collect();

        PerformanceSummary {
            total_queries,
            unique_query_patterns: metrics.len(),
            slow_queries,
            slow_query_rate: if total_queries > 0 {
                slow_queries as f64 / total_queries as f64 * 100.0
            } else {
                0.0
            },
            avg_query_time,
            counters: self.counters(),
            slowest_queries,
            most_frequent_queries,
        }
    }

    pub fn reset_metrics(&self) {
        self.metrics.lock().expect("metrics mutex poisoned").clear();
        tracing::info!("query metrics reset");
    }
}
