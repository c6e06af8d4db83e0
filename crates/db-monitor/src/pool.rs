//! Connection-pool observation and adaptive sizing.
//!
//! sqlx pools are fixed-capacity, so "resizing" maintains a managed logical
//! size: the manager records the requested size, logs it, and alerts, the
//! same way the source system journals resize requests. Checkout latency is
//! observed by timing `acquire()` through the manager.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use alert_dispatcher::{Alert, AlertDispatcher, AlertLevel};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool};

use crate::monitor::QueryMonitor;

const CHECKOUT_SAMPLES: usize = 100;
const SNAPSHOT_RETENTION_HOURS: i64 = 24;
const UTILIZATION_CRITICAL: f64 = 0.95;
const CHECKOUT_WARNING_SECONDS: f64 = 30.0;
const FAILED_CONNECTIONS_WARNING: u64 = 10;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: u32,
    pub max_size: u32,
    pub max_overflow: u32,
    pub timeout_seconds: u64,
    pub recycle_seconds: u64,
    pub adjustment_interval_seconds: i64,
    pub utilization_threshold_high: f64,
    pub utilization_threshold_low: f64,
    pub adjustment_step: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 20,
            max_overflow: 30,
            timeout_seconds: 300,
            recycle_seconds: 600,
            adjustment_interval_seconds: 300,
            utilization_threshold_high: 0.8,
            utilization_threshold_low: 0.3,
            adjustment_step: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub pool_size: u32,
    pub checked_out: u32,
    pub overflow: u32,
    pub utilization: f64,
    pub avg_checkout_time: f64,
    pub max_checkout_time: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PoolHealth {
    Healthy,
    Warning,
    Critical,
}

impl PoolHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolHealth::Healthy => "HEALTHY",
            PoolHealth::Warning => "WARNING",
            PoolHealth::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentOutcome {
    NoChange,
    /// A resize was warranted but the adjustment interval has not elapsed.
    RateGated,
    Expanded {
        from: u32,
        to: u32,
    },
    Shrunk {
        from: u32,
        to: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatistics {
    pub avg_utilization_1h: f64,
    pub connects: u64,
    pub disconnects: u64,
    pub checkouts: u64,
    pub checkins: u64,
    pub failed_connections: u64,
}

#[derive(Debug, Serialize)]
pub struct PoolStatus {
    pub current: PoolSnapshot,
    pub statistics: PoolStatistics,
    pub health_status: &'static str,
    pub recommendations: Vec<String>,
}

/// Pool connection wrapper that records the checkin on drop.
pub struct TimedConnection {
    conn: PoolConnection<Any>,
    monitor: Arc<QueryMonitor>,
}

impl Deref for TimedConnection {
    type Target = PoolConnection<Any>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for TimedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for TimedConnection {
    fn drop(&mut self) {
        self.monitor.record_checkin();
    }
}

pub struct PoolManager {
    pool: AnyPool,
    config: PoolConfig,
    monitor: Arc<QueryMonitor>,
    alerts: Arc<AlertDispatcher>,
    logical_size: AtomicU32,
    last_adjustment: Mutex<Option<DateTime<Utc>>>,
    checkout_times: Mutex<VecDeque<f64>>,
    history: Mutex<VecDeque<PoolSnapshot>>,
}

impl PoolManager {
    pub fn new(
        pool: AnyPool,
        config: PoolConfig,
        monitor: Arc<QueryMonitor>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        let initial = config.min_size;
        Self {
            pool,
            config,
            monitor,
            alerts,
            logical_size: AtomicU32::new(initial),
            last_adjustment: Mutex::new(None),
            checkout_times: Mutex::new(VecDeque::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn desired_size(&self) -> u32 {
        self.logical_size.load(Ordering::Relaxed)
    }

    pub fn last_adjustment(&self) -> Option<DateTime<Utc>> {
        *self.last_adjustment.lock().expect("adjustment mutex poisoned")
    }

    /// Check out a connection, timing the acquisition. A failed checkout
    /// counts as a failed connection and raises a critical alert.
    pub async fn acquire(self: &Arc<Self>) -> Result<TimedConnection, sqlx::Error> {
        let start = Instant::now();
        match self.pool.acquire().await {
            Ok(conn) => {
                let waited = start.elapsed().as_secs_f64();
                self.monitor.record_checkout();
                let mut times = self.checkout_times.lock().expect("checkout mutex poisoned");
                times.push_back(waited);
                while times.len() > CHECKOUT_SAMPLES {
                    times.pop_front();
                }
                Ok(TimedConnection {
                    conn,
                    monitor: Arc::clone(&self.monitor),
                })
            }
            Err(e) => {
                self.monitor.record_failed_connection();
                self.alerts.dispatch_detached(
                    Alert::new(
                        AlertLevel::Critical,
                        "Database Connection Checkout Failed",
                        format!("Connection checkout failed: {}", e),
                        "database",
                    )
                    .with_details(json!({"error": e.to_string()})),
                );
                Err(e)
            }
        }
    }

    /// Current pool snapshot, appended to the 24-hour history ring.
    pub fn sample(&self) -> PoolSnapshot {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        let checked_out = size.saturating_sub(idle);

        let pool_size = self.desired_size();
        let overflow = checked_out.saturating_sub(pool_size);
        let capacity = pool_size + overflow;
        let utilization = if capacity > 0 {
            checked_out as f64 / capacity as f64
        } else {
            0.0
        };

        let (avg_checkout, max_checkout) = {
            let times = self.checkout_times.lock().expect("checkout mutex poisoned");
            if times.is_empty() {
                (0.0, 0.0)
            } else {
                (
                    times.iter().sum::<f64>() / times.len() as f64,
                    times.iter().cloned().fold(0.0, f64::max),
                )
            }
        };

        let snapshot = PoolSnapshot {
            pool_size,
            checked_out,
            overflow,
            utilization,
            avg_checkout_time: avg_checkout,
            max_checkout_time: max_checkout,
            timestamp: Utc::now(),
        };

        let mut history = self.history.lock().expect("history mutex poisoned");
        history.push_back(snapshot.clone());
        let cutoff = Utc::now() - Duration::hours(SNAPSHOT_RETENTION_HOURS);
        while history.front().is_some_and(|s| s.timestamp < cutoff) {
            history.pop_front();
        }

        snapshot
    }

    /// One adaptive-sizing cycle over a fresh snapshot. A timed probe
    /// checkout keeps latency observable even across idle intervals.
    pub async fn check_cycle(self: &Arc<Self>) -> AdjustmentOutcome {
        match self.acquire().await {
            Ok(conn) => drop(conn),
            Err(e) => tracing::warn!(error = %e, "pool probe checkout failed"),
        }
        let snapshot = self.sample();
        self.apply_policy(&snapshot, Utc::now()).await
    }

    /// Apply the sizing policy to a snapshot. Resizes are rate-gated to one
    /// per adjustment interval; saturation and checkout-latency alerts fire
    /// regardless of the gate.
    pub async fn apply_policy(
        &self,
        snapshot: &PoolSnapshot,
        now: DateTime<Utc>,
    ) -> AdjustmentOutcome {
        let gate_open = self
            .last_adjustment()
            .map(|t| now - t >= Duration::seconds(self.config.adjustment_interval_seconds))
            .unwrap_or(true);

        let size = self.desired_size();
        let mut outcome = AdjustmentOutcome::NoChange;

        if snapshot.utilization > self.config.utilization_threshold_high
            && size < self.config.max_size
        {
            if gate_open {
                let to = (size + self.config.adjustment_step).min(self.config.max_size);
                self.resize(size, to, now);
                outcome = AdjustmentOutcome::Expanded { from: size, to };

                self.alerts
                    .dispatch(
                        Alert::new(
                            AlertLevel::Warning,
                            "Database Connection Pool Expanded",
                            format!(
                                "Pool size increased to {} due to high utilization",
                                to
                            ),
                            "database",
                        )
                        .with_details(json!({
                            "old_size": size,
                            "new_size": to,
                            "utilization": snapshot.utilization,
                        })),
                    )
                    .await;
            } else {
                outcome = AdjustmentOutcome::RateGated;
            }
        } else if snapshot.utilization < self.config.utilization_threshold_low
            && size > self.config.min_size
        {
            if gate_open {
                let to = size
                    .saturating_sub(self.config.adjustment_step)
                    .max(self.config.min_size);
                self.resize(size, to, now);
                outcome = AdjustmentOutcome::Shrunk { from: size, to };
            } else {
                outcome = AdjustmentOutcome::RateGated;
            }
        }

        if snapshot.utilization > UTILIZATION_CRITICAL {
            self.alerts
                .dispatch(
                    Alert::new(
                        AlertLevel::Critical,
                        "Database Connection Pool Nearly Exhausted",
                        format!("Pool utilization at {:.1}%", snapshot.utilization * 100.0),
                        "database",
                    )
                    .with_details(json!({
                        "pool_size": snapshot.pool_size,
                        "checked_out": snapshot.checked_out,
                        "overflow": snapshot.overflow,
                    })),
                )
                .await;
        }

        if snapshot.avg_checkout_time > CHECKOUT_WARNING_SECONDS {
            self.alerts
                .dispatch(
                    Alert::new(
                        AlertLevel::Warning,
                        "Long Database Connection Checkout Time",
                        format!("Average checkout time: {:.2}s", snapshot.avg_checkout_time),
                        "database",
                    )
                    .with_details(json!({
                        "avg_checkout_time": snapshot.avg_checkout_time,
                        "max_checkout_time": snapshot.max_checkout_time,
                    })),
                )
                .await;
        }

        outcome
    }

    fn resize(&self, from: u32, to: u32, now: DateTime<Utc>) {
        self.logical_size.store(to, Ordering::Relaxed);
        *self.last_adjustment.lock().expect("adjustment mutex poisoned") = Some(now);
        tracing::info!(from, to, "connection pool resize requested");
    }

    pub fn assess_health(&self, snapshot: &PoolSnapshot) -> PoolHealth {
        let failed = self.monitor.counters().failed_connections;
        if snapshot.utilization > UTILIZATION_CRITICAL {
            PoolHealth::Critical
        } else if snapshot.utilization > self.config.utilization_threshold_high
            || snapshot.avg_checkout_time > CHECKOUT_WARNING_SECONDS
            || failed > FAILED_CONNECTIONS_WARNING
        {
            PoolHealth::Warning
        } else {
            PoolHealth::Healthy
        }
    }

    pub fn pool_status(&self) -> PoolStatus {
        let current = self.sample();
        let counters = self.monitor.counters();

        let avg_utilization_1h = {
            let history = self.history.lock().expect("history mutex poisoned");
            let cutoff = Utc::now() - Duration::hours(1);
            let recent: Vec<f64> = history
                .iter()
                .filter(|s| s.timestamp >= cutoff)
                .map(|s| s.utilization)
                .collect();
            if recent.is_empty() {
                0.0
            } else {
                recent.iter().sum::<f64>() / recent.len() as f64
            }
        };

        let health = self.assess_health(&current);
        let recommendations = self.recommendations(&current, avg_utilization_1h, &counters);

        PoolStatus {
            statistics: PoolStatistics {
                avg_utilization_1h,
                connects: counters.connects,
                disconnects: counters.disconnects,
                checkouts: counters.checkouts,
                checkins: counters.checkins,
                failed_connections: counters.failed_connections,
            },
            health_status: health.as_str(),
            recommendations,
            current,
        }
    }

    fn recommendations(
        &self,
        snapshot: &PoolSnapshot,
        avg_utilization: f64,
        counters: &crate::monitor::ConnectionCounters,
    ) -> Vec<String> {
        let mut out = Vec::new();
        if snapshot.utilization > 0.9 {
            out.push("Consider increasing max_size or max_overflow".to_string());
        }
        if avg_utilization > 0.0 && avg_utilization < 0.2 {
            out.push("Pool may be oversized, consider reducing min_size".to_string());
        }
        if snapshot.avg_checkout_time > 10.0 {
            out.push("Long checkout times detected, review connection usage patterns".to_string());
        }
        if counters.failed_connections > 5 {
            out.push("High connection failure rate, check database connectivity".to_string());
        }
        if snapshot.overflow > snapshot.pool_size {
            out.push("High overflow usage, consider increasing base pool size".to_string());
        }
        if out.is_empty() {
            out.push("Connection pool is operating within limits".to_string());
        }
        out
    }

    pub fn history_snapshot(&self, hours: i64) -> Vec<PoolSnapshot> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.history
            .lock()
            .expect("history mutex poisoned")
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .cloned()
            .collect()
    }
}
