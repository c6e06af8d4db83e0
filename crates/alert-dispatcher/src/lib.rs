//! Multi-channel alert dispatch with severity routing and per-key rate
//! limiting.
//!
//! Fan-out is parallel and channel failures are isolated: one channel's
//! error never suppresses another's send. Rate limiting uses a sliding
//! 60-minute window per `(component, title)` key, so no key ever delivers
//! more than the configured number of alerts in any rolling hour.

pub mod channels;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

pub use channels::{
    AlertChannel, EmailChannel, SlackChannel, TelegramChannel, WebhookChannel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "ℹ️",
            AlertLevel::Warning => "⚠️",
            AlertLevel::Error => "❌",
            AlertLevel::Critical => "🚨",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Telegram,
    Slack,
    Email,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Slack => "slack",
            ChannelKind::Email => "email",
            ChannelKind::Webhook => "webhook",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub level: AlertLevel,
    pub component: String,
    pub timestamp: DateTime<Utc>,
    pub details: Option<serde_json::Value>,
}

impl Alert {
    pub fn new(
        level: AlertLevel,
        title: impl Into<String>,
        message: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level,
            component: component.into(),
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn rate_key(&self) -> String {
        format!("{}:{}", self.component, self.title)
    }
}

/// Channel kinds each severity fans out to.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub info: Vec<ChannelKind>,
    pub warning: Vec<ChannelKind>,
    pub error: Vec<ChannelKind>,
    pub critical: Vec<ChannelKind>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            info: vec![ChannelKind::Telegram],
            warning: vec![ChannelKind::Telegram],
            error: vec![ChannelKind::Telegram],
            critical: vec![ChannelKind::Telegram, ChannelKind::Slack],
        }
    }
}

impl RoutingConfig {
    fn for_level(&self, level: AlertLevel) -> &[ChannelKind] {
        match level {
            AlertLevel::Info => &self.info,
            AlertLevel::Warning => &self.warning,
            AlertLevel::Error => &self.error,
            AlertLevel::Critical => &self.critical,
        }
    }
}

/// Sliding-window limiter: at most `max_per_window` acquisitions per key in
/// any `window`. Bookkeeping for one key is serialised by the mutex.
struct SlidingWindowLimiter {
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    max_per_window: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_per_window,
            window,
        }
    }

    fn try_acquire(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock().expect("limiter mutex poisoned");
        let timestamps = windows.entry(key.to_string()).or_default();
        while let Some(&front) = timestamps.front() {
            if now - front >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() >= self.max_per_window {
            return false;
        }
        timestamps.push_back(now);
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub rate_limited: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStats {
    pub sends: u64,
    pub errors: u64,
    pub total_send_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub total_alerts: usize,
    pub by_level: HashMap<String, usize>,
    pub by_component: HashMap<String, usize>,
}

const HISTORY_RETENTION_HOURS: i64 = 72;
const HISTORY_MAX_ENTRIES: usize = 2000;

pub struct AlertDispatcher {
    channels: Vec<Arc<dyn AlertChannel>>,
    routing: RoutingConfig,
    limiter: SlidingWindowLimiter,
    history: Mutex<Vec<Alert>>,
    channel_stats: DashMap<String, ChannelStats>,
}

impl AlertDispatcher {
    pub fn new(
        channels: Vec<Arc<dyn AlertChannel>>,
        routing: RoutingConfig,
        rate_limit_per_hour: usize,
    ) -> Self {
        Self {
            channels,
            routing,
            limiter: SlidingWindowLimiter::new(rate_limit_per_hour, Duration::hours(1)),
            history: Mutex::new(Vec::new()),
            channel_stats: DashMap::new(),
        }
    }

    /// Dispatcher with no channels; alerts only reach the in-memory history.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), RoutingConfig::default(), 5)
    }

    pub async fn dispatch(&self, alert: Alert) -> DispatchReport {
        self.dispatch_at(alert, Utc::now()).await
    }

    async fn dispatch_at(&self, alert: Alert, now: DateTime<Utc>) -> DispatchReport {
        if !self.limiter.try_acquire(&alert.rate_key(), now) {
            tracing::debug!(
                title = %alert.title,
                component = %alert.component,
                "alert rate limited"
            );
            return DispatchReport {
                rate_limited: true,
                ..Default::default()
            };
        }

        let kinds = self.routing.for_level(alert.level);
        let targets: Vec<&Arc<dyn AlertChannel>> = self
            .channels
            .iter()
            .filter(|c| kinds.contains(&c.kind()))
            .collect();

        let results = join_all(targets.iter().map(|channel| channel.send(&alert))).await;

        let mut report = DispatchReport::default();
        for (channel, result) in targets.iter().zip(results) {
            let mut stats = self.channel_stats.entry(channel.name().to_string()).or_default();
            match result {
                Ok(duration) => {
                    stats.sends += 1;
                    stats.total_send_seconds += duration.as_secs_f64();
                    report.delivered += 1;
                    tracing::debug!(channel = channel.name(), title = %alert.title, "alert sent");
                }
                Err(e) => {
                    stats.errors += 1;
                    report.failed += 1;
                    tracing::warn!(
                        channel = channel.name(),
                        title = %alert.title,
                        error = %e,
                        "alert channel failed"
                    );
                }
            }
        }

        self.push_history(alert, now);
        report
    }

    /// Fire-and-forget dispatch for callers that must not block (the query
    /// monitor's severity alerts).
    pub fn dispatch_detached(self: &Arc<Self>, alert: Alert) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.dispatch(alert).await;
        });
    }

    pub async fn info(&self, title: &str, message: &str, component: &str) -> DispatchReport {
        self.dispatch(Alert::new(AlertLevel::Info, title, message, component))
            .await
    }

    pub async fn warning(&self, title: &str, message: &str, component: &str) -> DispatchReport {
        self.dispatch(Alert::new(AlertLevel::Warning, title, message, component))
            .await
    }

    pub async fn error(&self, title: &str, message: &str, component: &str) -> DispatchReport {
        self.dispatch(Alert::new(AlertLevel::Error, title, message, component))
            .await
    }

    pub async fn critical(&self, title: &str, message: &str, component: &str) -> DispatchReport {
        self.dispatch(Alert::new(AlertLevel::Critical, title, message, component))
            .await
    }

    fn push_history(&self, alert: Alert, now: DateTime<Utc>) {
        let mut history = self.history.lock().expect("history mutex poisoned");
        history.push(alert);

        let cutoff = now - Duration::hours(HISTORY_RETENTION_HOURS);
        history.retain(|a| a.timestamp >= cutoff);
        if history.len() > HISTORY_MAX_ENTRIES {
            let excess = history.len() - HISTORY_MAX_ENTRIES;
            history.drain(..excess);
        }
    }

    /// Alerts dispatched within the last `hours`.
    pub fn history(&self, hours: i64) -> Vec<Alert> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.history
            .lock()
            .expect("history mutex poisoned")
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn stats(&self, hours: i64) -> AlertStats {
        let recent = self.history(hours);
        let mut by_level: HashMap<String, usize> = HashMap::new();
        let mut by_component: HashMap<String, usize> = HashMap::new();
        for alert in &recent {
            *by_level.entry(alert.level.as_str().to_string()).or_default() += 1;
            *by_component.entry(alert.component.clone()).or_default() += 1;
        }
        AlertStats {
            total_alerts: recent.len(),
            by_level,
            by_component,
        }
    }

    pub fn channel_stats(&self) -> HashMap<String, ChannelStats> {
        self.channel_stats
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    struct RecordingChannel {
        kind: ChannelKind,
        name: &'static str,
        sent: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn name(&self) -> &str {
            self.name
        }

        async fn send(&self, alert: &Alert) -> Result<StdDuration, ChannelError> {
            if self.fail {
                return Err(ChannelError::Api("boom".into()));
            }
            self.sent.lock().unwrap().push(alert.title.clone());
            Ok(StdDuration::from_millis(5))
        }
    }

    fn recording(
        kind: ChannelKind,
        name: &'static str,
        fail: bool,
    ) -> (Arc<dyn AlertChannel>, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channel = Arc::new(RecordingChannel {
            kind,
            name,
            sent: sent.clone(),
            fail,
        });
        (channel, sent)
    }

    #[tokio::test]
    async fn test_severity_routing() {
        let (telegram, telegram_sent) = recording(ChannelKind::Telegram, "telegram", false);
        let (slack, slack_sent) = recording(ChannelKind::Slack, "slack", false);
        let dispatcher = AlertDispatcher::new(
            vec![telegram, slack],
            RoutingConfig::default(),
            100,
        );

        dispatcher.warning("pool high", "80%", "database").await;
        assert_eq!(telegram_sent.lock().unwrap().len(), 1);
        assert_eq!(slack_sent.lock().unwrap().len(), 0);

        dispatcher.critical("pool exhausted", "97%", "database").await;
        assert_eq!(telegram_sent.lock().unwrap().len(), 2);
        assert_eq!(slack_sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_failure_is_isolated() {
        let (broken, _) = recording(ChannelKind::Telegram, "telegram", true);
        let (slack, slack_sent) = recording(ChannelKind::Slack, "slack", false);
        let dispatcher = AlertDispatcher::new(vec![broken, slack], RoutingConfig::default(), 100);

        let report = dispatcher.critical("down", "db down", "database").await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(slack_sent.lock().unwrap().len(), 1);

        let stats = dispatcher.channel_stats();
        assert_eq!(stats["telegram"].errors, 1);
        assert_eq!(stats["slack"].sends, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_rolling_window() {
        let (telegram, sent) = recording(ChannelKind::Telegram, "telegram", false);
        let dispatcher = AlertDispatcher::new(vec![telegram], RoutingConfig::default(), 5);

        let start = Utc::now();
        // Seven identical alerts inside ten minutes: five delivered, two dropped
        for i in 0..7 {
            let alert = Alert::new(AlertLevel::Warning, "Slow Query Detected", "q", "database");
            let report = dispatcher
                .dispatch_at(alert, start + Duration::minutes(i))
                .await;
            if i < 5 {
                assert!(!report.rate_limited);
            } else {
                assert!(report.rate_limited);
            }
        }
        assert_eq!(sent.lock().unwrap().len(), 5);

        // 65 minutes after the burst the window has advanced
        let alert = Alert::new(AlertLevel::Warning, "Slow Query Detected", "q", "database");
        let report = dispatcher
            .dispatch_at(alert, start + Duration::minutes(75))
            .await;
        assert!(!report.rate_limited);
        assert_eq!(sent.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_distinct_keys_are_not_coupled() {
        let (telegram, sent) = recording(ChannelKind::Telegram, "telegram", false);
        let dispatcher = AlertDispatcher::new(vec![telegram], RoutingConfig::default(), 1);

        dispatcher.warning("a", "m", "database").await;
        dispatcher.warning("b", "m", "database").await;
        dispatcher.warning("a", "m", "scheduler").await;
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_history_and_stats() {
        let (telegram, _) = recording(ChannelKind::Telegram, "telegram", false);
        let dispatcher = AlertDispatcher::new(vec![telegram], RoutingConfig::default(), 100);

        dispatcher.info("a", "m", "database").await;
        dispatcher.warning("b", "m", "database").await;
        dispatcher.warning("c", "m", "pool").await;

        let stats = dispatcher.stats(24);
        assert_eq!(stats.total_alerts, 3);
        assert_eq!(stats.by_level["warning"], 2);
        assert_eq!(stats.by_component["database"], 2);
        assert_eq!(dispatcher.history(24).len(), 3);
    }
}
