//! Explicit construction of the whole pipeline.
//!
//! `Core::start` builds the pool, registers schemas, and wires every
//! component; there are no process-wide singletons. Pool or schema failure
//! at startup is fatal and propagates to `main`, which exits non-zero.

use std::sync::Arc;
use std::time::Duration;

use alert_dispatcher::{
    AlertChannel, AlertDispatcher, EmailChannel, RoutingConfig, SlackChannel, TelegramChannel,
    WebhookChannel,
};
use anyhow::{Context, Result};
use db_monitor::slow_query::{DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY};
use db_monitor::{PoolManager, QueryMonitor, SlowQueryQueue, SlowQueryStore, SlowQueryWriter};
use indicator_engine::IndicatorEngine;
use market_core::PriceProvider;
use outcome_tracker::OutcomeTracker;
use pattern_analyzer::{PatternAnalyzer, PatternConfig};
use price_cache::{CacheConfig, PriceSeriesCache};
use price_client::HttpPriceClient;
use signal_detector::{DetectorConfig, SignalDetector};
use signal_store::SignalStore;
use sqlx::AnyPool;

use crate::config::AppConfig;

pub struct Core {
    pub config: AppConfig,
    pub pool: AnyPool,
    pub alerts: Arc<AlertDispatcher>,
    pub monitor: Arc<QueryMonitor>,
    pub slow_queue: Arc<SlowQueryQueue>,
    pub slow_writer: Arc<SlowQueryWriter>,
    pub slow_store: Arc<SlowQueryStore>,
    pub pool_manager: Arc<PoolManager>,
    pub cache: Arc<PriceSeriesCache>,
    pub engine: Arc<IndicatorEngine>,
    pub detector: Arc<SignalDetector>,
    pub store: SignalStore,
    pub tracker: Arc<OutcomeTracker>,
    pub patterns: Arc<PatternAnalyzer>,
    pub provider: Arc<dyn PriceProvider>,
}

impl Core {
    pub async fn start(config: AppConfig) -> Result<Self> {
        let provider: Arc<dyn PriceProvider> = Arc::new(HttpPriceClient::new(
            config.price_api_base_url.clone(),
            config.price_requests_per_minute,
        ));
        Self::start_with_provider(config, provider).await
    }

    /// Start with an injected price provider (tests, alternative feeds).
    pub async fn start_with_provider(
        config: AppConfig,
        provider: Arc<dyn PriceProvider>,
    ) -> Result<Self> {
        let alerts = Arc::new(build_dispatcher(&config)?);

        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(config.pool.max_size + config.pool.max_overflow)
            .acquire_timeout(Duration::from_secs(config.pool.timeout_seconds))
            .max_lifetime(Duration::from_secs(config.pool.recycle_seconds))
            .connect(&config.database_url)
            .await
            .context("database unreachable at startup")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("database connectivity check failed")?;
        tracing::info!("startup check: database OK");

        let slow_queue = Arc::new(SlowQueryQueue::new(
            DEFAULT_QUEUE_CAPACITY,
            DEFAULT_BATCH_SIZE,
        ));
        let monitor = Arc::new(
            QueryMonitor::new(config.slow_query_threshold_seconds, slow_queue.clone())
                .with_alerts(alerts.clone()),
        );

        let store = SignalStore::new(pool.clone(), monitor.clone());
        store.init_schema().await.context("signal schema init failed")?;

        let slow_writer = Arc::new(SlowQueryWriter::new(
            pool.clone(),
            slow_queue.clone(),
            config.slow_query_flush_interval_seconds,
        ));
        slow_writer
            .init_schema()
            .await
            .context("slow query schema init failed")?;
        let slow_store = Arc::new(SlowQueryStore::new(pool.clone()));

        let pool_manager = Arc::new(PoolManager::new(
            pool.clone(),
            config.pool.clone(),
            monitor.clone(),
            alerts.clone(),
        ));

        let cache = Arc::new(PriceSeriesCache::new(CacheConfig {
            max_bars: config.cache_max_bars,
            ttl: config.cache_ttl_seconds.map(Duration::from_secs),
        }));
        let engine = Arc::new(IndicatorEngine::new());
        let detector = Arc::new(SignalDetector::new(
            engine.clone(),
            DetectorConfig {
                min_breakout_pct: config.min_breakout_pct,
            },
        ));

        let tracker = Arc::new(OutcomeTracker::new(
            store.clone(),
            cache.clone(),
            provider.clone(),
        ));
        let patterns = Arc::new(PatternAnalyzer::new(
            store.clone(),
            PatternConfig {
                window_days: config.pattern_window_days,
                sequential_gap_days: config.sequential_gap_days,
                concurrent_gap_minutes: config.concurrent_gap_minutes,
            },
        ));

        tracing::info!(
            symbols = config.watch_symbols.len(),
            timeframes = config.watch_timeframes.len(),
            "core initialized"
        );

        Ok(Self {
            config,
            pool,
            alerts,
            monitor,
            slow_queue,
            slow_writer,
            slow_store,
            pool_manager,
            cache,
            engine,
            detector,
            store,
            tracker,
            patterns,
            provider,
        })
    }

    /// Final teardown after the scheduler has stopped: drain the pending
    /// slow-query batch once and dispose the pool.
    pub async fn shutdown(&self) {
        self.slow_writer.flush_once().await;
        self.pool.close().await;
        tracing::info!("core shut down");
    }
}

fn build_dispatcher(config: &AppConfig) -> Result<AlertDispatcher> {
    let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();

    if let (Some(token), Some(chat_id)) = (&config.telegram_bot_token, &config.telegram_chat_id) {
        channels.push(Arc::new(TelegramChannel::new(
            token.clone(),
            chat_id.clone(),
        )));
        tracing::info!("telegram alerts enabled");
    }
    if let Some(webhook) = &config.slack_webhook_url {
        channels.push(Arc::new(SlackChannel::new(webhook.clone())));
        tracing::info!("slack alerts enabled");
    }
    if let (Some(host), Some(from)) = (&config.smtp_host, &config.smtp_from) {
        match EmailChannel::new(
            host,
            config.smtp_port,
            config.smtp_username.clone(),
            config.smtp_password.clone(),
            from,
            &config.smtp_to,
        ) {
            Ok(channel) => {
                channels.push(Arc::new(channel));
                tracing::info!(recipients = config.smtp_to.len(), "email alerts enabled");
            }
            Err(e) => tracing::warn!(error = %e, "email channel disabled"),
        }
    }
    if let Some(url) = &config.alert_webhook_url {
        channels.push(Arc::new(WebhookChannel::new(url.clone())));
        tracing::info!("webhook alerts enabled");
    }

    if channels.is_empty() {
        tracing::info!("no alert channels configured (set TELEGRAM_BOT_TOKEN or SLACK_WEBHOOK_URL)");
    }

    let mut routing = RoutingConfig::default();
    if config.smtp_host.is_some() {
        routing.critical.push(alert_dispatcher::ChannelKind::Email);
    }
    if config.alert_webhook_url.is_some() {
        routing.critical.push(alert_dispatcher::ChannelKind::Webhook);
    }

    Ok(AlertDispatcher::new(
        channels,
        routing,
        config.alert_rate_limit_per_hour,
    ))
}
