use std::sync::Arc;

use chrono::{Duration, Utc};
use db_monitor::{QueryMonitor, SlowQueryQueue};
use market_core::{MarketCondition, NewSignal, Timeframe};

use crate::models::{Horizon, SignalFilter};
use crate::store::{SaveOutcome, SignalStore};

async fn setup_store() -> SignalStore {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");
    let monitor = Arc::new(QueryMonitor::new(
        1.0,
        Arc::new(SlowQueryQueue::new(1000, 100)),
    ));
    let store = SignalStore::new(pool, monitor);
    store.init_schema().await.expect("schema");
    store
}

fn rsi_overbought(symbol: &str, triggered_at: chrono::DateTime<Utc>) -> NewSignal {
    NewSignal {
        symbol: symbol.to_string(),
        signal_type: "RSI_overbought".to_string(),
        timeframe: Timeframe::Day1,
        triggered_at,
        current_price: 100.0,
        indicator_value: Some(73.5),
        signal_strength: Some(3.5),
        volume: Some(1_000_000.0),
        market_condition: MarketCondition::Bearish,
        additional_context: Some(serde_json::json!({"rsi_value": 73.5})),
    }
}

#[tokio::test]
async fn test_save_creates_paired_outcome() {
    let store = setup_store().await;
    let outcome = store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap();

    let SaveOutcome::Saved(record) = outcome else {
        panic!("expected first save to persist");
    };
    assert_eq!(record.symbol, "^IXIC");
    assert_eq!(record.signal_type, "RSI_overbought");
    assert!(!record.alert_sent());

    let paired = store
        .outcome_for_signal(record.id)
        .await
        .unwrap()
        .expect("paired outcome row");
    assert!(!paired.is_complete());
    for horizon in Horizon::ALL {
        assert!(paired.price_for(horizon).is_none());
        assert!(paired.return_for(horizon).is_none());
    }
}

#[tokio::test]
async fn test_duplicate_suppressed_within_window() {
    let store = setup_store().await;
    let first = Utc::now() - Duration::minutes(30);

    let saved = store
        .save(&rsi_overbought("^IXIC", first), Duration::minutes(60))
        .await
        .unwrap();
    assert!(!saved.is_duplicate());

    // Same (symbol, signal_type) thirty minutes later, window 60 minutes
    let second = store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap();
    assert!(second.is_duplicate());

    let rows = store
        .recent(
            &SignalFilter {
                symbol: Some("^IXIC".to_string()),
                ..Default::default()
            },
            50,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_duplicate_allowed_after_window() {
    let store = setup_store().await;
    store
        .save(
            &rsi_overbought("^IXIC", Utc::now() - Duration::minutes(90)),
            Duration::minutes(60),
        )
        .await
        .unwrap();

    let second = store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap();
    assert!(!second.is_duplicate());
}

#[tokio::test]
async fn test_dedup_is_per_symbol_and_type() {
    let store = setup_store().await;
    store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap();

    // Different symbol: not a duplicate
    let other_symbol = store
        .save(&rsi_overbought("^GSPC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap();
    assert!(!other_symbol.is_duplicate());

    // Different type on the same symbol: not a duplicate
    let mut other_type = rsi_overbought("^IXIC", Utc::now());
    other_type.signal_type = "MA200_breakout_up".to_string();
    let saved = store.save(&other_type, Duration::minutes(60)).await.unwrap();
    assert!(!saved.is_duplicate());
}

#[tokio::test]
async fn test_mark_alert_sent() {
    let store = setup_store().await;
    let SaveOutcome::Saved(record) = store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap()
    else {
        panic!("expected save");
    };

    assert!(store.mark_alert_sent(record.id).await.unwrap());
    let updated = store.find_by_id(record.id).await.unwrap().unwrap();
    assert!(updated.alert_sent());

    assert!(!store.mark_alert_sent(9999).await.unwrap());
}

#[tokio::test]
async fn test_fill_slot_is_write_once() {
    let store = setup_store().await;
    let SaveOutcome::Saved(record) = store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap()
    else {
        panic!("expected save");
    };
    let outcome = store.outcome_for_signal(record.id).await.unwrap().unwrap();

    assert!(store
        .fill_slot(outcome.id, Horizon::Hour1, 102.0)
        .await
        .unwrap());
    // Second write is refused, the slot is immutable
    assert!(!store
        .fill_slot(outcome.id, Horizon::Hour1, 105.0)
        .await
        .unwrap());

    let updated = store.outcome_for_signal(record.id).await.unwrap().unwrap();
    assert_eq!(updated.price_1h, Some(102.0));
}

#[tokio::test]
async fn test_recompute_returns_matches_formula() {
    let store = setup_store().await;
    let SaveOutcome::Saved(record) = store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap()
    else {
        panic!("expected save");
    };
    let outcome = store.outcome_for_signal(record.id).await.unwrap().unwrap();

    store.fill_slot(outcome.id, Horizon::Hour1, 102.0).await.unwrap();
    store.fill_slot(outcome.id, Horizon::Hour4, 103.5).await.unwrap();
    store.fill_slot(outcome.id, Horizon::Day1, 98.0).await.unwrap();
    store.recompute_returns(outcome.id, 100.0).await.unwrap();

    let updated = store.outcome_for_signal(record.id).await.unwrap().unwrap();
    assert!((updated.return_1h.unwrap() - 2.0).abs() < 1e-6);
    assert!((updated.return_4h.unwrap() - 3.5).abs() < 1e-6);
    assert!((updated.return_1d.unwrap() - (-2.0)).abs() < 1e-6);
    assert!(updated.return_1w.is_none());
    assert!(updated.return_1m.is_none());
    assert!(!updated.is_complete());
}

#[tokio::test]
async fn test_completion_requires_month_slot() {
    let store = setup_store().await;
    let SaveOutcome::Saved(record) = store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap()
    else {
        panic!("expected save");
    };
    let outcome = store.outcome_for_signal(record.id).await.unwrap().unwrap();

    // Not completable until price_1m is present
    assert!(!store.mark_complete(outcome.id).await.unwrap());

    store.fill_slot(outcome.id, Horizon::Month1, 110.0).await.unwrap();
    assert!(store.mark_complete(outcome.id).await.unwrap());

    let updated = store.outcome_for_signal(record.id).await.unwrap().unwrap();
    assert!(updated.is_complete());
    assert!(store.open_outcomes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_outcomes_ascending_signal_id() {
    let store = setup_store().await;
    for symbol in ["AAA", "BBB", "CCC"] {
        store
            .save(&rsi_overbought(symbol, Utc::now()), Duration::minutes(60))
            .await
            .unwrap();
    }

    let open = store.open_outcomes().await.unwrap();
    assert_eq!(open.len(), 3);
    assert!(open.windows(2).all(|w| w[0].signal_id < w[1].signal_id));
}

#[tokio::test]
async fn test_recent_filters_by_type() {
    let store = setup_store().await;
    store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap();
    let mut breakout = rsi_overbought("^IXIC", Utc::now());
    breakout.signal_type = "MA200_breakout_up".to_string();
    store.save(&breakout, Duration::minutes(60)).await.unwrap();

    let filtered = store
        .recent(
            &SignalFilter {
                signal_type: Some("MA200_breakout_up".to_string()),
                ..Default::default()
            },
            10,
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].signal_type, "MA200_breakout_up");

    assert_eq!(store.signal_count_today(Some("^IXIC")).await.unwrap(), 2);
}

#[tokio::test]
async fn test_store_queries_are_monitored() {
    let store = setup_store().await;
    store
        .save(&rsi_overbought("^IXIC", Utc::now()), Duration::minutes(60))
        .await
        .unwrap();

    // The dedup select, both inserts, and the readback all went through the
    // monitor exactly once each
    let summary = store.monitor().performance_summary();
    assert!(summary.total_queries >= 4);
    assert_eq!(summary.slow_queries, 0);
}
