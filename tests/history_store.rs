mod common;

use chrono::Duration;
use common::{at, feed_entity, record};
use servicedash::aggregate::Direction;
use servicedash::db;
use servicedash::history::{HistoryStore, StoreError, Window};
use servicedash::model::State;
use tempfile::TempDir;

async fn file_store() -> (TempDir, HistoryStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = db::create_pool(&dir.path().join("nested").join("history.db"))
        .await
        .expect("pool");
    let store = HistoryStore::new(pool).await.expect("store");
    (dir, store)
}

#[tokio::test]
async fn n_cycles_store_n_records_per_entity() {
    let (_dir, store) = file_store().await;
    let entities = vec![feed_entity("a", "Services"), feed_entity("b", "Services")];
    store.register_entities(&entities).await.expect("register");

    for minute in 0..5 {
        let ts = store
            .next_cycle_timestamp(at(10, minute))
            .await
            .expect("timestamp");
        let records = vec![
            record("a", ts, State::Ok, None),
            record("b", ts, State::Degraded, None),
        ];
        assert_eq!(store.append_cycle(&records).await.expect("append"), 2);
    }

    assert_eq!(store.record_count("a").await.expect("count"), 5);
    assert_eq!(store.record_count("b").await.expect("count"), 5);
    let latest = store.latest("b").await.expect("latest").expect("record");
    assert_eq!(latest.ts, at(10, 4));
    assert_eq!(latest.state, State::Degraded);
}

#[tokio::test]
async fn stale_records_are_rejected_and_cycle_rolls_back() {
    let (_dir, store) = file_store().await;
    store
        .append(&record("a", at(10, 0), State::Ok, None))
        .await
        .expect("first append");

    let err = store
        .append(&record("a", at(10, 0), State::Ok, None))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::OutOfOrder { .. }));

    let cycle = vec![
        record("b", at(10, 5), State::Ok, None),
        record("a", at(9, 0), State::Outage, None),
    ];
    let err = store.append_cycle(&cycle).await.unwrap_err();
    assert!(matches!(err, StoreError::OutOfOrder { ref entity_id, .. } if entity_id == "a"));
    assert_eq!(store.record_count("b").await.expect("count"), 0);
    assert_eq!(store.record_count("a").await.expect("count"), 1);
}

#[tokio::test]
async fn cycle_timestamp_moves_past_stored_records() {
    let (_dir, store) = file_store().await;
    store
        .append(&record("a", at(12, 0), State::Ok, None))
        .await
        .expect("append");

    let behind = store.next_cycle_timestamp(at(11, 0)).await.expect("ts");
    assert!(behind > at(12, 0));
    assert_eq!(behind, at(12, 0) + Duration::milliseconds(1));

    let ahead = store.next_cycle_timestamp(at(13, 0)).await.expect("ts");
    assert_eq!(ahead, at(13, 0));
}

#[tokio::test]
async fn series_is_ordered_and_idempotent() {
    let (_dir, store) = file_store().await;
    let cycle: Vec<_> = (0..4)
        .map(|i| record("fx", at(10, i * 10), State::Ok, Some(1.08 + f64::from(i) * 0.01)))
        .collect();
    for r in &cycle {
        store.append(r).await.expect("append");
    }

    let first = store.series("fx", at(10, 10)).await.expect("series");
    let second = store.series("fx", at(10, 10)).await.expect("series");
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert!(first.windows(2).all(|w| w[0].ts < w[1].ts));
}

#[tokio::test]
async fn uptime_covers_all_ok_and_all_outage_windows() {
    let (_dir, store) = file_store().await;
    let now = at(23, 0);
    let window = Window::ending_at(now, Duration::hours(24));

    for hour in 0..23 {
        store
            .append(&record("healthy", at(hour, 0), State::Ok, None))
            .await
            .expect("append");
    }
    // A single outage sample from before the window spans all of it.
    store
        .append(&record("dead", window.start - Duration::hours(1), State::Outage, None))
        .await
        .expect("append");

    assert_eq!(store.uptime("healthy", window).await.expect("uptime"), Some(1.0));
    assert_eq!(store.uptime("dead", window).await.expect("uptime"), Some(0.0));
    assert_eq!(store.uptime("missing", window).await.expect("uptime"), None);
}

#[tokio::test]
async fn trend_respects_deadband_and_skips_unknown_rows() {
    let (_dir, store) = file_store().await;
    let rows = vec![
        record("btc", at(8, 0), State::Ok, Some(100.0)),
        record("btc", at(9, 0), State::Unknown, None),
        record("btc", at(10, 0), State::Ok, Some(100.4)),
        record("btc", at(11, 0), State::Ok, Some(103.0)),
    ];
    for r in &rows {
        store.append(r).await.expect("append");
    }
    let window = Window::ending_at(at(11, 0), Duration::hours(2));

    let trend = store.trend("btc", window, 0.0).await.expect("trend").expect("some");
    assert_eq!(trend.baseline, 100.0);
    assert_eq!(trend.direction, Direction::Up);

    let trend = store.trend("btc", window, 5.0).await.expect("trend").expect("some");
    assert_eq!(trend.direction, Direction::Flat);

    let flat_window = Window::ending_at(at(10, 0), Duration::hours(1));
    let flat = store
        .trend("btc", flat_window, 0.0)
        .await
        .expect("trend")
        .expect("some");
    assert!((flat.delta - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn last_failure_and_episodes_follow_the_window() {
    let (_dir, store) = file_store().await;
    let rows = vec![
        record("gh", at(8, 0), State::Ok, None),
        record("gh", at(9, 0), State::Degraded, None),
        record("gh", at(9, 30), State::Ok, None),
        record("gh", at(10, 0), State::Outage, None),
        record("gh", at(10, 30), State::Ok, None),
    ];
    for r in &rows {
        store.append(r).await.expect("append");
    }
    let window = Window::ending_at(at(11, 0), Duration::hours(3));

    assert_eq!(store.episodes("gh", window).await.expect("episodes"), 2);
    let failure = store
        .last_failure("gh", window.start)
        .await
        .expect("failure")
        .expect("some");
    assert_eq!(failure.ts, at(10, 0));
    assert_eq!(failure.message.as_deref(), Some("outage"));

    let buckets = store.buckets("gh", window).await.expect("buckets");
    assert_eq!(buckets.len(), 3);
    assert_eq!(buckets[0], Some(State::Ok));
    assert_eq!(buckets[1], Some(State::Degraded));
    assert_eq!(buckets[2], Some(State::Outage));
}

#[tokio::test]
async fn prune_removes_only_old_records() {
    let (_dir, store) = file_store().await;
    for hour in [1, 5, 9] {
        store
            .append(&record("a", at(hour, 0), State::Ok, None))
            .await
            .expect("append");
    }
    assert_eq!(store.prune_before(at(5, 0)).await.expect("prune"), 1);
    assert_eq!(store.record_count("a").await.expect("count"), 2);
}

#[tokio::test]
async fn legacy_schema_gains_missing_columns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("legacy.db");
    let pool = db::create_pool(&path).await.expect("pool");
    sqlx::query(
        "CREATE TABLE records (entity_id TEXT NOT NULL, ts_ms INTEGER NOT NULL, \
         state TEXT NOT NULL, PRIMARY KEY (entity_id, ts_ms))",
    )
    .execute(&pool)
    .await
    .expect("legacy table");
    sqlx::query("INSERT INTO records (entity_id, ts_ms, state) VALUES ('a', 1000, 'ok')")
        .execute(&pool)
        .await
        .expect("legacy row");

    let store = HistoryStore::new(pool).await.expect("migrated store");
    let latest = store.latest("a").await.expect("latest").expect("row");
    assert_eq!(latest.state, State::Ok);
    assert_eq!(latest.value, None);

    store
        .append(&record("a", at(10, 0), State::Ok, Some(1.5)))
        .await
        .expect("append after migration");
    let value = store.latest_value("a").await.expect("value").expect("row");
    assert_eq!(value.value, Some(1.5));
}

#[tokio::test]
async fn pruning_at_window_length_keeps_the_covering_record() {
    let (_dir, store) = file_store().await;
    let t0 = at(1, 0);
    for r in [
        record("svc", at(0, 0), State::Ok, None),
        record("svc", t0, State::Outage, None),
        record("svc", t0 + Duration::minutes(5), State::Ok, None),
    ] {
        store.append(&r).await.expect("append");
    }

    let window = Window::ending_at(t0 + Duration::hours(24) + Duration::minutes(1), Duration::hours(24));
    let before = store.uptime("svc", window).await.expect("uptime").expect("some");
    assert!(before < 1.0);

    // Retention equal to the window prunes right at the window start.
    assert_eq!(store.prune_before(window.start).await.expect("prune"), 1);
    assert_eq!(store.record_count("svc").await.expect("count"), 2);
    let after = store.uptime("svc", window).await.expect("uptime").expect("some");
    assert_eq!(before, after);
}

#[tokio::test]
async fn reader_keeps_one_view_while_a_cycle_commits() {
    let (_dir, store) = file_store().await;
    store
        .append(&record("a", at(10, 0), State::Ok, None))
        .await
        .expect("append");

    let mut reader = store.reader().await.expect("reader");
    let seen = reader.latest("a").await.expect("latest").expect("row");
    assert_eq!(seen.state, State::Ok);

    store
        .append_cycle(&[record("a", at(10, 5), State::Outage, None)])
        .await
        .expect("cycle");

    let again = reader.latest("a").await.expect("latest").expect("row");
    assert_eq!(again.ts, at(10, 0));
    assert_eq!(reader.record_count("a").await.expect("count"), 1);
    reader.finish().await.expect("finish");

    let fresh = store.latest("a").await.expect("latest").expect("row");
    assert_eq!(fresh.state, State::Outage);
}

#[tokio::test]
async fn sample_at_window_end_fills_the_last_bucket() {
    let (_dir, store) = file_store().await;
    let now = at(12, 0);
    store
        .append(&record("a", now, State::Degraded, None))
        .await
        .expect("append");
    let buckets = store
        .buckets("a", Window::ending_at(now, Duration::hours(24)))
        .await
        .expect("buckets");
    assert_eq!(buckets.len(), 24);
    assert_eq!(buckets[23], Some(State::Degraded));
}
