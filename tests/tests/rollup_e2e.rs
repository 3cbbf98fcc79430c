//! End-to-end rollup pipeline tests over the in-memory store.
//!
//! These drive the real engine through the full tier cascade: raw samples
//! into 15-min buckets, upward to monthly, with retirement tasks flowing
//! into the deletion queue.

use integration_tests::fixtures::{counter_series, daily_aggregate, power_series, utc};
use integration_tests::setup::TestContext;
use rollup_core::{CoreEvent, Resolution, TierSource};

/// Full cascade over one day of counter data: raw -> 15min -> hourly ->
/// daily -> weekly, checking values and retirement at each stage.
#[tokio::test]
async fn full_tier_cascade() {
    let ctx = TestContext::new();
    // Sunday 2024-03-10, sampled every 5 minutes, +1.0 per sample.
    ctx.store
        .push_samples(counter_series("meter-1", utc(2024, 3, 10, 0, 0), 24, 1.0));
    let now = utc(2024, 3, 11, 2, 0);

    // 15-min tier: 96 buckets, each bucket spans 3 samples (delta 2.0).
    let result = ctx.engine.rollup_tier(Resolution::FifteenMin, now).await;
    assert!(!result.skipped);
    assert_eq!(result.aggregates_written, 96);
    let quarter = ctx.store.aggregates_at(Resolution::FifteenMin);
    assert_eq!(quarter.len(), 96);
    assert!(quarter.iter().all(|r| r.value == 2.0));
    assert_eq!(quarter[0].bucket_start, utc(2024, 3, 10, 0, 0));

    // Hourly tier sums the four 15-min deltas per hour.
    let result = ctx.engine.rollup_tier(Resolution::Hourly, now).await;
    assert_eq!(result.aggregates_written, 24);
    let hourly = ctx.store.aggregates_at(Resolution::Hourly);
    assert!(hourly.iter().all(|r| r.value == 8.0));

    // Daily tier sums the 24 hourly deltas.
    let result = ctx.engine.rollup_tier(Resolution::Daily, now).await;
    assert_eq!(result.aggregates_written, 1);
    let daily = ctx.store.aggregates_at(Resolution::Daily);
    assert_eq!(daily[0].bucket_start, utc(2024, 3, 10, 0, 0));
    assert_eq!(daily[0].value, 192.0);

    // Weekly tier reads the daily tier; the week of Mar 4 is complete.
    let result = ctx.engine.rollup_tier(Resolution::Weekly, now).await;
    assert_eq!(result.aggregates_written, 1);
    let weekly = ctx.store.aggregates_at(Resolution::Weekly);
    assert_eq!(weekly[0].bucket_start, utc(2024, 3, 4, 0, 0));
    assert_eq!(weekly[0].value, 192.0);

    // Monthly: March is not complete yet, so nothing can be written.
    let result = ctx.engine.rollup_tier(Resolution::Monthly, now).await;
    assert!(result.skipped);

    // Every producing tier except weekly queued retirement of its source.
    let targets: Vec<TierSource> = ctx
        .deletion
        .pending()
        .iter()
        .map(|t| t.predicate.target)
        .collect();
    assert_eq!(
        targets,
        vec![
            TierSource::Raw,
            TierSource::Aggregate(Resolution::FifteenMin),
            TierSource::Aggregate(Resolution::Hourly),
        ]
    );
}

/// Running the same tier twice over unchanged data must not duplicate or
/// alter aggregates.
#[tokio::test]
async fn cascade_is_idempotent() {
    let ctx = TestContext::new();
    ctx.store
        .push_samples(counter_series("meter-1", utc(2024, 3, 10, 0, 0), 24, 1.0));
    let now = utc(2024, 3, 11, 2, 0);

    ctx.engine.rollup_tier(Resolution::FifteenMin, now).await;
    ctx.engine.rollup_tier(Resolution::Hourly, now).await;
    let before_quarter = ctx.store.aggregates_at(Resolution::FifteenMin);
    let before_hourly = ctx.store.aggregates_at(Resolution::Hourly);

    ctx.engine.rollup_tier(Resolution::FifteenMin, now).await;
    ctx.engine.rollup_tier(Resolution::Hourly, now).await;

    assert_eq!(ctx.store.aggregates_at(Resolution::FifteenMin), before_quarter);
    assert_eq!(ctx.store.aggregates_at(Resolution::Hourly), before_hourly);
}

/// Mixed signal kinds in one bucket reduce independently.
#[tokio::test]
async fn mixed_signals_reduce_per_policy() {
    let ctx = TestContext::new();
    ctx.store
        .push_samples(counter_series("meter-1", utc(2024, 3, 10, 8, 0), 1, 1.0));
    ctx.store
        .push_samples(power_series("sensor-1", utc(2024, 3, 10, 8, 0), 1));

    ctx.engine
        .rollup_tier(Resolution::FifteenMin, utc(2024, 3, 10, 9, 30))
        .await;
    let records = ctx.store.aggregates_at(Resolution::FifteenMin);
    assert_eq!(records.len(), 8);

    // Counters carry the in-bucket delta, instantaneous signals the mean.
    let meter: Vec<_> = records.iter().filter(|r| r.signal_id == "meter-1").collect();
    let sensor: Vec<_> = records.iter().filter(|r| r.signal_id == "sensor-1").collect();
    assert!(meter.iter().all(|r| r.value == 2.0));
    // Power cycles 100/150/200 within each bucket.
    assert!(sensor.iter().all(|r| r.value == 150.0));
}

/// A completed month rolls up from daily aggregates and retires them.
#[tokio::test]
async fn monthly_rollup_retires_daily_source() {
    let ctx = TestContext::new();
    for day in 1..=29 {
        ctx.store
            .seed_aggregates(vec![daily_aggregate("meter-1", utc(2024, 2, day, 0, 0), 10.0)]);
    }

    let result = ctx
        .engine
        .rollup_tier(Resolution::Monthly, utc(2024, 3, 1, 3, 30))
        .await;
    assert!(!result.skipped);
    assert_eq!(result.aggregates_written, 1);

    let monthly = ctx.store.aggregates_at(Resolution::Monthly);
    assert_eq!(monthly[0].bucket_start, utc(2024, 2, 1, 0, 0));
    assert_eq!(monthly[0].value, 290.0);

    let pending = ctx.deletion.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].predicate.target,
        TierSource::Aggregate(Resolution::Daily)
    );
    // The retirement keeps the configured recent buffer un-retired.
    assert_eq!(pending[0].predicate.range.end, utc(2024, 2, 29, 23, 0));
}

/// Queued retirement actually removes the superseded raw data once the
/// deletion consumer drains it.
#[tokio::test(start_paused = true)]
async fn retirement_drains_through_deletion_queue() {
    let ctx = TestContext::new();
    ctx.store
        .push_samples(counter_series("meter-1", utc(2024, 3, 10, 0, 0), 24, 1.0));
    let raw_before = ctx.store.sample_count();
    assert_eq!(raw_before, 288);

    ctx.engine
        .rollup_tier(Resolution::FifteenMin, utc(2024, 3, 11, 2, 0))
        .await;
    assert_eq!(ctx.deletion.stats().queue_depth, 1);

    let handle = ctx.deletion.spawn();
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(60);
    while ctx.deletion.stats().processed == 0 {
        assert!(tokio::time::Instant::now() < deadline, "deletion never drained");
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    // All of Mar 10 is older than the retirement buffer.
    assert_eq!(ctx.store.sample_count(), 0);
    assert_eq!(ctx.deletion.stats().rows_deleted, 288);
    // Aggregates survive their sources.
    assert_eq!(ctx.store.aggregates_at(Resolution::FifteenMin).len(), 96);

    ctx.deletion.shutdown();
    handle.abort();
}

/// Rollup completion is announced on the event bus.
#[tokio::test]
async fn rollup_publishes_completion_event() {
    let ctx = TestContext::new();
    let mut events = ctx.events.subscribe();
    ctx.store
        .push_samples(counter_series("meter-1", utc(2024, 3, 10, 8, 0), 1, 1.0));

    ctx.engine
        .rollup_tier(Resolution::FifteenMin, utc(2024, 3, 10, 9, 30))
        .await;

    match events.recv().await {
        Ok(CoreEvent::RollupCompleted {
            aggregates_written, ..
        }) => assert_eq!(aggregates_written, 4),
        other => panic!("expected RollupCompleted, got {:?}", other),
    }
}
