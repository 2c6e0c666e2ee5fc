//! Architectural Contract Test: Delivered Short-Circuit
//!
//! This test verifies that a parcel known to be delivered is never fetched
//! again.
//!
//! Constraints verified:
//! - Cached delivered info suppresses every fetch, even for unknown sources
//! - The delivered event fires exactly once per lookup
//! - All cached parses are still returned, in registry order
//!
//! If this test fails, delivered parcels keep costing upstream calls.

mod common;

use chrono::TimeDelta;
use common::*;
use parcels_core::{AggregatorConfig, AggregatorEvent, ManualClock, ResponseStatus};

#[tokio::test]
async fn delivered_parcel_is_never_fetched() {
    let first = ScriptedSource::new("first");
    let delivered = ScriptedSource::new("delivered");
    let stale = ScriptedSource::new("stale");
    let unseen = ScriptedSource::new("unseen");

    let history = RecordingHistoryStore::new();
    let long_ago = t0() - TimeDelta::days(10);
    history
        .seed(stored_response("first", ResponseStatus::Success, "ACCEPTED", long_ago))
        .await;
    history
        .seed(stored_response(
            "delivered",
            ResponseStatus::Success,
            "ACCEPTED,DELIVERED",
            long_ago,
        ))
        .await;
    history
        .seed(stored_response("stale", ResponseStatus::Success, "ACCEPTED", long_ago))
        .await;

    let (aggregator, mut events) = aggregator(
        &[first.clone(), delivered.clone(), stale.clone(), unseen.clone()],
        history.clone(),
        ManualClock::new(t0()),
        AggregatorConfig::default(),
    );

    let result = aggregator.get_tracking_info(TRACKING_NUMBER).await.unwrap();

    for source in [&first, &delivered, &stale, &unseen] {
        assert_eq!(source.fetch_call_count(), 0);
    }
    assert_eq!(history.insert_call_count(), 0);
    assert_eq!(history.update_call_count(), 0);

    assert_eq!(source_names(&result), vec!["first", "delivered", "stale"]);
    assert!(result[1].is_delivered());
    assert!(result.iter().all(|info| info.last_fetched_at == long_ago));

    let events = drain_events(&mut events);
    let delivered_events = events
        .iter()
        .filter(|event| matches!(event, AggregatorEvent::ParcelDelivered { .. }))
        .count();
    assert_eq!(delivered_events, 1);
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, AggregatorEvent::SourceHit { .. }))
    );
}

#[tokio::test]
async fn delivery_seen_in_fetch_is_served_then_short_circuits() {
    let api1 = ScriptedSource::new("api1");
    api1.respond(ResponseStatus::Success, "ACCEPTED,DELIVERED");
    let history = RecordingHistoryStore::new();
    let clock = ManualClock::new(t0());

    let (aggregator, mut events) = aggregator(
        &[api1.clone()],
        history.clone(),
        clock.clone(),
        AggregatorConfig::default(),
    );

    let result = aggregator.get_tracking_info(TRACKING_NUMBER).await.unwrap();
    assert!(result[0].is_delivered());
    assert_eq!(api1.fetch_call_count(), 1);
    // Delivery discovered by a fetch is not a short-circuit
    assert!(
        !drain_events(&mut events)
            .iter()
            .any(|event| matches!(event, AggregatorEvent::ParcelDelivered { .. }))
    );

    // Long after every interval, still no fetch
    clock.advance(TimeDelta::days(30));
    let result = aggregator.get_tracking_info(TRACKING_NUMBER).await.unwrap();
    assert_eq!(api1.fetch_call_count(), 1);
    assert_eq!(result.len(), 1);
    assert_eq!(
        drain_events(&mut events),
        vec![AggregatorEvent::ParcelDelivered {
            tracking_number: TRACKING_NUMBER.to_string(),
        }]
    );
}

#[tokio::test]
async fn delivered_history_past_expiry_still_short_circuits() {
    let api1 = ScriptedSource::new("api1");
    let history = RecordingHistoryStore::new();
    history
        .seed(stored_response(
            "api1",
            ResponseStatus::Success,
            "DELIVERED",
            t0() - TimeDelta::days(365),
        ))
        .await;

    let (aggregator, _events) = aggregator(
        &[api1.clone()],
        history.clone(),
        ManualClock::new(t0()),
        AggregatorConfig::default(),
    );

    let result = aggregator.get_tracking_info(TRACKING_NUMBER).await.unwrap();
    assert_eq!(api1.fetch_call_count(), 0);
    assert_eq!(result.len(), 1);
}
