// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use insightfinder::{
    api::RetryStrategy,
    errors::ShippingError,
    flusher::{Flusher, FlusherConfig},
    payload::MetricDataPoint,
    store::MetricStore,
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::time::Duration;

const RECEIVER: &str = "/api/v2/metric-data-receive";

fn flusher_config(url: String) -> FlusherConfig {
    FlusherConfig {
        url,
        user_name: "mock-user".to_string(),
        license_key: "mock-license".to_string(),
        project_name: "mock-project".to_string(),
        system_name: Some("mock-system".to_string()),
        instance_name: "mock-host".to_string(),
        component_name: None,
        sampling_interval: Some(Duration::from_secs(300)),
        https_proxy: None,
        timeout: Duration::from_secs(5),
        retry_strategy: RetryStrategy::FixedInterval(15, Duration::from_millis(1)),
        chunk_threshold: usize::MAX,
        max_packet_size: 10_000_000,
    }
}

fn three_by_two_store() -> MetricStore {
    let store = MetricStore::default();
    for instance in ["a", "b", "c"] {
        store.record(instance, "m1", 1.0);
        store.record(instance, "m2", 1.0);
    }
    store
}

#[cfg(test)]
#[tokio::test]
async fn flusher_splits_round_into_chunks() {
    let mut mock_server = Server::new_async().await;

    let first = mock_server
        .mock("POST", RECEIVER)
        .match_header("Content-Type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "licenseKey": "mock-license",
            "data": {
                "projectName": "mock-project",
                "systemName": "mock-system",
                "si": "300",
                "idm": {
                    "a": {"in": "a", "dit": {"1000": {"t": 1000, "metricDataPointSet": [
                        {"m": "m1", "v": 1.0}, {"m": "m2", "v": 1.0}
                    ]}}},
                    "b": {"in": "b", "dit": {"1000": {"t": 1000, "metricDataPointSet": [
                        {"m": "m1", "v": 1.0}, {"m": "m2", "v": 1.0}
                    ]}}}
                }
            }
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let second = mock_server
        .mock("POST", RECEIVER)
        .match_body(Matcher::PartialJson(json!({
            "data": {"idm": {"c": {"in": "c"}}}
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let point_size = serde_json::to_vec(&MetricDataPoint::new("m1", 1.0))
        .expect("failed to serialize point")
        .len();
    let flusher = Flusher::new(FlusherConfig {
        chunk_threshold: point_size * 3 + 1,
        ..flusher_config(mock_server.url())
    })
    .expect("failed to create flusher");

    let store = three_by_two_store();
    let report = flusher
        .flush(&store, 1000)
        .await
        .expect("flush should succeed");

    assert_eq!(report.chunks, 2);
    assert_eq!(report.points, 6);
    first.assert_async().await;
    second.assert_async().await;
}

#[cfg(test)]
#[tokio::test]
async fn flusher_succeeds_on_last_allowed_attempt() {
    let mut mock_server = Server::new_async().await;

    let failures = mock_server
        .mock("POST", RECEIVER)
        .with_status(503)
        .expect(14)
        .create_async()
        .await;
    let success = mock_server
        .mock("POST", RECEIVER)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let flusher =
        Flusher::new(flusher_config(mock_server.url())).expect("failed to create flusher");
    let store = MetricStore::default();
    store.record("", "CPU Usage %", 42.0);

    let report = flusher
        .flush(&store, 1)
        .await
        .expect("15th attempt should succeed");

    assert_eq!(report.chunks, 1);
    failures.assert_async().await;
    success.assert_async().await;
}

#[cfg(test)]
#[tokio::test]
async fn flusher_gives_up_after_retry_budget() {
    let mut mock_server = Server::new_async().await;

    let failures = mock_server
        .mock("POST", RECEIVER)
        .with_status(500)
        .expect(15)
        .create_async()
        .await;

    let flusher =
        Flusher::new(flusher_config(mock_server.url())).expect("failed to create flusher");
    let store = MetricStore::default();
    store.record("", "CPU Usage %", 42.0);

    let result = flusher.flush(&store, 1).await;

    match result {
        Err(ShippingError::Destination(_, msg)) => {
            assert_eq!(msg, "Failed to send request after 15 attempts");
        }
        other => panic!("expected destination error, got {other:?}"),
    }
    failures.assert_async().await;
    // the store is only cleared by the caller
    assert_eq!(store.all_records().expect("store readable").len(), 1);
}

#[cfg(test)]
#[tokio::test]
async fn flusher_stops_at_first_failed_chunk() {
    let mut mock_server = Server::new_async().await;

    let first = mock_server
        .mock("POST", RECEIVER)
        .match_body(Matcher::PartialJson(json!({"data": {"idm": {"a": {"in": "a"}}}})))
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    let rest = mock_server
        .mock("POST", RECEIVER)
        .match_body(Matcher::PartialJson(json!({"data": {"idm": {"c": {"in": "c"}}}})))
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let point_size = serde_json::to_vec(&MetricDataPoint::new("m1", 1.0))
        .expect("failed to serialize point")
        .len();
    let flusher = Flusher::new(FlusherConfig {
        chunk_threshold: point_size * 3 + 1,
        ..flusher_config(mock_server.url())
    })
    .expect("failed to create flusher");

    let result = flusher.flush(&three_by_two_store(), 1).await;

    assert!(matches!(result, Err(ShippingError::Destination(Some(_), _))));
    first.assert_async().await;
    rest.assert_async().await;
}
