//! Batches of gateway reads through the executor and processor.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fanout_batch::{BatchError, process_outcomes, process_outcomes_with};
use fanout_cache::CachePolicy;
use fanout_gateway::RequestGateway;
use fanout_types::{DomainError, Operation, Outcome};
use serde_json::{Value, json};
use tokio::sync::Notify;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{cached, executor, gateway, mount_error, mount_json};

type Read<'a> = Pin<Box<dyn Future<Output = Result<Value, DomainError>> + 'a>>;

/// One `GET issues/<key>` operation per key.
fn reads<'a>(
    gateway: &'a RequestGateway,
    keys: &[&str],
) -> Vec<Operation<String, impl FnOnce() -> Read<'a> + 'a>> {
    keys.iter()
        .map(|key| {
            let path = format!("issues/{key}");
            Operation::new((*key).to_string(), move || -> Read<'a> {
                Box::pin(async move { gateway.read(&path, &[]).await })
            })
        })
        .collect()
}

#[tokio::test]
async fn partial_failures_are_reported_per_key() {
    let server = MockServer::start().await;
    mount_json(&server, "/issues/A-1", json!({"id": "A-1", "title": "first"})).await;
    mount_error(&server, "/issues/A-2", 404, "Issue not found").await;
    mount_json(&server, "/issues/A-3", json!({"id": "A-3", "title": "third"})).await;

    let gateway = gateway(&server, &cached());
    let executor = executor(50, 2);

    let outcomes = executor
        .execute_parallel(reads(&gateway, &["A-1", "A-2", "A-3"]), "issues")
        .await
        .unwrap();

    let keys: Vec<_> = outcomes.iter().map(|o| o.key().as_str()).collect();
    assert_eq!(keys, ["A-1", "A-2", "A-3"]);

    let response = process_outcomes_with(outcomes, |issue| issue["title"].clone()).into_response();
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "summary": {"total": 3, "successful": 2, "failed": 1},
            "successful": [
                {"key": "A-1", "data": "first"},
                {"key": "A-3", "data": "third"}
            ],
            "failed": [
                {"key": "A-2", "error": {"statusCode": 404, "message": "Issue not found"}}
            ]
        })
    );
}

#[tokio::test]
async fn transient_failures_recover_inside_the_call() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    Mock::given(method("GET"))
        .and(path("/issues/FLAKY"))
        .respond_with(move |_: &wiremock::Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(502)
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"id": "FLAKY"}))
            }
        })
        .mount(&server)
        .await;

    let gateway = gateway(&server, &CachePolicy::Disabled);
    let outcomes = executor(50, 5)
        .execute_parallel(reads(&gateway, &["FLAKY"]), "flaky")
        .await
        .unwrap();

    assert_eq!(
        outcomes[0],
        Outcome::Fulfilled {
            key: "FLAKY".to_string(),
            value: json!({"id": "FLAKY"})
        }
    );
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_error_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues/DOWN"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"error": {"message": "maintenance"}})),
        )
        // Call-level attempts only; the executor never retries on top.
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway(&server, &cached());
    let outcomes = executor(50, 5)
        .execute_parallel(reads(&gateway, &["DOWN"]), "down")
        .await
        .unwrap();

    let result = process_outcomes(outcomes);
    assert_eq!(result.failed[0].error, DomainError::new(503, "maintenance"));
}

#[tokio::test]
async fn validation_errors_keep_their_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues/BAD"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Invalid filter",
            "errors": {"state": ["must be open or closed"]}
        })))
        .mount(&server)
        .await;

    let gateway = gateway(&server, &cached());
    let outcomes = executor(50, 5)
        .execute_parallel(reads(&gateway, &["BAD"]), "bad")
        .await
        .unwrap();

    let response = process_outcomes(outcomes).into_response();
    assert_eq!(
        serde_json::to_value(&response.failed[0].error).unwrap(),
        json!({
            "statusCode": 400,
            "message": "Invalid filter",
            "fieldErrors": [{"field": "state", "message": "must be open or closed"}]
        })
    );
}

#[tokio::test]
async fn empty_bodies_become_empty_result_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues/HOLLOW"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_json(&server, "/issues/ZERO", json!(0)).await;

    let gateway = gateway(&server, &cached());
    let outcomes = executor(50, 5)
        .execute_parallel(reads(&gateway, &["HOLLOW", "ZERO"]), "hollow")
        .await
        .unwrap();

    let result = process_outcomes(outcomes);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].key, "HOLLOW");
    assert_eq!(result.failed[0].error, DomainError::empty_result());
    assert!(!result.failed[0].error.is_transport());
    assert_eq!(result.successful[0].data, json!(0));
}

#[tokio::test]
async fn second_batch_is_served_from_cache() {
    let server = MockServer::start().await;
    for key in ["C-1", "C-2"] {
        Mock::given(method("GET"))
            .and(path(format!("/issues/{key}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": key})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let gateway = gateway(&server, &cached());
    let executor = executor(50, 5);

    for _ in 0..2 {
        let outcomes = executor
            .execute_parallel(reads(&gateway, &["C-1", "C-2"]), "cached")
            .await
            .unwrap();
        assert!(outcomes.iter().all(Outcome::is_fulfilled));
    }

    let stats = gateway.cache().stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.entries, 2);
}

#[tokio::test]
async fn oversized_batch_sends_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = gateway(&server, &cached());
    let keys: Vec<String> = (0..51).map(|i| format!("K-{i}")).collect();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();

    let err = executor(50, 5)
        .execute_parallel(reads(&gateway, &key_refs), "too-many")
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::BatchTooLarge { size: 51, max: 50, .. }));
}

#[tokio::test]
async fn slow_calls_do_not_hold_back_fast_ones() {
    let server = MockServer::start().await;
    mount_json(&server, "/issues/SLOW", json!({"id": "SLOW"})).await;
    mount_json(&server, "/issues/FAST", json!({"id": "FAST"})).await;

    let gateway = gateway(&server, &cached());
    let executor = executor(50, 2);
    let release_slow = Notify::new();
    let fast_settled = Notify::new();

    let (gateway, release, settled) = (&gateway, &release_slow, &fast_settled);
    let operations: Vec<_> = ["SLOW", "FAST"]
        .into_iter()
        .map(|key| {
            Operation::new(key, move || async move {
                if key == "SLOW" {
                    release.notified().await;
                }
                let value = gateway.read(&format!("issues/{key}"), &[]).await;
                if key == "FAST" {
                    settled.notify_one();
                }
                value
            })
        })
        .collect();

    let batch = executor.execute_parallel(operations, "mixed");
    let observe = async {
        // SLOW cannot finish before it is released, so FAST got past it.
        settled.notified().await;
        let in_flight = executor.in_flight();
        release.notify_one();
        in_flight
    };
    let (outcomes, in_flight_midway) =
        tokio::time::timeout(Duration::from_secs(10), async { tokio::join!(batch, observe) })
            .await
            .unwrap();

    assert_eq!(in_flight_midway, 1);
    let outcomes = outcomes.unwrap();
    assert_eq!(outcomes[0].key(), &"SLOW");
    assert_eq!(outcomes[1].key(), &"FAST");
    assert!(outcomes.iter().all(Outcome::is_fulfilled));
}
