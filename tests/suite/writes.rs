//! Batched writes: idempotency, invalidation and terminal failures.

use serde_json::{Value, json};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fanout_batch::process_outcomes;
use fanout_types::{DomainError, Operation};

use crate::common::{cached, executor, gateway, mount_json};

#[tokio::test]
async fn batch_updates_invalidate_cached_reads() {
    let server = MockServer::start().await;
    for key in ["1", "2"] {
        Mock::given(method("GET"))
            .and(path(format!("/tasks/{key}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": key})))
            // Initial read, then one re-read after the update.
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(format!("/tasks/{key}")))
            .and(header_exists("idempotency-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": key, "done": true})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let gateway = gateway(&server, &cached());
    let executor = executor(10, 2);
    let gateway = &gateway;

    for key in ["1", "2"] {
        gateway.read(&format!("tasks/{key}"), &[]).await.unwrap();
    }

    let body = json!({"done": true});
    let body = &body;
    let updates: Vec<_> = ["1", "2"]
        .into_iter()
        .map(|key| {
            Operation::new(key, move || async move {
                gateway.update(&format!("tasks/{key}"), body).await
            })
        })
        .collect();
    let result = process_outcomes(executor.execute_parallel(updates, "complete").await.unwrap());
    assert_eq!(result.summary().successful, 2);

    // Both entries were dropped, so these go to the server again.
    for key in ["1", "2"] {
        gateway.read(&format!("tasks/{key}"), &[]).await.unwrap();
    }
}

#[tokio::test]
async fn deletes_report_unit_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/tasks/9"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/tasks/10"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "forbidden"})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server, &cached());
    let gateway = &gateway;
    let deletes: Vec<_> = ["9", "10"]
        .into_iter()
        .map(|key| {
            Operation::new(key, move || async move {
                gateway.delete(&format!("tasks/{key}")).await
            })
        })
        .collect();

    let outcomes = executor(10, 2)
        .execute_parallel(deletes, "cleanup")
        .await
        .unwrap();
    let result = process_outcomes(outcomes);

    // `()` is an acknowledgement, never an empty result.
    assert_eq!(result.successful.len(), 1);
    assert_eq!(result.successful[0].key, "9");
    assert_eq!(result.failed[0].key, "10");
    assert_eq!(result.failed[0].error, DomainError::new(403, "forbidden"));
}

#[tokio::test]
async fn creates_are_not_served_from_cache() {
    let server = MockServer::start().await;
    mount_json(&server, "/tasks", json!([])).await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 3})))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server, &cached());
    assert_eq!(gateway.read("tasks", &[]).await.unwrap(), json!([]));

    let first: Value = gateway.create("tasks", &json!({"title": "a"})).await.unwrap();
    let second: Value = gateway.create("tasks", &json!({"title": "a"})).await.unwrap();
    assert_eq!(first, second);
    // The collection read was invalidated by the create.
    assert_eq!(gateway.cache().stats().entries, 0);
}
