//! Shared test utilities and fixtures
//!
//! Builds gateways and executors wired the way the binary wires them, but
//! with millisecond retry delays so failing calls don't slow the suite.

#![allow(dead_code)]

use std::time::Duration;

use fanout_batch::BatchExecutor;
use fanout_cache::{Cache, CachePolicy, CacheSettings};
use fanout_gateway::{GatewaySettings, RequestGateway, RetryConfig, RetryStrategy};
use fanout_types::ExecutorConfig;
use serde_json::Value;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Retry config with real semantics and tiny delays.
pub fn fast_retry() -> RetryStrategy {
    RetryStrategy::Exponential(RetryConfig {
        max_attempts: 3,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryConfig::default()
    })
}

pub fn cached() -> CachePolicy {
    CachePolicy::Enabled(CacheSettings::default())
}

pub fn gateway(server: &MockServer, cache: &CachePolicy) -> RequestGateway {
    let settings = GatewaySettings::new(Url::parse(&server.uri()).unwrap());
    RequestGateway::new(&settings, fast_retry(), Cache::from_policy(cache)).unwrap()
}

pub fn executor(max_batch_size: usize, max_concurrent: usize) -> BatchExecutor {
    BatchExecutor::new(ExecutorConfig::new(max_batch_size, max_concurrent).unwrap())
}

/// Mount `GET <route>` returning `body` with status 200.
pub async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mount `GET <route>` returning `status` with a `{"message": ...}` body.
pub async fn mount_error(server: &MockServer, route: &str, status: u16, message: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(status).set_body_json(serde_json::json!({ "message": message })),
        )
        .mount(server)
        .await;
}
