//! End-to-end runs of the `fanout` binary against a mock API.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{mount_error, mount_json};

const OVERRIDE_VARS: &[&str] = &[
    "FANOUT_BASE_URL",
    "FANOUT_API_TOKEN",
    "FANOUT_MAX_BATCH_SIZE",
    "FANOUT_MAX_CONCURRENT_REQUESTS",
    "FANOUT_RETRY_ATTEMPTS",
    "FANOUT_CACHE_TTL_SECS",
    "FANOUT_CACHE_ENABLED",
];

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, contents).unwrap();
    path
}

/// Run the binary off the async runtime so the mock server keeps serving.
async fn run(config: &Path, args: &[&str]) -> Output {
    let config = config.to_path_buf();
    let args: Vec<String> = args.iter().map(|s| (*s).to_string()).collect();
    tokio::task::spawn_blocking(move || {
        let mut command = Command::new(env!("CARGO_BIN_EXE_fanout"));
        command
            .args(&args)
            .env("FANOUT_CONFIG", &config)
            .env("RUST_LOG", "off");
        for var in OVERRIDE_VARS {
            command.env_remove(var);
        }
        command.output().unwrap()
    })
    .await
    .unwrap()
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "fanout failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn prints_batch_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/issues/A-1"))
        .and(header("authorization", "Bearer cli-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "A-1"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_error(&server, "/api/issues/A-2", 404, "Issue not found").await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        &format!(
            "[api]\nbase_url = \"{}/api\"\ntoken = \"cli-token\"\n\n[retry]\nattempts = 1\n",
            server.uri()
        ),
    );

    let output = run(&config, &["issues/{key}", "A-1", "A-2"]).await;

    assert_eq!(
        stdout_json(&output),
        json!({
            "summary": {"total": 2, "successful": 1, "failed": 1},
            "successful": [{"key": "A-1", "data": {"id": "A-1"}}],
            "failed": [{"key": "A-2", "error": {"statusCode": 404, "message": "Issue not found"}}]
        })
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn keys_are_encoded_into_the_path() {
    let server = MockServer::start().await;
    mount_json(&server, "/users/a%20b", json!({"name": "a b"})).await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, &format!("[api]\nbase_url = \"{}\"\n", server.uri()));

    let output = run(&config, &["/users/{key}", "a b"]).await;
    let report = stdout_json(&output);
    assert_eq!(report["successful"][0]["data"], json!({"name": "a b"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_batch_fails_without_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        &format!(
            "[executor]\nmax_batch_size = 2\n\n[api]\nbase_url = \"{}\"\n",
            server.uri()
        ),
    );

    let output = run(&config, &["/items/{key}", "1", "2", "3"]).await;
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("more than the maximum of 2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_base_url_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "[executor]\nmax_batch_size = 5\n");

    let output = run(&config, &["/items/{key}", "1"]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("api.base_url"));
}

#[tokio::test(flavor = "multi_thread")]
async fn usage_errors_exit_with_status_two() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "");

    let output = run(&config, &["/items/no-placeholder", "1"]).await;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage: fanout"));

    let help = run(&config, &["--help"]).await;
    assert!(help.status.success());
    assert!(String::from_utf8_lossy(&help.stdout).contains("{key}"));
}
