//! fanout CLI - run one batch of reads and print the result as JSON.
//!
//! ```text
//! main() -> FanoutConfig::load() -> resolve() -> RequestGateway + BatchExecutor
//!                                                       |
//!                                                       v
//!                             execute_parallel(reads) -> process_outcomes -> stdout
//! ```
//!
//! Logs go to stderr (`RUST_LOG`, default `warn`) so stdout only ever carries
//! the JSON report. Item-level failures are part of the report and do not
//! change the exit status; configuration and usage errors do.

use std::env;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::form_urlencoded;

use fanout_batch::{BatchExecutor, process_outcomes};
use fanout_cache::Cache;
use fanout_config::FanoutConfig;
use fanout_gateway::RequestGateway;
use fanout_types::Operation;

const KEY_PLACEHOLDER: &str = "{key}";

const USAGE: &str = "\
Usage: fanout <path-template> <key>...
       fanout <path-template> -        (read keys from stdin, one per line)

Fetches <path-template> once per key, with {key} replaced by the
percent-encoded key, and prints a JSON report of successes and failures.

Configuration: $FANOUT_CONFIG or ~/.fanout/config.toml; FANOUT_* variables
override file values (FANOUT_BASE_URL, FANOUT_API_TOKEN, ...).";

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Run { template: String, keys: KeySource },
}

#[derive(Debug, PartialEq, Eq)]
enum KeySource {
    Args(Vec<String>),
    Stdin,
}

fn parse_args<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(template) = args.next() else {
        return Err("missing path template".to_string());
    };
    if template == "-h" || template == "--help" {
        return Ok(Command::Help);
    }
    if !template.contains(KEY_PLACEHOLDER) {
        return Err(format!("path template must contain {KEY_PLACEHOLDER}"));
    }

    let rest: Vec<String> = args.collect();
    let keys = match rest.as_slice() {
        [] => return Err("no keys given".to_string()),
        [only] if only == "-" => KeySource::Stdin,
        _ => KeySource::Args(rest),
    };
    Ok(Command::Run { template, keys })
}

fn read_keys(reader: impl BufRead) -> io::Result<Vec<String>> {
    let mut keys = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let key = line.trim();
        if !key.is_empty() {
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}

/// Substitute `key` into `template`, percent-encoding it as one path segment.
fn expand_template(template: &str, key: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
    // byte_serialize writes spaces as '+' and a literal '+' as "%2B".
    template.replace(KEY_PLACEHOLDER, &encoded.replace('+', "%20"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let (template, keys) = match parse_args(env::args().skip(1)) {
        Ok(Command::Help) => {
            println!("{USAGE}");
            return Ok(ExitCode::SUCCESS);
        }
        Ok(Command::Run { template, keys }) => (template, keys),
        Err(message) => {
            eprintln!("fanout: {message}\n\n{USAGE}");
            return Ok(ExitCode::from(2));
        }
    };

    let keys = match keys {
        KeySource::Args(keys) => keys,
        KeySource::Stdin => read_keys(io::stdin().lock()).context("failed to read keys from stdin")?,
    };

    let resolved = FanoutConfig::load()?.resolve()?;
    tracing::debug!(?resolved, "Configuration resolved");

    let gateway = RequestGateway::new(
        &resolved.gateway,
        resolved.retry,
        Cache::from_policy(&resolved.cache),
    )?;
    let executor = BatchExecutor::new(resolved.executor);

    let gateway = &gateway;
    let operations: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let path = expand_template(&template, &key);
            Operation::new(key, move || async move { gateway.read(&path, &[]).await })
        })
        .collect();

    let outcomes = executor.execute_parallel(operations, &template).await?;
    let response = process_outcomes(outcomes).into_response();

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &response)?;
    writeln!(stdout)?;

    Ok(ExitCode::SUCCESS)
}
