//! CLI command implementations.

pub mod jobs;
pub mod listen;

use anyhow::{Context, Result, bail};
use courier_config::ServiceConfig;
use courier_core::Topic;
use serde_json::{Value, json};

use crate::client::ApiClient;

/// Print a JSON response body.
pub(crate) fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn broadcast(
    client: &ApiClient,
    topic: Option<Topic>,
    user_id: Option<String>,
    message: &str,
) -> Result<()> {
    // Messages that are not JSON are sent as plain strings.
    let message = serde_json::from_str::<Value>(message).unwrap_or_else(|_| json!(message));
    let body = json!({ "topic": topic, "user_id": user_id, "message": message });
    let response = client
        .post("api/v1/realtime/broadcast", &body)
        .await?
        .context("empty response from broadcast")?;
    println!("Delivered to {} connection(s)", response["recipients"]);
    Ok(())
}

pub async fn stats(client: &ApiClient) -> Result<()> {
    if let Some(stats) = client.get("api/v1/realtime/stats").await? {
        print_json(&stats)?;
    }
    Ok(())
}

pub fn validate(path: &str) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let config = match ServiceConfig::parse(&content).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => bail!("Configuration error: {}", e),
    };
    println!("Configuration is valid");
    println!("  bind:    {}", config.server.bind);
    println!("  store:   {:?}", config.store);
    match config.queue.reclaim_after {
        Some(after) => println!("  reclaim: after {}s", after.as_secs()),
        None => println!("  reclaim: disabled"),
    }
    Ok(())
}
