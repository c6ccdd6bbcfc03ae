//! Job commands.

use anyhow::Result;
use courier_core::{JobState, Outcome, SubscriptionId};
use serde_json::{Value, json};

use super::print_json;
use crate::client::ApiClient;

pub async fn enqueue(client: &ApiClient, subscription: &SubscriptionId, payload: &str) -> Result<()> {
    let payload: Value = serde_json::from_str(payload)?;
    let path = format!("api/v1/subscriptions/{}/jobs", subscription);
    if let Some(job) = client.post(&path, &json!({ "payload": payload })).await? {
        println!("Enqueued job {}", job["id"]);
    }
    Ok(())
}

pub async fn claim(client: &ApiClient, subscription: &SubscriptionId, agent: &str) -> Result<()> {
    let path = format!("api/v1/subscriptions/{}/jobs/claim", subscription);
    match client.post(&path, &json!({ "agent": agent })).await? {
        Some(job) => print_json(&job),
        None => {
            println!("No job available");
            Ok(())
        }
    }
}

pub async fn report(
    client: &ApiClient,
    id: &str,
    outcome: Outcome,
    error: Option<String>,
) -> Result<()> {
    let path = format!("api/v1/jobs/{}/outcome", id);
    let body = json!({ "outcome": outcome, "error": error });
    if let Some(job) = client.post(&path, &body).await? {
        println!("Job {} is {}", job["id"], job["state"]);
    }
    Ok(())
}

pub async fn show(client: &ApiClient, id: &str) -> Result<()> {
    if let Some(job) = client.get(&format!("api/v1/jobs/{}", id)).await? {
        print_json(&job)?;
    }
    Ok(())
}

pub async fn list(
    client: &ApiClient,
    subscription: &SubscriptionId,
    state: Option<JobState>,
    limit: u32,
) -> Result<()> {
    let mut path = format!("api/v1/subscriptions/{}/jobs?limit={}", subscription, limit);
    if let Some(state) = state {
        path.push_str(&format!("&state={}", state));
    }
    let Some(jobs) = client.get(&path).await? else {
        return Ok(());
    };
    let jobs = jobs.as_array().cloned().unwrap_or_default();
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    println!("{:<38} {:<10} {:>8} {:<20}", "ID", "STATE", "SEQ", "CLAIMED BY");
    for job in &jobs {
        println!(
            "{:<38} {:<10} {:>8} {:<20}",
            job["id"].as_str().unwrap_or("-"),
            job["state"].as_str().unwrap_or("-"),
            job["sequence"],
            job["claimed_by"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn pending(client: &ApiClient, subscription: &SubscriptionId) -> Result<()> {
    let path = format!("api/v1/subscriptions/{}/jobs/pending", subscription);
    if let Some(count) = client.get(&path).await? {
        println!("{} pending job(s) in {}", count["pending"], subscription);
    }
    Ok(())
}
