//! Stream real-time envelopes to stdout.

use anyhow::{Context, Result, bail};
use courier_core::Topic;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::client::ApiClient;

/// WebSocket URL of the real-time endpoint for `base`.
pub fn ws_url(base: &Url, user_id: Option<&str>) -> Result<Url> {
    let mut url = base.join("ws/connect")?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(with_user(url, user_id)),
        other => bail!("unsupported URL scheme {}", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("cannot switch {} to {}", base, scheme))?;
    Ok(with_user(url, user_id))
}

fn with_user(mut url: Url, user_id: Option<&str>) -> Url {
    if let Some(user_id) = user_id {
        url.query_pairs_mut().append_pair("user_id", user_id);
    }
    url
}

pub async fn run(client: &ApiClient, topics: &[Topic], user_id: Option<&str>) -> Result<()> {
    let url = ws_url(client.base(), user_id)?;
    let (socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {}", url))?;
    eprintln!("Connected to {}", url);
    let (mut sink, mut stream) = socket.split();

    for topic in topics {
        let command = json!({ "type": "subscribe", "data": { "topic": topic } });
        sink.send(Message::Text(command.to_string())).await?;
    }

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => print_envelope(&text),
                Some(Ok(Message::Close(_))) | None => {
                    eprintln!("Connection closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("WebSocket error"),
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    Ok(())
}

fn print_envelope(text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(envelope) => {
            let kind = envelope["type"].as_str().unwrap_or("?");
            let topic = envelope["topic"].as_str().unwrap_or("-");
            println!("[{}] {} {}", kind, topic, envelope["data"]);
        }
        Err(_) => println!("{}", text),
    }
}
