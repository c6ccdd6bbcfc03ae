//! Thin HTTP client for the Courier API.

use anyhow::{Context, Result, anyhow};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self> {
        let mut base = Url::parse(api_url).with_context(|| format!("invalid API URL {}", api_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve an API path such as `api/v1/jobs/..` against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid request path {}", path))
    }

    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.send(self.request(Method::GET, path)?).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Option<Value>> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.url(path)?;
        debug!(%method, %url, "API request");
        let mut request = self.http.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    /// Send a request. `204 No Content` yields `None`.
    async fn send(&self, request: RequestBuilder) -> Result<Option<Value>> {
        let response = request.send().await.context("request to API failed")?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await.context("reading API response")?;
        if !status.is_success() {
            return Err(anyhow!("{} ({})", error_message(&body), status));
        }
        let value = serde_json::from_str(&body).context("API returned invalid JSON")?;
        Ok(Some(value))
    }
}

/// Extract the message of an `{"error": {"code", "message"}}` body, falling
/// back to the raw text.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            let code = error.get("code")?.as_str()?;
            let message = error.get("message")?.as_str()?;
            Some(format!("{}: {}", code, message))
        })
        .unwrap_or_else(|| body.trim().to_string())
}
