//! Webhook Relay Client
//!
//! Tools perform their side effects by POSTing JSON to a relay collaborator.
//! The relay's response is only used for its status; the body is parsed as
//! JSON when possible and otherwise dropped. Every failure mode, including a
//! missing destination and a timeout, is folded into a [`WebhookOutcome`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Status reported when no relay destination is configured for a tool.
pub const MISSING_DESTINATION_STATUS: u16 = 500;

/// Status reported when the relay could not be reached at all.
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

/// The result of a single relay call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookOutcome {
    pub ok: bool,
    pub status: u16,
    pub body: Option<Value>,
    pub error: Option<String>,
}

impl WebhookOutcome {
    pub fn success(status: u16, body: Option<Value>) -> Self {
        Self {
            ok: true,
            status,
            body,
            error: None,
        }
    }

    pub fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            body: None,
            error: Some(error.into()),
        }
    }

    /// The most specific description of a failure: the captured error, else
    /// the relay's body, else a generic status line.
    pub fn detail(&self) -> Value {
        if let Some(error) = &self.error {
            Value::String(error.clone())
        } else if let Some(body) = &self.body {
            body.clone()
        } else {
            Value::String(format!("webhook responded with status {}", self.status))
        }
    }
}

/// A relay collaborator that performs a side effect for a tool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Webhook: Send + Sync {
    /// Delivers `payload` and reports what happened. Never fails.
    async fn post(&self, payload: &Value) -> WebhookOutcome;
}

/// A [`Webhook`] that POSTs JSON to a configured URL.
pub struct HttpWebhook {
    client: reqwest::Client,
    url: Option<String>,
    timeout: Duration,
}

impl HttpWebhook {
    /// Creates a relay client.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client.
    /// * `url` - Relay destination; `None` makes every call fail fast.
    /// * `timeout` - Upper bound on the whole request, body included.
    pub fn new(client: reqwest::Client, url: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }

    /// A relay with no destination.
    pub fn unconfigured() -> Self {
        Self::new(reqwest::Client::new(), None, Duration::from_secs(1))
    }
}

#[async_trait]
impl Webhook for HttpWebhook {
    async fn post(&self, payload: &Value) -> WebhookOutcome {
        let Some(url) = self.url.as_deref() else {
            warn!("Webhook destination is not configured");
            return WebhookOutcome::failure(MISSING_DESTINATION_STATUS, "Missing webhook URL");
        };

        let request = async {
            let response = self.client.post(url).json(payload).send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        match tokio::time::timeout(self.timeout, request).await {
            Err(_) => {
                warn!(%url, timeout_ms = self.timeout.as_millis() as u64, "Webhook timed out");
                WebhookOutcome::failure(
                    TRANSPORT_FAILURE_STATUS,
                    format!("webhook timed out after {}ms", self.timeout.as_millis()),
                )
            }
            Ok(Err(e)) => {
                warn!(%url, error = %e, "Webhook request failed");
                let status = e
                    .status()
                    .map(|s| s.as_u16())
                    .unwrap_or(TRANSPORT_FAILURE_STATUS);
                WebhookOutcome::failure(status, e.to_string())
            }
            Ok(Ok((status, text))) => {
                let body = serde_json::from_str::<Value>(&text).ok();
                debug!(%url, status = status.as_u16(), parsed_body = body.is_some(), "Webhook responded");
                WebhookOutcome {
                    ok: status.is_success(),
                    status: status.as_u16(),
                    body,
                    error: None,
                }
            }
        }
    }
}
