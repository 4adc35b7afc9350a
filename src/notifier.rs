//! Outbound text notifications. Delivery is best-effort: failures are logged
//! and reported as `false`, never raised.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// True only when the endpoint accepted the message (2xx).
    async fn send(&self, text: &str) -> bool;
}

/// POSTs `{"content": text}` to one webhook URL (Discord-compatible).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) -> bool {
        let Some(url) = self.url.as_deref() else {
            debug!("Webhook not configured; dropping notification");
            return false;
        };
        match self
            .client
            .post(url)
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("Webhook rejected notification: HTTP {}", resp.status());
                false
            }
            Err(e) => {
                warn!("Webhook delivery failed: {e}");
                false
            }
        }
    }
}
