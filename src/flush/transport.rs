use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::models::{FlushPayload, FlushResponse};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Outcome of a delivery attempt. `confirmed` distinguishes an acknowledged
/// 2xx response from a best-effort hand-off whose fate is unknown; only
/// confirmed deliveries may clear the local backup.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub session_id: Option<String>,
    pub confirmed: bool,
}

/// Capability for shipping one flush payload to the collector.
pub trait DeliveryTransport: Send + Sync {
    fn deliver(
        &self,
        payload: FlushPayload,
    ) -> impl Future<Output = Result<DeliveryReceipt>> + Send;
}

/// Awaited HTTP POST with a timeout. Any non-2xx status is a failure.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build collector HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, payload: FlushPayload) -> Result<DeliveryReceipt> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("collector request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("collector returned {status}");
        }

        let body: FlushResponse = response
            .json()
            .await
            .context("failed to parse collector response")?;

        Ok(DeliveryReceipt {
            session_id: Some(body.session_id),
            confirmed: true,
        })
    }
}

/// Fire-and-forget transport for the final flush: the request is handed off
/// to a detached task and never awaited, so it cannot block shutdown. Fails
/// only when the payload cannot be encoded for hand-off.
#[derive(Clone)]
pub struct BeaconTransport {
    client: Client,
    endpoint: String,
}

impl BeaconTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build beacon HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl DeliveryTransport for BeaconTransport {
    async fn deliver(&self, payload: FlushPayload) -> Result<DeliveryReceipt> {
        let body = serde_json::to_vec(&payload).context("failed to encode beacon payload")?;
        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        tokio::spawn(async move {
            if let Err(err) = request.send().await {
                log_warn!("beacon delivery failed: {err}");
            }
        });

        Ok(DeliveryReceipt {
            session_id: None,
            confirmed: false,
        })
    }
}
