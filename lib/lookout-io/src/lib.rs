//! Outbound HTTP delivery to the analytics intake endpoint.
#![deny(warnings)]
#![deny(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header;
use lookout_core::context::BuildContext;
use lookout_core::data_model::event::TelemetryEvent;
use lookout_core::sender::{EventSender, SendError};
use lookout_error::{generic_error, GenericError};
use tracing::debug;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the analytics intake endpoint.
///
/// Every request POSTs a JSON array of event envelopes and carries the bearer token the
/// build-start handshake stored in the shared [`BuildContext`]. Requests without a token fail
/// before anything hits the network. No retries: a failed request means the batch is lost, which
/// the caller records in the usage counters.
pub struct IntakeClient {
    client: reqwest::Client,
    batch_url: String,
    context: Arc<BuildContext>,
}

impl IntakeClient {
    /// Creates a new `IntakeClient` POSTing to the given batch URL.
    ///
    /// # Errors
    ///
    /// If the underlying HTTP client cannot be constructed, an error is returned.
    pub fn new(batch_url: impl Into<String>, context: Arc<BuildContext>) -> Result<Self, GenericError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            batch_url: batch_url.into(),
            context,
        })
    }

    /// URL that event batches are POSTed to.
    pub fn batch_url(&self) -> &str {
        &self.batch_url
    }
}

#[async_trait]
impl EventSender for IntakeClient {
    async fn send_events(&self, events: &[TelemetryEvent]) -> Result<(), SendError> {
        let token = match self.context.auth_token() {
            Some(token) => token,
            None => return Err(SendError::AuthMissing),
        };

        let response = self
            .client
            .post(&self.batch_url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .json(events)
            .send()
            .await
            .map_err(|e| SendError::Delivery { source: e.into() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Delivery {
                source: generic_error!("intake returned {}: {}", status, body),
            });
        }

        debug!(%status, events = events.len(), "Event batch accepted by intake.");
        Ok(())
    }
}
