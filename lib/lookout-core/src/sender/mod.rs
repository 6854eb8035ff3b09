//! Outbound delivery interfaces.

use async_trait::async_trait;
use lookout_error::GenericError;
use snafu::Snafu;

use crate::data_model::event::TelemetryEvent;

/// An error encountered while delivering events to the intake endpoint.
#[derive(Debug, Snafu)]
pub enum SendError {
    /// No bearer token was available for the request.
    #[snafu(display("No bearer token available; the build-start handshake has not completed."))]
    AuthMissing,

    /// The request could not be delivered, or the intake endpoint rejected it.
    #[snafu(display("Failed to deliver events to the intake endpoint."))]
    Delivery {
        /// Error source.
        source: GenericError,
    },
}

/// Sends event envelopes to the analytics intake endpoint.
///
/// Delivery is best-effort and at-most-once: implementations do not retry, and a returned error
/// means every event in the request should be considered lost.
#[async_trait]
pub trait EventSender: Send + Sync {
    /// Sends the given events in one request.
    async fn send_events(&self, events: &[TelemetryEvent]) -> Result<(), SendError>;
}
