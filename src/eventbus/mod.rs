//! Event transport abstraction for order-lifecycle events.
//!
//! `EventSource` is the consuming side (at-least-once, possibly duplicated, not ordered).
//! `EventPublisher` carries `WalletSettled` notifications downstream.

use crate::domain::{OrderEvent, WalletSettled};
use async_trait::async_trait;
use std::fmt;
use tracing::info;

pub mod channel;
pub mod mock;
pub mod webhook;

pub use channel::{event_channel, ChannelEventSource, EventSender};
pub use mock::{MockEventSource, RecordingPublisher};
pub use webhook::WebhookPublisher;

/// One delivery of an event. Redeliveries of the same event may carry a new id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub event: OrderEvent,
}

/// Source of inbound order events.
///
/// Every delivery handed out by `next` must be settled with exactly one of
/// `ack`, `nack` or `dead_letter`.
#[async_trait]
pub trait EventSource: Send + Sync + fmt::Debug {
    /// Next delivery, or `None` once the source is exhausted or closed.
    async fn next(&self) -> Result<Option<Delivery>, EventBusError>;

    /// The delivery was handled (applied or a duplicate). It must not be redelivered.
    async fn ack(&self, delivery_id: &str) -> Result<(), EventBusError>;

    /// Handling failed transiently. The whole event should be redelivered.
    async fn nack(&self, delivery_id: &str) -> Result<(), EventBusError>;

    /// Handling can never succeed. Defaults to acknowledging the delivery.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), EventBusError> {
        info!(delivery_id = %delivery.id, reason, "Dead-lettering delivery");
        self.ack(&delivery.id).await
    }
}

/// Sink for settled-wallet notifications.
#[async_trait]
pub trait EventPublisher: Send + Sync + fmt::Debug {
    async fn publish_settled(&self, event: &WalletSettled) -> Result<(), EventBusError>;
}

/// Publisher used when no downstream sink is configured.
#[derive(Debug, Clone, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish_settled(&self, event: &WalletSettled) -> Result<(), EventBusError> {
        info!(
            event_id = %event.event_id,
            order_id = %event.order_id,
            wallet_id = %event.wallet_id,
            side = %event.side,
            total_amount = %event.total_amount,
            "WalletSettled"
        );
        Ok(())
    }
}

/// Error type for event transport operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Network error (e.g., connection refused, timeout)
    NetworkError(String),
    /// Non-success HTTP status from a sink
    HttpError { status: u16, message: String },
    /// The transport has been shut down
    Closed,
    /// Delivery id was never handed out or was already settled
    UnknownDelivery(String),
    /// Other error
    Other(String),
}

impl fmt::Display for EventBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventBusError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            EventBusError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            EventBusError::Closed => write!(f, "Event bus closed"),
            EventBusError::UnknownDelivery(id) => write!(f, "Unknown delivery: {}", id),
            EventBusError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for EventBusError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus_error_display() {
        let err = EventBusError::HttpError {
            status: 503,
            message: "Server error".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: Server error");
        assert_eq!(EventBusError::Closed.to_string(), "Event bus closed");
        assert_eq!(
            EventBusError::UnknownDelivery("d-1".into()).to_string(),
            "Unknown delivery: d-1"
        );
    }
}
