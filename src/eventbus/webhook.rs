//! HTTP webhook publisher for `WalletSettled`.

use super::{EventBusError, EventPublisher};
use crate::domain::WalletSettled;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

/// POSTs each settled event as JSON to a fixed URL.
///
/// `publish_settled` hands the event to a background task and returns at once, so a
/// slow or unreachable sink never delays a settlement. Transport errors, 429 and 5xx
/// responses are retried with exponential backoff for up to `max_elapsed`; other
/// non-success statuses fail immediately. A delivery that gives up is logged.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: Client,
    url: String,
    max_elapsed: Duration,
}

impl WebhookPublisher {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
            max_elapsed: Duration::from_secs(30),
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Deliver one event, retrying until it lands or `max_elapsed` runs out.
    pub async fn deliver(&self, event: &WalletSettled) -> Result<(), EventBusError> {
        debug!(url = %self.url, order_id = %event.order_id, "Publishing WalletSettled");
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(event)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(EventBusError::NetworkError(e.to_string())))?;

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(backoff::Error::transient(EventBusError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(EventBusError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish_settled(&self, event: &WalletSettled) -> Result<(), EventBusError> {
        let publisher = self.clone();
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.deliver(&event).await {
                error!(
                    url = %publisher.url,
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    error = %e,
                    "Giving up on WalletSettled delivery"
                );
            }
        });
        Ok(())
    }
}
