//! In-memory event bus for tests without a broker.

use super::{Delivery, EventBusError, EventPublisher, EventSource};
use crate::domain::{OrderEvent, WalletSettled};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const DEFAULT_REDELIVERY_LIMIT: usize = 3;

/// Mock source that replays queued events and redelivers nacked ones.
///
/// A nacked delivery goes back to the end of the queue until it has been
/// nacked `redelivery_limit` times, after which it is dropped.
#[derive(Debug)]
pub struct MockEventSource {
    state: Mutex<MockState>,
    redelivery_limit: usize,
}

#[derive(Debug, Default)]
struct MockState {
    queue: VecDeque<Delivery>,
    in_flight: HashMap<String, Delivery>,
    nack_counts: HashMap<String, usize>,
    acked: Vec<String>,
    nacked: Vec<String>,
    dead_lettered: Vec<String>,
}

impl MockEventSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            redelivery_limit: DEFAULT_REDELIVERY_LIMIT,
        }
    }

    /// Queue an event under the given delivery id.
    pub fn with_event(self, id: &str, event: OrderEvent) -> Self {
        self.push(id, event);
        self
    }

    pub fn with_redelivery_limit(mut self, limit: usize) -> Self {
        self.redelivery_limit = limit;
        self
    }

    pub fn push(&self, id: &str, event: OrderEvent) {
        let mut state = self.lock();
        state.queue.push_back(Delivery {
            id: id.to_string(),
            event,
        });
    }

    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    pub fn nacked(&self) -> Vec<String> {
        self.lock().nacked.clone()
    }

    pub fn dead_lettered(&self) -> Vec<String> {
        self.lock().dead_lettered.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // a poisoned lock only means a test thread panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn next(&self) -> Result<Option<Delivery>, EventBusError> {
        let mut state = self.lock();
        let Some(delivery) = state.queue.pop_front() else {
            return Ok(None);
        };
        state
            .in_flight
            .insert(delivery.id.clone(), delivery.clone());
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), EventBusError> {
        let mut state = self.lock();
        if state.in_flight.remove(delivery_id).is_none() {
            return Err(EventBusError::UnknownDelivery(delivery_id.to_string()));
        }
        state.acked.push(delivery_id.to_string());
        Ok(())
    }

    async fn nack(&self, delivery_id: &str) -> Result<(), EventBusError> {
        let mut state = self.lock();
        let Some(delivery) = state.in_flight.remove(delivery_id) else {
            return Err(EventBusError::UnknownDelivery(delivery_id.to_string()));
        };
        state.nacked.push(delivery_id.to_string());

        let count = {
            let count = state
                .nack_counts
                .entry(delivery_id.to_string())
                .or_insert(0);
            *count += 1;
            *count
        };
        if count < self.redelivery_limit {
            state.queue.push_back(delivery);
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, _reason: &str) -> Result<(), EventBusError> {
        let mut state = self.lock();
        if state.in_flight.remove(&delivery.id).is_none() {
            return Err(EventBusError::UnknownDelivery(delivery.id.clone()));
        }
        state.dead_lettered.push(delivery.id.clone());
        Ok(())
    }
}

/// Publisher that keeps every event it is given.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<WalletSettled>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every publish fails.
    pub fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn published(&self) -> Vec<WalletSettled> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_settled(&self, event: &WalletSettled) -> Result<(), EventBusError> {
        if self.fail {
            return Err(EventBusError::NetworkError("sink unavailable".to_string()));
        }
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}
