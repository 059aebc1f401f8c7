//! In-process event bus over a tokio mpsc channel.
//!
//! Used by the HTTP enqueue route: producers push events with [`EventSender`] and the
//! intake loop drains them from [`ChannelEventSource`]. Nacked deliveries are held back
//! for `redelivery_delay` and then handed out again ahead of new events.

use super::{Delivery, EventBusError, EventSource};
use crate::domain::OrderEvent;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Create a bounded channel bus.
pub fn event_channel(capacity: usize, redelivery_delay: Duration) -> (EventSender, ChannelEventSource) {
    let (tx, rx) = mpsc::channel(capacity);
    let sender = EventSender {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
    };
    let source = ChannelEventSource {
        rx: tokio::sync::Mutex::new(rx),
        pending: Mutex::new(PendingState::default()),
        redelivery_delay,
    };
    (sender, source)
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Delivery>,
    next_id: Arc<AtomicU64>,
}

impl EventSender {
    /// Enqueue an event. Returns the delivery id assigned to it.
    pub async fn send(&self, event: OrderEvent) -> Result<String, EventBusError> {
        let id = format!("ch-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tx
            .send(Delivery {
                id: id.clone(),
                event,
            })
            .await
            .map_err(|_| EventBusError::Closed)?;
        Ok(id)
    }
}

#[derive(Debug)]
pub struct ChannelEventSource {
    rx: tokio::sync::Mutex<mpsc::Receiver<Delivery>>,
    pending: Mutex<PendingState>,
    redelivery_delay: Duration,
}

#[derive(Debug, Default)]
struct PendingState {
    in_flight: HashMap<String, Delivery>,
    redeliveries: VecDeque<(Instant, Delivery)>,
}

impl ChannelEventSource {
    fn pending(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_redelivery(&self) -> Option<(Instant, Delivery)> {
        self.pending().redeliveries.pop_front()
    }

    fn mark_in_flight(&self, delivery: &Delivery) {
        self.pending()
            .in_flight
            .insert(delivery.id.clone(), delivery.clone());
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next(&self) -> Result<Option<Delivery>, EventBusError> {
        // peek before sleeping so a cancelled wait loses nothing
        let due = self.pending().redeliveries.front().map(|(due, _)| *due);
        if let Some(due) = due {
            tokio::time::sleep_until(due).await;
            if let Some((_, delivery)) = self.take_redelivery() {
                self.mark_in_flight(&delivery);
                return Ok(Some(delivery));
            }
        }

        let received = self.rx.lock().await.recv().await;
        match received {
            Some(delivery) => {
                self.mark_in_flight(&delivery);
                Ok(Some(delivery))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), EventBusError> {
        match self.pending().in_flight.remove(delivery_id) {
            Some(_) => Ok(()),
            None => Err(EventBusError::UnknownDelivery(delivery_id.to_string())),
        }
    }

    async fn nack(&self, delivery_id: &str) -> Result<(), EventBusError> {
        let mut pending = self.pending();
        let Some(delivery) = pending.in_flight.remove(delivery_id) else {
            return Err(EventBusError::UnknownDelivery(delivery_id.to_string()));
        };
        let due = Instant::now() + self.redelivery_delay;
        pending.redeliveries.push_back((due, delivery));
        Ok(())
    }
}
