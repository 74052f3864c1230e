//! In-process event bus.
//!
//! Every published envelope goes onto a single broadcast channel. Each
//! subscription gets a forwarding task that keeps envelopes for its topic
//! and reports lag on the error channel.

use anyhow::Result;
use async_trait::async_trait;
use kiln_events::{EventEnvelope, EventError, MicroVmEvent};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::ports::{EventService, Subscription};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;
const ERROR_CAPACITY: usize = 16;

/// [`EventService`] on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastEventService {
    tx: broadcast::Sender<EventEnvelope>,
    capacity: usize,
}

impl Default for BroadcastEventService {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl BroadcastEventService {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventService for BroadcastEventService {
    async fn publish(&self, topic: &str, event: MicroVmEvent) -> Result<()> {
        let envelope = EventEnvelope::new(topic, event);
        debug!(
            topic = %envelope.topic,
            event_type = envelope.event.event_type(),
            namespace = %envelope.namespace,
            "Publishing event"
        );

        // No subscribers is not an error; resync repairs anything missed.
        if self.tx.send(envelope).is_err() {
            debug!(topic = %topic, "No subscribers for event");
        }
        Ok(())
    }

    async fn subscribe_topic(&self, topic: &str) -> Result<Subscription> {
        let mut rx = self.tx.subscribe();
        let (events_tx, events_rx) = mpsc::channel(self.capacity);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CAPACITY);
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    received = rx.recv() => received,
                    _ = events_tx.closed() => break,
                };

                match received {
                    Ok(envelope) if envelope.topic == topic => {
                        if events_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "Subscriber lagged");
                        let _ = errors_tx.try_send(EventError::Lagged {
                            topic: topic.clone(),
                            skipped,
                        });
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = errors_tx.try_send(EventError::TopicClosed(topic.clone()));
                        break;
                    }
                }
            }
            debug!(topic = %topic, "Subscription ended");
        });

        Ok(Subscription {
            events: events_rx,
            errors: errors_rx,
        })
    }
}
