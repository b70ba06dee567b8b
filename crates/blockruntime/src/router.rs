use blockcore::{EventBus, ExecutionEvent, FlowId, Message, NodeId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::config::OverflowPolicy;
use crate::graph::NodeCounters;

/// Delivers node output onto downstream input queues for one run of a flow
pub(crate) struct Router {
    flow_id: FlowId,
    queues: HashMap<NodeId, mpsc::Sender<Message>>,
    policy: OverflowPolicy,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

impl Router {
    pub(crate) fn new(
        flow_id: FlowId,
        queues: HashMap<NodeId, mpsc::Sender<Message>>,
        policy: OverflowPolicy,
        events: Arc<EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            flow_id,
            queues,
            policy,
            events,
            shutdown,
        }
    }

    /// Fan `message` out to every target. Each target gets its own fork,
    /// stamped with the emitting node and the receiving one.
    pub(crate) async fn distribute(
        &self,
        source: &str,
        targets: &[NodeId],
        counters: &NodeCounters,
        message: &Message,
    ) {
        for target in targets {
            let Some(queue) = self.queues.get(target) else {
                tracing::error!(
                    flow_id = %self.flow_id,
                    source_node = %source,
                    target_node = %target,
                    "Target node not found"
                );
                counters.record_dropped();
                continue;
            };

            let mut fork = message.fork();
            fork.source = Some(source.to_string());
            fork.target = Some(target.clone());

            match self.deliver(queue, fork).await {
                Delivery::Sent => {
                    counters.record_emitted();
                    tracing::debug!(
                        flow_id = %self.flow_id,
                        from = %source,
                        to = %target,
                        payload = %message.payload,
                        "Message sent"
                    );
                }
                Delivery::Full => {
                    counters.record_dropped();
                    tracing::warn!(
                        flow_id = %self.flow_id,
                        source_node = %source,
                        target_node = %target,
                        "Target node input queue full, dropping message"
                    );
                    self.events.emit(ExecutionEvent::MessageDropped {
                        flow_id: self.flow_id.clone(),
                        source: source.to_string(),
                        target: target.clone(),
                        timestamp: Utc::now(),
                    });
                }
                Delivery::Closed => {
                    counters.record_dropped();
                    tracing::debug!(
                        flow_id = %self.flow_id,
                        source_node = %source,
                        target_node = %target,
                        "Target node is shutting down, message discarded"
                    );
                }
            }
        }
    }

    async fn deliver(&self, queue: &mpsc::Sender<Message>, message: Message) -> Delivery {
        match self.policy {
            OverflowPolicy::Drop => match queue.try_send(message) {
                Ok(()) => Delivery::Sent,
                Err(TrySendError::Full(_)) => Delivery::Full,
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            },
            OverflowPolicy::Block => {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Delivery::Closed,
                    sent = queue.send(message) => match sent {
                        Ok(()) => Delivery::Sent,
                        Err(_) => Delivery::Closed,
                    },
                }
            }
        }
    }
}
