use blockcore::{
    Block, BlockContext, BlockError, BlockGroup, EventBus, ExecutionEvent, FlowId, Message,
    NodeId, NodeState, Properties, Value,
};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::graph::NodeCounters;
use crate::router::Router;

/// Manual firing request for an input node
#[derive(Debug, Clone)]
pub(crate) struct Trigger {
    /// Replaces the payload of every message this firing produces
    pub(crate) payload: Option<Value>,
}

/// What a worker hands back when it exits
pub(crate) struct WorkerParts {
    pub(crate) node_id: NodeId,
    pub(crate) block: Box<dyn Block>,
    pub(crate) inbox: mpsc::Receiver<Message>,
}

/// One node's task for the lifetime of a run
pub(crate) struct NodeWorker {
    pub(crate) flow_id: FlowId,
    pub(crate) node_id: NodeId,
    pub(crate) group: BlockGroup,
    pub(crate) block: Box<dyn Block>,
    pub(crate) properties: Arc<Properties>,
    pub(crate) inbox: mpsc::Receiver<Message>,
    pub(crate) triggers: Option<mpsc::Receiver<Trigger>>,
    /// Automatic firing period; `None` fires on manual triggers only
    pub(crate) interval: Option<Duration>,
    pub(crate) outputs: Arc<[NodeId]>,
    pub(crate) router: Arc<Router>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) state: Arc<RwLock<NodeState>>,
    pub(crate) counters: Arc<NodeCounters>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) timeout: Option<Duration>,
}

impl NodeWorker {
    pub(crate) async fn run(mut self) -> WorkerParts {
        tracing::debug!(
            flow_id = %self.flow_id,
            node_id = %self.node_id,
            block_group = %self.group,
            "Starting node"
        );

        match self.group {
            BlockGroup::Input => self.run_input().await,
            BlockGroup::Propagation => self.run_intake(true).await,
            BlockGroup::Action => self.run_intake(false).await,
        }

        tracing::debug!(flow_id = %self.flow_id, node_id = %self.node_id, "Node finished");

        WorkerParts {
            node_id: self.node_id,
            block: self.block,
            inbox: self.inbox,
        }
    }

    /// Fire on every tick and on every manual trigger until shutdown
    async fn run_input(&mut self) {
        let shutdown = self.shutdown.clone();
        let mut triggers = self.triggers.take();
        let mut ticker = self.interval.map(|period| {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = next_tick(&mut ticker) => self.fire(None).await,
                trigger = next_trigger(&mut triggers) => match trigger {
                    Some(trigger) => self.fire(trigger.payload).await,
                    None => triggers = None,
                },
            }
        }
    }

    async fn fire(&mut self, payload: Option<Value>) {
        let Some(messages) = self.invoke(None).await else {
            return;
        };
        for mut message in messages {
            if let Some(payload) = &payload {
                message.payload = payload.clone();
            }
            self.forward(&message).await;
        }
    }

    /// Take one message at a time off the input queue until shutdown
    async fn run_intake(&mut self, forward: bool) {
        let shutdown = self.shutdown.clone();

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.inbox.recv() => match received {
                    Some(message) => message,
                    None => break,
                },
            };
            self.counters.record_received();

            let Some(messages) = self.invoke(Some(message)).await else {
                continue;
            };

            if !forward {
                if !messages.is_empty() {
                    tracing::trace!(
                        flow_id = %self.flow_id,
                        node_id = %self.node_id,
                        ignored = messages.len(),
                        "Action block output ignored"
                    );
                }
                continue;
            }

            for message in &messages {
                self.forward(message).await;
            }
        }
    }

    async fn forward(&self, message: &Message) {
        self.router
            .distribute(&self.node_id, &self.outputs, &self.counters, message)
            .await;
    }

    /// Run the block once. Failures are logged and reported as `None`.
    async fn invoke(&mut self, message: Option<Message>) -> Option<Vec<Message>> {
        let ctx = BlockContext {
            node_id: self.node_id.clone(),
            flow_id: self.flow_id.clone(),
            message,
            logger: self.events.logger(self.flow_id.clone(), self.node_id.clone()),
            cancellation: self.shutdown.child_token(),
            state: Arc::clone(&self.state),
        };

        let started = Instant::now();
        let execution = AssertUnwindSafe(self.block.execute(ctx, &self.properties)).catch_unwind();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => flatten(outcome),
                Err(_) => Err(BlockError::Timeout {
                    millis: limit.as_millis() as u64,
                }),
            },
            None => flatten(execution.await),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(messages) => {
                self.counters.record_execution(true);
                self.events.emit(ExecutionEvent::NodeExecuted {
                    flow_id: self.flow_id.clone(),
                    node_id: self.node_id.clone(),
                    outputs: messages.len(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Some(messages)
            }
            Err(BlockError::Cancelled) if self.shutdown.is_cancelled() => {
                tracing::debug!(
                    flow_id = %self.flow_id,
                    node_id = %self.node_id,
                    "Execution cancelled by shutdown"
                );
                None
            }
            Err(e) => {
                self.counters.record_execution(false);
                tracing::error!(
                    flow_id = %self.flow_id,
                    node_id = %self.node_id,
                    block_group = %self.group,
                    error = %e,
                    "Error executing node"
                );
                self.events.emit(ExecutionEvent::NodeFailed {
                    flow_id: self.flow_id.clone(),
                    node_id: self.node_id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                None
            }
        }
    }
}

fn flatten(
    outcome: Result<Result<Vec<Message>, BlockError>, Box<dyn Any + Send>>,
) -> Result<Vec<Message>, BlockError> {
    outcome.unwrap_or_else(|panic| Err(BlockError::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_trigger(triggers: &mut Option<mpsc::Receiver<Trigger>>) -> Option<Trigger> {
    match triggers {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
