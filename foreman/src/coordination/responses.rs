//! Request/response correlation
//!
//! A request that requires a response registers a one-shot slot keyed by its
//! message id. The matching response (same correlation id, addressed to the
//! requester) fills the slot; otherwise the waiter gives up at its deadline.

use super::{CoordinationError, Message, Result};
use crate::monitoring::{Counter, TelemetryEvent, TelemetrySink};
use dashmap::DashMap;
use foreman_core::{AgentId, MessageId};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;

struct Slot {
    requester: AgentId,
    deadline: Instant,
    tx: oneshot::Sender<Message>,
}

/// Table of requests waiting for a response
pub(crate) struct PendingResponses {
    slots: DashMap<MessageId, Slot>,
    telemetry: Arc<dyn TelemetrySink>,
    pub(crate) timeouts: Counter,
}

impl PendingResponses {
    pub(crate) fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            slots: DashMap::new(),
            telemetry,
            timeouts: Counter::new(),
        }
    }

    /// Register a slot for `request_id` and hand back its waiter.
    pub(crate) fn register(
        self: &Arc<Self>,
        request_id: MessageId,
        requester: AgentId,
        deadline: Instant,
    ) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(
            request_id,
            Slot {
                requester,
                deadline,
                tx,
            },
        );
        PendingResponse {
            request_id,
            deadline,
            rx: Some(rx),
            table: Arc::clone(self),
        }
    }

    /// Fill the slot for a response's correlation id.
    ///
    /// Returns `true` if the response matched a live request from `recipient`.
    pub(crate) fn resolve(&self, recipient: &AgentId, response: Message) -> bool {
        let Some(request_id) = response.correlation_id() else {
            return false;
        };
        let Some((_, slot)) = self
            .slots
            .remove_if(&request_id, |_, slot| &slot.requester == recipient)
        else {
            return false;
        };
        // The waiter may have gone away between removal and send.
        let _ = slot.tx.send(response);
        true
    }

    /// Remove every slot whose deadline is at or before `now`.
    pub(crate) fn reap(&self, now: Instant) -> usize {
        let expired: Vec<MessageId> = self
            .slots
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for request_id in expired {
            if let Some((_, slot)) = self.slots.remove(&request_id) {
                self.timed_out(request_id, slot.requester);
                reaped += 1;
            }
        }
        reaped
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn contains(&self, request_id: &MessageId) -> bool {
        self.slots.contains_key(request_id)
    }

    fn timed_out(&self, request_id: MessageId, requester: AgentId) {
        self.timeouts.incr();
        self.telemetry.emit(TelemetryEvent::ResponseTimedOut {
            request_id,
            requester,
        });
    }
}

/// Handle for awaiting the response to a request.
///
/// Dropping the handle cancels the wait and frees the slot.
pub struct PendingResponse {
    request_id: MessageId,
    deadline: Instant,
    rx: Option<oneshot::Receiver<Message>>,
    table: Arc<PendingResponses>,
}

impl PendingResponse {
    /// Id of the request being awaited
    pub fn request_id(&self) -> MessageId {
        self.request_id
    }

    /// When the wait gives up
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response until the deadline.
    pub async fn wait(mut self) -> Result<Message> {
        let Some(rx) = self.rx.take() else {
            return Err(CoordinationError::ResponseChannelClosed(self.request_id));
        };

        match tokio::time::timeout_at(self.deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Slot was reaped at the deadline.
                if Instant::now() >= self.deadline {
                    Err(CoordinationError::Timeout {
                        message_id: self.request_id,
                    })
                } else {
                    Err(CoordinationError::ResponseChannelClosed(self.request_id))
                }
            }
            Err(_) => {
                if let Some((_, slot)) = self.table.slots.remove(&self.request_id) {
                    self.table.timed_out(self.request_id, slot.requester);
                }
                Err(CoordinationError::Timeout {
                    message_id: self.request_id,
                })
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.table.slots.remove(&self.request_id);
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("request_id", &self.request_id)
            .field("deadline", &self.deadline)
            .finish()
    }
}
