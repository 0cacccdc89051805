//! Per-recipient priority mailbox
//!
//! Each sender gets its own FIFO lane so messages from one sender are never
//! reordered among themselves. Across lanes, the head with the highest
//! priority wins; ties go to the message enqueued first.

use super::{Message, Priority};
use foreman_core::AgentId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Notify;

struct Queued {
    seq: u64,
    message: Message,
}

#[derive(Default)]
struct Lanes {
    lanes: HashMap<AgentId, VecDeque<Queued>>,
    next_seq: u64,
    len: usize,
    closed: bool,
}

impl Lanes {
    fn pop(&mut self) -> Option<Message> {
        let mut best: Option<(&AgentId, Priority, u64)> = None;
        for (sender, lane) in &self.lanes {
            let Some(head) = lane.front() else { continue };
            let priority = head.message.priority();
            let better = match best {
                None => true,
                Some((_, p, seq)) => priority > p || (priority == p && head.seq < seq),
            };
            if better {
                best = Some((sender, priority, head.seq));
            }
        }

        let sender = best.map(|(sender, _, _)| sender.clone())?;
        let lane = self.lanes.get_mut(&sender)?;
        let queued = lane.pop_front()?;
        if lane.is_empty() {
            self.lanes.remove(&sender);
        }
        self.len -= 1;
        Some(queued.message)
    }
}

/// Inbound queue for a single agent
#[derive(Default)]
pub struct Mailbox {
    inner: Mutex<Lanes>,
    notify: Notify,
}

impl Mailbox {
    /// Empty, open mailbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message. Returns `false` if the mailbox is closed.
    pub fn push(&self, message: Message) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.len += 1;
            inner
                .lanes
                .entry(message.sender().clone())
                .or_default()
                .push_back(Queued { seq, message });
        }
        self.notify.notify_one();
        true
    }

    /// Take the next message without waiting
    pub fn try_pop(&self) -> Option<Message> {
        self.inner.lock().pop()
    }

    /// Wait for the next message. Returns `None` once closed.
    pub async fn next(&self) -> Option<Message> {
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if let Some(message) = inner.pop() {
                    return Some(message);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the mailbox and return how many queued messages were discarded.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            let discarded = inner.len;
            inner.lanes.clear();
            inner.len = 0;
            discarded
        };
        self.notify.notify_one();
        discarded
    }

    /// Queued messages
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
