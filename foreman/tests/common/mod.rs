//! Common test utilities for Foreman tests
//!
//! Shared fixtures for wiring a bus, tracker and resolver against a
//! recording telemetry sink.

#![allow(dead_code)]

use std::sync::Arc;

use foreman::blockers::BlockerResolver;
use foreman::coordination::{ChannelHandler, Message, MessageBus};
use foreman::monitoring::RecordingSink;
use foreman::performance::PerformanceTracker;
use foreman_core::{AgentId, BlockerConfig, BusConfig, PerformanceConfig};
use tokio::sync::mpsc::UnboundedReceiver;

pub fn agent(name: &str) -> AgentId {
    AgentId::from(name)
}

/// Bus with default config reporting into a recording sink
pub fn test_bus() -> (MessageBus, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let bus = MessageBus::with_telemetry(BusConfig::default(), sink.clone());
    (bus, sink)
}

/// Register `name` with a channel-backed fallback handler
pub fn inbox(bus: &MessageBus, name: &str) -> UnboundedReceiver<Message> {
    let (handler, rx) = ChannelHandler::new();
    bus.register_fallback(&agent(name), handler)
        .expect("register inbox");
    rx
}

/// Everything currently waiting in an inbox
pub fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

pub struct Harness {
    pub sink: Arc<RecordingSink>,
    pub tracker: Arc<PerformanceTracker>,
    pub resolver: BlockerResolver,
}

/// Tracker and resolver sharing one recording sink
pub fn harness() -> Harness {
    harness_with(BlockerConfig::default(), PerformanceConfig::default())
}

pub fn harness_with(blockers: BlockerConfig, performance: PerformanceConfig) -> Harness {
    let sink = Arc::new(RecordingSink::new());
    let tracker = Arc::new(PerformanceTracker::with_telemetry(performance, sink.clone()));
    let resolver = BlockerResolver::with_telemetry(blockers, tracker.clone(), sink.clone());
    Harness {
        sink,
        tracker,
        resolver,
    }
}
