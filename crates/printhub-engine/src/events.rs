//! # Job Events
//!
//! Fan-out of job status transitions to whoever is listening: the realtime
//! channel, the notification sink, tests.
//!
//! Sinks are called synchronously and in production order, so each sink
//! must hand the event off without blocking (queue it, spawn a task).

use std::sync::{Arc, PoisonError, RwLock};

use printhub_core::JobEvent;

/// Receives job status transitions.
///
/// A PENDING event is emitted once, when a submission is accepted.
pub trait JobEventSink: Send + Sync {
    fn on_event(&self, event: &JobEvent);
}

/// Sink that drops everything.
pub struct NoOpSink;

impl JobEventSink for NoOpSink {
    fn on_event(&self, _event: &JobEvent) {}
}

/// Delivers each event to every subscribed sink.
#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn JobEventSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn JobEventSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn publish(&self, event: &JobEvent) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        for sink in sinks.iter() {
            sink.on_event(event);
        }
    }
}

impl JobEventSink for tokio::sync::mpsc::UnboundedSender<JobEvent> {
    fn on_event(&self, event: &JobEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.send(event.clone());
    }
}
