//! Alert sinks for rejection diagnostics.
//!
//! Sinks are fire-and-forget: [`AlertSink::deliver`] returns nothing and must
//! not block the request path. A sink that talks to the network queues the
//! diagnostic and does the slow work elsewhere.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::admission::RejectionDiagnostic;

/// Receives diagnostics for rejected requests.
pub trait AlertSink: Send + Sync {
    /// Hands over one diagnostic.
    fn deliver(&self, diagnostic: &RejectionDiagnostic);
}

/// Emits each diagnostic as a `WARN` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn deliver(&self, diagnostic: &RejectionDiagnostic) {
        warn!(
            reason = %diagnostic.reason,
            request_ip = %diagnostic.request_ip,
            entered_name = diagnostic.entered_name.as_deref(),
            "Blocked request:\n\n{}",
            diagnostic.to_json_pretty()
        );
    }
}

/// Forwards each diagnostic to every inner sink, in order.
#[derive(Clone, Default)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of inner sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns `true` if there are no inner sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutAlertSink {
    fn deliver(&self, diagnostic: &RejectionDiagnostic) {
        for sink in &self.sinks {
            sink.deliver(diagnostic);
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    delivered: Mutex<Vec<RejectionDiagnostic>>,
}

impl MemoryAlertSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far.
    #[must_use]
    pub fn delivered(&self) -> Vec<RejectionDiagnostic> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AlertSink for MemoryAlertSink {
    fn deliver(&self, diagnostic: &RejectionDiagnostic) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic.clone());
    }
}
