//! Fire-and-forget domain-event emission.
//!
//! Events are handed to the sink strictly after the ledger transaction has
//! committed, so a slow or failing notifier can never roll back a write.
//! Sink failures are logged and swallowed at this boundary.

use std::sync::{Arc, Mutex};

use anyhow::Result;

use kasi_types::DomainEvent;

use crate::Ledger;

/// Receiver for committed state transitions.
///
/// Implementations fan events out to external collaborators (push/email
/// notifiers, activity feeds). `emit` runs on the caller's thread after
/// commit; implementations should hand off quickly rather than block.
pub trait EventSink: Send {
    fn emit(&self, event: &DomainEvent) -> Result<()>;
}

/// Default sink: structured log line per event.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &DomainEvent) -> Result<()> {
        tracing::info!(
            group = %event.group_id,
            kind = ?event.kind,
            actor = %event.actor,
            summary = %event.summary,
            "domain event"
        );
        Ok(())
    }
}

/// Collecting sink for tests and embedders that drain events themselves.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all recorded events, clearing the buffer.
    #[must_use]
    pub fn drain(&self) -> Vec<DomainEvent> {
        let mut events = self.events.lock().expect("event buffer poisoned");
        std::mem::take(&mut *events)
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &DomainEvent) -> Result<()> {
        self.events
            .lock()
            .expect("event buffer poisoned")
            .push(event.clone());
        Ok(())
    }
}

impl Ledger {
    /// Emit a committed event. Failure to notify never surfaces to the
    /// ledger caller.
    pub(crate) fn notify(&self, event: DomainEvent) {
        if let Err(err) = self.events.emit(&event) {
            tracing::warn!(
                group = %event.group_id,
                kind = ?event.kind,
                error = %err,
                "event sink failed; ledger write already committed"
            );
        }
    }
}
