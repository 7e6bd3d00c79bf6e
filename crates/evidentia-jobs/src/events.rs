//! Notifications passed from the linking engine to the narrative queue.

use std::sync::Mutex;

use async_trait::async_trait;

use evidentia_core::{EvidenceSetChanged, Result};

/// Consumer of "an activity's evidence set changed" events.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn evidence_set_changed(&self, event: EvidenceSetChanged) -> Result<()>;
}

/// Sink that only records what it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EvidenceSetChanged>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in arrival order.
    pub fn events(&self) -> Vec<EvidenceSetChanged> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChangeSink for RecordingSink {
    async fn evidence_set_changed(&self, event: EvidenceSetChanged) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
