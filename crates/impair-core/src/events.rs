//! Live progress events fanned out to every connected observer.

use crate::types::{OutcomeStatus, StepStatus, TriggerSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Progress of one action within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub run_id: Uuid,
    pub sequence_id: String,
    pub action_id: String,
    /// Zero-based position in execution order.
    pub step: usize,
    pub total_steps: usize,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Aggregate result of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub sequence_id: String,
    pub sequence_name: String,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: OutcomeStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Step(StepEvent),
    Completed(RunSummary),
}

impl OrchestratorEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::Step(_) => "step",
            OrchestratorEvent::Completed(_) => "completed",
        }
    }

    pub fn sequence_id(&self) -> &str {
        match self {
            OrchestratorEvent::Step(e) => &e.sequence_id,
            OrchestratorEvent::Completed(s) => &s.sequence_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast fan-out. Slow subscribers lag and lose the oldest events; the
/// publisher never waits on them.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: OrchestratorEvent) -> usize {
        // An error only means nobody is listening.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
