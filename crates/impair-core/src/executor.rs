//! Runs one sequence at a time against the command adapter.
//!
//! # Run slot
//!
//! A single-permit semaphore guards the global run slot. `start` takes the
//! permit without waiting; a busy slot fails with `AlreadyRunning`. The permit
//! travels into the run task inside a [`SlotGuard`], so the slot is released
//! on every exit path, panics included. The completion channel hears about a
//! finished run before the slot is released; the caller's handle resolves
//! after.
//!
//! Every adapter call runs on its own task. A panicking adapter fails that
//! one action and the run moves on to the next.
//!
//! # Timing
//!
//! Action *i* fires at `run_start + offset_i` minutes, measured from the
//! start of the run and not from the previous action. An offset that has
//! already passed fires immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterReply, CommandAdapter};
use crate::error::{ImpairError, Result};
use crate::events::{EventBus, OrchestratorEvent, RunSummary, StepEvent};
use crate::io;
use crate::ledger::{ActionOutcome, HistoryLedger};
use crate::router::{RouterDirectory, RouterNode};
use crate::sequence::{Action, Sequence};
use crate::types::{OutcomeStatus, StepStatus, TriggerSource};

/// Wall-clock length of one offset unit.
pub const OFFSET_UNIT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// ExecutionRun
// ---------------------------------------------------------------------------

/// The live state of the one active run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRun {
    pub run_id: Uuid,
    pub sequence_id: String,
    pub sequence_name: String,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub current_step: usize,
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ExecutionRun {
    fn new(sequence: &Sequence, trigger: TriggerSource) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sequence_id: sequence.id.clone(),
            sequence_name: sequence.name.clone(),
            trigger,
            started_at: Utc::now(),
            current_step: 0,
            total_steps: sequence.actions.len(),
            succeeded: 0,
            failed: 0,
        }
    }

    fn finish(&self, completed_at: DateTime<Utc>) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            sequence_id: self.sequence_id.clone(),
            sequence_name: self.sequence_name.clone(),
            trigger: self.trigger,
            started_at: self.started_at,
            completed_at,
            status: if self.failed > 0 {
                OutcomeStatus::Failed
            } else {
                OutcomeStatus::Success
            },
            total: self.total_steps,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }
}

/// Returned to whoever started a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub sequence_id: String,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
}

pub struct RunHandle {
    pub ticket: RunTicket,
    done: oneshot::Receiver<RunSummary>,
}

impl RunHandle {
    /// Wait for the run to finish.
    pub async fn wait(self) -> Option<RunSummary> {
        self.done.await.ok()
    }
}

// ---------------------------------------------------------------------------
// Run slot
// ---------------------------------------------------------------------------

struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    current: Arc<watch::Sender<Option<ExecutionRun>>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.current.send_replace(None);
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Executor {
    slot: Arc<Semaphore>,
    current: Arc<watch::Sender<Option<ExecutionRun>>>,
    adapter: Arc<dyn CommandAdapter>,
    routers: RouterDirectory,
    ledger: Arc<HistoryLedger>,
    events: EventBus,
    completions: Option<mpsc::UnboundedSender<RunSummary>>,
}

impl Executor {
    pub fn new(
        adapter: Arc<dyn CommandAdapter>,
        routers: RouterDirectory,
        ledger: Arc<HistoryLedger>,
        events: EventBus,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            slot: Arc::new(Semaphore::new(1)),
            current: Arc::new(current),
            adapter,
            routers,
            ledger,
            events,
            completions: None,
        }
    }

    /// Also report every finished run on `tx`.
    pub fn with_completions(mut self, tx: mpsc::UnboundedSender<RunSummary>) -> Self {
        self.completions = Some(tx);
        self
    }

    /// Snapshot of the active run, if any.
    pub fn current(&self) -> Option<ExecutionRun> {
        self.current.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Claim the run slot and start `sequence` in the background.
    pub fn start(&self, sequence: Sequence, trigger: TriggerSource) -> Result<RunHandle> {
        let Ok(permit) = self.slot.clone().try_acquire_owned() else {
            let running = self
                .current()
                .map(|r| r.sequence_id)
                .unwrap_or_else(|| "unknown".to_string());
            return Err(ImpairError::AlreadyRunning(running));
        };

        let run = ExecutionRun::new(&sequence, trigger);
        self.current.send_replace(Some(run.clone()));
        let guard = SlotGuard {
            _permit: permit,
            current: Arc::clone(&self.current),
        };

        let ticket = RunTicket {
            run_id: run.run_id,
            sequence_id: run.sequence_id.clone(),
            trigger,
            started_at: run.started_at,
        };
        let (done_tx, done_rx) = oneshot::channel();
        let this = self.clone();

        tokio::spawn(async move {
            let fallback = run.clone();
            let worker = this.clone();
            let summary = match tokio::spawn(async move { worker.drive(sequence, run).await }).await
            {
                Ok(summary) => summary,
                Err(e) => {
                    error!(sequence_id = %fallback.sequence_id, error = %e, "run task aborted");
                    let mut aborted = fallback;
                    aborted.failed = aborted.failed.max(1);
                    let summary = aborted.finish(Utc::now());
                    this.events
                        .publish(OrchestratorEvent::Completed(summary.clone()));
                    summary
                }
            };
            if let Some(tx) = &this.completions {
                let _ = tx.send(summary.clone());
            }
            drop(guard);
            let _ = done_tx.send(summary);
        });

        Ok(RunHandle {
            ticket,
            done: done_rx,
        })
    }

    async fn drive(&self, sequence: Sequence, mut run: ExecutionRun) -> RunSummary {
        let origin = Instant::now();
        let ordered: Vec<Action> = sequence.execution_order().into_iter().cloned().collect();
        info!(
            sequence_id = %sequence.id,
            run_id = %run.run_id,
            trigger = ?run.trigger,
            actions = ordered.len(),
            "run started"
        );

        for (step, action) in ordered.iter().enumerate() {
            tokio::time::sleep_until(origin + OFFSET_UNIT * action.offset).await;

            run.current_step = step;
            self.current.send_replace(Some(run.clone()));
            self.publish_step(&run, action, step, StepStatus::Running, None);

            let outcome = self.execute_action(&sequence, action).await;
            match outcome.status {
                OutcomeStatus::Success => run.succeeded += 1,
                OutcomeStatus::Failed => run.failed += 1,
            }
            self.record(&outcome).await;
            self.publish_step(
                &run,
                action,
                step,
                outcome.status.into(),
                outcome.error.clone(),
            );
        }

        let summary = run.finish(Utc::now());
        info!(
            sequence_id = %summary.sequence_id,
            run_id = %summary.run_id,
            status = %summary.status,
            failed = summary.failed,
            "run completed"
        );
        self.events
            .publish(OrchestratorEvent::Completed(summary.clone()));
        summary
    }

    async fn execute_action(&self, sequence: &Sequence, action: &Action) -> ActionOutcome {
        let routers = self.routers.clone();
        let router_id = action.router.clone();
        let result = match io::blocking(move || routers.get(&router_id)).await {
            Ok(router) if router.enabled => self.call_adapter(router, action.clone()).await,
            Ok(_) => Err(ImpairError::NodeUnreachable(format!(
                "router '{}' is disabled",
                action.router
            ))),
            Err(e) => Err(ImpairError::NodeUnreachable(format!(
                "router '{}' unavailable: {e}",
                action.router
            ))),
        };

        let mut outcome = ActionOutcome {
            id: Uuid::new_v4(),
            sequence_id: sequence.id.clone(),
            sequence_name: sequence.name.clone(),
            action_id: action.id.clone(),
            router_id: action.router.clone(),
            interface: action.interface.clone(),
            command: action.command,
            params: action.params.clone(),
            timestamp: Utc::now(),
            status: OutcomeStatus::Success,
            error: None,
            detail: None,
        };

        match result {
            Ok(reply) if reply.ok => {
                outcome.detail = Some(reply.detail);
                let routers = self.routers.clone();
                let router_id = action.router.clone();
                let at = outcome.timestamp;
                if let Err(e) = io::blocking(move || routers.mark_seen(&router_id, at)).await {
                    warn!(router = %action.router, error = %e, "could not record last_seen");
                }
            }
            Ok(reply) => {
                warn!(action_id = %action.id, target = %action.target(), detail = %reply.detail, "device refused command");
                outcome.status = OutcomeStatus::Failed;
                outcome.error = Some(reply.detail);
            }
            Err(e) => {
                warn!(action_id = %action.id, target = %action.target(), error = %e, "action failed");
                outcome.status = OutcomeStatus::Failed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    async fn call_adapter(&self, router: RouterNode, action: Action) -> Result<AdapterReply> {
        let adapter = Arc::clone(&self.adapter);
        let action_id = action.id.clone();
        match tokio::spawn(async move { adapter.execute(&router, &action).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(action_id = %action_id, error = %e, "adapter task aborted");
                Err(ImpairError::AdapterFault(format!("adapter task aborted: {e}")))
            }
        }
    }

    async fn record(&self, outcome: &ActionOutcome) {
        let ledger = Arc::clone(&self.ledger);
        let owned = outcome.clone();
        match tokio::task::spawn_blocking(move || ledger.append(&owned)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(action_id = %outcome.action_id, error = %e, "ledger append failed"),
            Err(e) => error!(action_id = %outcome.action_id, error = %e, "ledger task failed"),
        }
    }

    fn publish_step(
        &self,
        run: &ExecutionRun,
        action: &Action,
        step: usize,
        status: StepStatus,
        error: Option<String>,
    ) {
        self.events.publish(OrchestratorEvent::Step(StepEvent {
            run_id: run.run_id,
            sequence_id: run.sequence_id.clone(),
            action_id: action.id.clone(),
            step,
            total_steps: run.total_steps,
            status,
            error,
            at: Utc::now(),
        }));
    }
}
