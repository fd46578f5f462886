//! Wiring of stores, scheduler, executor, ledger and event bus.
//!
//! [`Orchestrator`] is the cheap-to-clone handle used by the HTTP surface and
//! the CLI. [`ControlLoop`] is the single task that owns the [`Scheduler`]:
//! ticks, manual triggers and run completions are all handled on it, so
//! `last_run` is read and written from one place only.

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapter::{self, CommandAdapter, DeviceInfo};
use crate::config::Config;
use crate::cycle::{cycle_position, CyclePosition};
use crate::error::{ImpairError, Result};
use crate::events::{EventBus, RunSummary};
use crate::executor::{ExecutionRun, Executor, RunTicket};
use crate::ledger::{HistoryLedger, HistoryMetrics};
use crate::{io, paths};
use crate::router::{RouterDirectory, RouterNode};
use crate::scheduler::Scheduler;
use crate::sequence::SequenceStore;
use crate::types::TriggerSource;

enum ControlMsg {
    Trigger {
        sequence_id: String,
        reply: oneshot::Sender<Result<RunTicket>>,
    },
}

/// Dashboard numbers: ledger aggregates plus live orchestrator state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub history: HistoryMetrics,
    pub active_sequences: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<ExecutionRun>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Orchestrator {
    root: PathBuf,
    config: Arc<Config>,
    routers: RouterDirectory,
    sequences: SequenceStore,
    ledger: Arc<HistoryLedger>,
    events: EventBus,
    executor: Executor,
    adapter: Arc<dyn CommandAdapter>,
    control: mpsc::Sender<ControlMsg>,
}

impl Orchestrator {
    /// Load `.impair/config.yaml` under `root` and build everything from it.
    pub fn open(root: &Path) -> Result<(Self, ControlLoop)> {
        let config = Config::load(root)?;
        let adapter = adapter::from_config(&config.adapter)?;
        Self::build(root, config, adapter)
    }

    /// Build with an explicit adapter.
    pub fn build(
        root: &Path,
        config: Config,
        adapter: Arc<dyn CommandAdapter>,
    ) -> Result<(Self, ControlLoop)> {
        let routers = RouterDirectory::new(root);
        let sequences = SequenceStore::new(root);
        let ledger = Arc::new(HistoryLedger::open(&paths::history_db_path(root))?);
        let events = EventBus::new(config.events.channel_capacity);

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let executor = Executor::new(
            Arc::clone(&adapter),
            routers.clone(),
            Arc::clone(&ledger),
            events.clone(),
        )
        .with_completions(done_tx);

        let (control_tx, control_rx) = mpsc::channel(32);
        let scheduler = Scheduler::from_sequences(&sequences.list()?);

        let control = ControlLoop {
            scheduler,
            queue: VecDeque::new(),
            executor: executor.clone(),
            sequences: sequences.clone(),
            commands: control_rx,
            completions: done_rx,
            tick: config.scheduler.tick(),
        };

        let orchestrator = Self {
            root: root.to_path_buf(),
            config: Arc::new(config),
            routers,
            sequences,
            ledger,
            events,
            executor,
            adapter,
            control: control_tx,
        };
        Ok((orchestrator, control))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn routers(&self) -> &RouterDirectory {
        &self.routers
    }

    pub fn sequences(&self) -> &SequenceStore {
        &self.sequences
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The active run, if any.
    pub fn status(&self) -> Option<ExecutionRun> {
        self.executor.current()
    }

    /// Start a sequence now through the control loop.
    ///
    /// Fails with `AlreadyRunning` when the run slot is taken; the request is
    /// not queued.
    pub async fn trigger(&self, sequence_id: &str) -> Result<RunTicket> {
        let store = self.sequences.clone();
        let id = sequence_id.to_string();
        io::blocking(move || store.get(&id)).await?;
        let (reply, rx) = oneshot::channel();
        self.control
            .send(ControlMsg::Trigger {
                sequence_id: sequence_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| ImpairError::ControlLoopStopped)?;
        rx.await.map_err(|_| ImpairError::ControlLoopStopped)?
    }

    /// Run a sequence in the caller's task without a control loop and wait
    /// for it to finish. Records `last_run` on completion.
    pub async fn run_now(&self, sequence_id: &str) -> Result<RunSummary> {
        let store = self.sequences.clone();
        let id = sequence_id.to_string();
        let sequence = io::blocking(move || store.get(&id)).await?;
        let handle = self.executor.start(sequence, TriggerSource::Manual)?;
        let summary = handle.wait().await.ok_or(ImpairError::ControlLoopStopped)?;

        let store = self.sequences.clone();
        let id = summary.sequence_id.clone();
        let completed_at = summary.completed_at;
        io::blocking(move || store.record_run(&id, completed_at)).await?;
        Ok(summary)
    }

    pub fn position(&self, sequence_id: &str, now: DateTime<Utc>) -> Result<CyclePosition> {
        let sequence = self.sequences.get(sequence_id)?;
        Ok(cycle_position(now, sequence.last_run, sequence.cycle_duration))
    }

    pub fn metrics(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot> {
        let history = self
            .ledger
            .metrics(now, self.config.history.group_window_ms)?;
        let active_sequences = self
            .sequences
            .list()?
            .iter()
            .filter(|s| s.enabled)
            .count();
        Ok(MetricsSnapshot {
            history,
            active_sequences,
            running: self.status(),
        })
    }

    /// Read version and interfaces from the device and store them on the
    /// router record. Fields edited while the device was being queried are
    /// kept.
    pub async fn probe_router(&self, router_id: &str) -> Result<(RouterNode, DeviceInfo)> {
        let routers = self.routers.clone();
        let id = router_id.to_string();
        let router = io::blocking(move || routers.get(&id)).await?;
        let info = self.adapter.probe(&router).await?;

        let routers = self.routers.clone();
        let found = info.clone();
        let router = io::blocking(move || {
            routers.modify(&router.id, |stored| {
                stored.version = found.version;
                stored.interfaces = found.interfaces;
                if stored.name.is_none() {
                    stored.name = found.hostname;
                }
                stored.last_seen = stored.last_seen.max(Some(Utc::now()));
            })
        })
        .await?;
        info!(router = %router.id, version = router.version.as_str(), interfaces = router.interfaces.len(), "router probed");
        Ok((router, info))
    }
}

// ---------------------------------------------------------------------------
// ControlLoop
// ---------------------------------------------------------------------------

pub struct ControlLoop {
    scheduler: Scheduler,
    queue: VecDeque<String>,
    executor: Executor,
    sequences: SequenceStore,
    commands: mpsc::Receiver<ControlMsg>,
    completions: mpsc::UnboundedReceiver<RunSummary>,
    tick: Duration,
}

impl ControlLoop {
    /// Drive the scheduler until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        info!(tick_secs = self.tick.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(summary) = self.completions.recv() => self.on_completed(summary).await,
                Some(msg) = self.commands.recv() => self.on_command(msg).await,
                _ = interval.tick() => self.on_tick(Utc::now()).await,
            }
        }
        info!("scheduler stopped");
    }

    async fn on_tick(&mut self, now: DateTime<Utc>) {
        let store = self.sequences.clone();
        match io::blocking(move || store.list()).await {
            Ok(all) => self.scheduler.sync(&all),
            Err(e) => warn!(error = %e, "could not reload sequences"),
        }
        for id in self.scheduler.due(now) {
            if !self.queue.contains(&id) {
                debug!(sequence_id = %id, "sequence due");
                self.queue.push_back(id);
            }
        }
        self.dispatch(now).await;
    }

    /// Start the head of the queue if the run slot is free.
    ///
    /// A queued sequence that stopped being due since it was queued is
    /// dropped. A busy slot leaves the head in place for the next completion
    /// or tick.
    async fn dispatch(&mut self, now: DateTime<Utc>) {
        while !self.executor.is_busy() {
            let Some(id) = self.queue.front().cloned() else {
                return;
            };
            if !self.scheduler.is_due(&id, now) {
                debug!(sequence_id = %id, "queued sequence no longer due");
                self.queue.pop_front();
                continue;
            }
            let store = self.sequences.clone();
            let lookup = id.clone();
            let sequence = match io::blocking(move || store.get(&lookup)).await {
                Ok(s) if s.enabled && !s.is_manual() => s,
                Ok(_) => {
                    self.queue.pop_front();
                    continue;
                }
                Err(e) => {
                    warn!(sequence_id = %id, error = %e, "dropping queued sequence");
                    self.queue.pop_front();
                    continue;
                }
            };
            match self.executor.start(sequence, TriggerSource::Scheduled) {
                Ok(handle) => {
                    self.queue.pop_front();
                    self.scheduler.notify_started(&id, handle.ticket.run_id);
                    debug!(sequence_id = %id, run_id = %handle.ticket.run_id, "scheduled run started");
                    return;
                }
                Err(ImpairError::AlreadyRunning(_)) => return,
                Err(e) => {
                    warn!(sequence_id = %id, error = %e, "could not start scheduled run");
                    self.queue.pop_front();
                }
            }
        }
    }

    async fn on_command(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Trigger { sequence_id, reply } => {
                let store = self.sequences.clone();
                let lookup = sequence_id.clone();
                let result = match io::blocking(move || store.get(&lookup)).await {
                    Ok(sequence) => self.executor.start(sequence, TriggerSource::Manual),
                    Err(e) => Err(e),
                };
                let result = result.map(|handle| {
                    self.scheduler
                        .notify_started(&sequence_id, handle.ticket.run_id);
                    self.queue.retain(|q| q != &sequence_id);
                    handle.ticket
                });
                let _ = reply.send(result);
            }
        }
    }

    async fn on_completed(&mut self, summary: RunSummary) {
        self.scheduler.notify_completed(
            &summary.sequence_id,
            summary.run_id,
            summary.completed_at,
        );
        let store = self.sequences.clone();
        let id = summary.sequence_id.clone();
        let completed_at = summary.completed_at;
        if let Err(e) = io::blocking(move || store.record_run(&id, completed_at)).await {
            warn!(sequence_id = %summary.sequence_id, error = %e, "could not persist last_run");
        }
        self.dispatch(Utc::now()).await;
    }
}
