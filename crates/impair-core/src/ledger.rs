//! Append-only execution history backed by redb.
//!
//! # Table design
//!
//! A single `OUTCOMES` table keyed by a 24-byte composite:
//! ```text
//! [ timestamp_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Byte order equals time order, so a reverse scan yields newest-first.
//! Values are JSON-encoded [`ActionOutcome`]s.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ImpairError, Result};
use crate::types::{CommandKind, CommandParams, OutcomeStatus};

const OUTCOMES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("outcomes");

// ---------------------------------------------------------------------------
// ActionOutcome
// ---------------------------------------------------------------------------

/// The recorded result of executing one action. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub id: Uuid,
    pub sequence_id: String,
    #[serde(default)]
    pub sequence_name: String,
    pub action_id: String,
    pub router_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "CommandParams::is_empty")]
    pub params: CommandParams,
    pub timestamp: DateTime<Utc>,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Device output, e.g. the list returned by `show-denied`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    fn matches_text(&self, needle: &str) -> bool {
        let fields = [
            self.sequence_id.as_str(),
            self.sequence_name.as_str(),
            self.action_id.as_str(),
            self.router_id.as_str(),
            self.interface.as_deref().unwrap_or(""),
            self.command.as_str(),
            self.status.as_str(),
            self.error.as_deref().unwrap_or(""),
            self.detail.as_deref().unwrap_or(""),
        ];
        fields.iter().any(|f| f.to_lowercase().contains(needle))
            || self.params.summary().to_lowercase().contains(needle)
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    /// Case-insensitive substring over ids, names, command, error and detail.
    pub search: Option<String>,
    pub status: Option<OutcomeStatus>,
    pub command: Option<CommandKind>,
    pub sequence: Option<String>,
    pub router: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            search: None,
            status: None,
            command: None,
            sequence: None,
            router: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl HistoryQuery {
    fn matches(&self, outcome: &ActionOutcome, needle: Option<&str>) -> bool {
        if self.status.is_some_and(|s| s != outcome.status) {
            return false;
        }
        if self.command.is_some_and(|c| c != outcome.command) {
            return false;
        }
        if self
            .sequence
            .as_deref()
            .is_some_and(|s| s != outcome.sequence_id)
        {
            return false;
        }
        if self
            .router
            .as_deref()
            .is_some_and(|r| r != outcome.router_id)
        {
            return false;
        }
        needle.is_none_or(|n| outcome.matches_text(n))
    }
}

/// One page of newest-first results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub items: Vec<ActionOutcome>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

// ---------------------------------------------------------------------------
// Run grouping
// ---------------------------------------------------------------------------

/// Outcomes believed to belong to one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunGroup {
    pub sequence_id: String,
    pub sequence_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: OutcomeStatus,
    pub succeeded: usize,
    pub failed: usize,
    /// Chronological.
    pub outcomes: Vec<ActionOutcome>,
}

impl RunGroup {
    fn open(first: ActionOutcome) -> Self {
        let mut group = Self {
            sequence_id: first.sequence_id.clone(),
            sequence_name: first.sequence_name.clone(),
            started_at: first.timestamp,
            ended_at: first.timestamp,
            status: OutcomeStatus::Success,
            succeeded: 0,
            failed: 0,
            outcomes: Vec::new(),
        };
        group.push(first);
        group
    }

    fn push(&mut self, outcome: ActionOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.status = OutcomeStatus::Failed;
        }
        self.ended_at = self.ended_at.max(outcome.timestamp);
        self.outcomes.push(outcome);
    }
}

/// Cluster outcomes into runs: same sequence, and within `window_ms` of the
/// group's first member. Returns groups newest-first.
///
/// This is a heuristic; outcomes from one long run with widely spaced
/// offsets will split into several groups.
pub fn group_runs(outcomes: &[ActionOutcome], window_ms: i64) -> Vec<RunGroup> {
    let mut ordered: Vec<&ActionOutcome> = outcomes.iter().collect();
    ordered.sort_by_key(|o| o.timestamp);

    let window = Duration::milliseconds(window_ms.max(0));
    let mut groups: Vec<RunGroup> = Vec::new();
    let mut open: HashMap<&str, usize> = HashMap::new();

    for outcome in ordered {
        let joinable = open
            .get(outcome.sequence_id.as_str())
            .copied()
            .filter(|&idx| outcome.timestamp - groups[idx].started_at <= window);
        match joinable {
            Some(idx) => groups[idx].push(outcome.clone()),
            None => {
                open.insert(outcome.sequence_id.as_str(), groups.len());
                groups.push(RunGroup::open(outcome.clone()));
            }
        }
    }

    groups.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    groups
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterCount {
    pub router_id: String,
    pub actions: usize,
}

/// Dashboard aggregates over the whole ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryMetrics {
    pub total_actions: usize,
    pub total_runs: usize,
    /// Percentage of successful outcomes, 0 when the ledger is empty.
    pub success_rate: f64,
    pub failures_last_hour: usize,
    pub actions_last_24h: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_targeted_router: Option<RouterCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome_at: Option<DateTime<Utc>>,
}

impl HistoryMetrics {
    pub fn compute(outcomes: &[ActionOutcome], now: DateTime<Utc>, window_ms: i64) -> Self {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);

        let total = outcomes.len();
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            (succeeded as f64 / total as f64) * 100.0
        };

        let mut per_router: HashMap<&str, usize> = HashMap::new();
        for o in outcomes {
            *per_router.entry(o.router_id.as_str()).or_default() += 1;
        }
        // Ties go to the lexically smallest id so the answer is stable.
        let most_targeted_router = per_router
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(id, n)| RouterCount {
                router_id: id.to_string(),
                actions: n,
            });

        Self {
            total_actions: total,
            total_runs: group_runs(outcomes, window_ms).len(),
            success_rate,
            failures_last_hour: outcomes
                .iter()
                .filter(|o| !o.is_success() && o.timestamp >= hour_ago)
                .count(),
            actions_last_24h: outcomes.iter().filter(|o| o.timestamp >= day_ago).count(),
            most_targeted_router,
            last_outcome_at: outcomes.iter().map(|o| o.timestamp).max(),
        }
    }
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn outcome_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn db_err(e: impl Display) -> ImpairError {
    ImpairError::Ledger(e.to_string())
}

// ---------------------------------------------------------------------------
// HistoryLedger
// ---------------------------------------------------------------------------

/// Persistent outcome log. Appends are serialized by redb's single writer;
/// reads run concurrently against snapshots.
pub struct HistoryLedger {
    db: Database,
}

impl HistoryLedger {
    /// Open or create the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(OUTCOMES).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    pub fn append(&self, outcome: &ActionOutcome) -> Result<()> {
        let key = outcome_key(outcome.timestamp, outcome.id);
        let value = serde_json::to_vec(outcome)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(OUTCOMES).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Filtered, paginated, newest-first listing.
    pub fn query(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(OUTCOMES).map_err(db_err)?;

        let mut items = Vec::new();
        let mut total = 0usize;
        for entry in table.iter().map_err(db_err)?.rev() {
            let (_, v) = entry.map_err(db_err)?;
            let outcome: ActionOutcome = serde_json::from_slice(v.value())?;
            if !query.matches(&outcome, needle.as_deref()) {
                continue;
            }
            if total >= query.offset && items.len() < query.limit {
                items.push(outcome);
            }
            total += 1;
        }

        Ok(HistoryPage {
            items,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// Every outcome, newest first.
    pub fn list_all(&self) -> Result<Vec<ActionOutcome>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(OUTCOMES).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)?.rev() {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    pub fn metrics(&self, now: DateTime<Utc>, window_ms: i64) -> Result<HistoryMetrics> {
        Ok(HistoryMetrics::compute(&self.list_all()?, now, window_ms))
    }

    /// Delete every outcome. Returns how many were removed.
    pub fn purge(&self) -> Result<usize> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut table = wt.open_table(OUTCOMES).map_err(db_err)?;
            let mut keys: Vec<Vec<u8>> = Vec::new();
            for entry in table.iter().map_err(db_err)? {
                let (k, _) = entry.map_err(db_err)?;
                keys.push(k.value().to_vec());
            }
            for key in &keys {
                table.remove(key.as_slice()).map_err(db_err)?;
            }
            keys.len()
        };
        wt.commit().map_err(db_err)?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, HistoryLedger) {
        let dir = TempDir::new().unwrap();
        let ledger = HistoryLedger::open(&dir.path().join("history.redb")).unwrap();
        (dir, ledger)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn outcome(seq: &str, router: &str, ts: DateTime<Utc>, ok: bool) -> ActionOutcome {
        ActionOutcome {
            id: Uuid::new_v4(),
            sequence_id: seq.into(),
            sequence_name: format!("{seq} drill"),
            action_id: "a1".into(),
            router_id: router.into(),
            interface: Some("eth1".into()),
            command: CommandKind::InterfaceDown,
            params: CommandParams::default(),
            timestamp: ts,
            status: if ok {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Failed
            },
            error: (!ok).then(|| "node unreachable: 10.0.0.1".to_string()),
            detail: None,
        }
    }

    #[test]
    fn query_returns_newest_first_with_total() {
        let (_dir, ledger) = open_tmp();
        for i in 0..5 {
            ledger
                .append(&outcome("wan", "edge-1", t0() + Duration::seconds(i), true))
                .unwrap();
        }
        let page = ledger
            .query(&HistoryQuery {
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].timestamp, t0() + Duration::seconds(3));
        assert_eq!(page.items[1].timestamp, t0() + Duration::seconds(2));
    }

    #[test]
    fn query_filters_combine() {
        let (_dir, ledger) = open_tmp();
        ledger.append(&outcome("wan", "edge-1", t0(), true)).unwrap();
        ledger
            .append(&outcome("wan", "edge-2", t0() + Duration::seconds(1), false))
            .unwrap();
        ledger
            .append(&outcome("dns", "edge-2", t0() + Duration::seconds(2), false))
            .unwrap();

        let failed_on_edge2 = ledger
            .query(&HistoryQuery {
                status: Some(OutcomeStatus::Failed),
                router: Some("edge-2".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed_on_edge2.total, 2);

        let wan_only = ledger
            .query(&HistoryQuery {
                sequence: Some("wan".into()),
                status: Some(OutcomeStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(wan_only.total, 1);
        assert_eq!(wan_only.items[0].router_id, "edge-2");
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let (_dir, ledger) = open_tmp();
        ledger.append(&outcome("wan", "edge-1", t0(), false)).unwrap();
        ledger
            .append(&outcome("dns", "core-1", t0() + Duration::seconds(1), true))
            .unwrap();

        let by_error = ledger
            .query(&HistoryQuery {
                search: Some("UNREACHABLE".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_error.total, 1);
        assert_eq!(by_error.items[0].sequence_id, "wan");

        let by_name = ledger
            .query(&HistoryQuery {
                search: Some("dns drill".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_name.total, 1);

        let blank = ledger
            .query(&HistoryQuery {
                search: Some("   ".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(blank.total, 2);
    }

    #[test]
    fn purge_removes_everything_and_reports_count() {
        let (_dir, ledger) = open_tmp();
        for i in 0..3 {
            ledger
                .append(&outcome("wan", "edge-1", t0() + Duration::seconds(i), true))
                .unwrap();
        }
        assert_eq!(ledger.purge().unwrap(), 3);
        assert!(ledger.list_all().unwrap().is_empty());
        assert_eq!(ledger.purge().unwrap(), 0);
    }

    #[test]
    fn reopen_preserves_outcomes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.redb");
        {
            let ledger = HistoryLedger::open(&path).unwrap();
            ledger.append(&outcome("wan", "edge-1", t0(), true)).unwrap();
        }
        let ledger = HistoryLedger::open(&path).unwrap();
        assert_eq!(ledger.list_all().unwrap().len(), 1);
    }

    #[test]
    fn grouping_clusters_by_sequence_and_window() {
        let outcomes = vec![
            outcome("wan", "edge-1", t0(), true),
            outcome("wan", "edge-1", t0() + Duration::milliseconds(4_000), false),
            outcome("dns", "edge-2", t0() + Duration::milliseconds(1_000), true),
            outcome("wan", "edge-1", t0() + Duration::minutes(10), true),
        ];
        let groups = group_runs(&outcomes, 5_000);
        assert_eq!(groups.len(), 3);

        // Newest first.
        assert_eq!(groups[0].started_at, t0() + Duration::minutes(10));
        let first_wan = groups
            .iter()
            .find(|g| g.sequence_id == "wan" && g.started_at == t0())
            .unwrap();
        assert_eq!(first_wan.outcomes.len(), 2);
        assert_eq!(first_wan.status, OutcomeStatus::Failed);
        assert_eq!(first_wan.failed, 1);
    }

    #[test]
    fn grouping_window_is_anchored_on_first_member() {
        let outcomes = vec![
            outcome("wan", "edge-1", t0(), true),
            outcome("wan", "edge-1", t0() + Duration::milliseconds(5_000), true),
            outcome("wan", "edge-1", t0() + Duration::milliseconds(5_001), true),
        ];
        let groups = group_runs(&outcomes, 5_000);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].outcomes.len(), 2);
        assert_eq!(groups[0].outcomes.len(), 1);
    }

    #[test]
    fn metrics_aggregate() {
        let now = t0();
        let outcomes = vec![
            outcome("wan", "edge-1", now - Duration::minutes(10), false),
            outcome("wan", "edge-1", now - Duration::minutes(10), true),
            outcome("wan", "edge-2", now - Duration::hours(2), false),
            outcome("dns", "edge-2", now - Duration::hours(30), true),
        ];
        let m = HistoryMetrics::compute(&outcomes, now, 5_000);
        assert_eq!(m.total_actions, 4);
        assert_eq!(m.total_runs, 3);
        assert!((m.success_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(m.failures_last_hour, 1);
        assert_eq!(m.actions_last_24h, 3);
        // edge-1 and edge-2 tie at 2; the smaller id wins.
        assert_eq!(m.most_targeted_router.unwrap().router_id, "edge-1");
    }

    #[test]
    fn metrics_on_empty_ledger() {
        let (_dir, ledger) = open_tmp();
        let m = ledger.metrics(t0(), 5_000).unwrap();
        assert_eq!(m.total_actions, 0);
        assert_eq!(m.success_rate, 0.0);
        assert!(m.most_targeted_router.is_none());
    }
}
