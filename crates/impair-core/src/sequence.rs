//! Sequence definitions: named, timed plans of impairment actions.
//!
//! Offsets and cycle durations are whole minutes. Every offset stays within
//! `0..=cycle_duration`; shrinking the cycle clamps offsets down to the new
//! bound, while saving a definition with an offset past the cycle is a
//! validation error.

use crate::error::{ImpairError, Result};
use crate::router::RouterDirectory;
use crate::types::{CommandKind, CommandParams};
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "new_action_id")]
    pub id: String,
    /// Minutes after run start at which the action fires.
    #[serde(default)]
    pub offset: u32,
    pub router: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    pub command: CommandKind,
    #[serde(default, skip_serializing_if = "CommandParams::is_empty")]
    pub params: CommandParams,
}

fn new_action_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

impl Action {
    pub fn new(offset: u32, router: impl Into<String>, command: CommandKind) -> Self {
        Self {
            id: new_action_id(),
            offset,
            router: router.into(),
            interface: None,
            command,
            params: CommandParams::default(),
        }
    }

    pub fn on_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_params(mut self, params: CommandParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Human-readable target, e.g. `edge-1/eth0` or `edge-1`.
    pub fn target(&self) -> String {
        match &self.interface {
            Some(iface) => format!("{}/{}", self.router, iface),
            None => self.router.clone(),
        }
    }

    /// Structural checks that need no other records. Returns the action with
    /// normalized parameters.
    pub fn normalized(&self, cycle_duration: u32) -> Result<Action> {
        let label = format!("action '{}'", self.id);
        if self.id.trim().is_empty() {
            return Err(ImpairError::validation("action id must not be empty"));
        }
        if self.offset > cycle_duration {
            return Err(ImpairError::validation(format!(
                "{label}: offset {} is beyond the cycle length of {cycle_duration} minutes",
                self.offset
            )));
        }
        if self.router.trim().is_empty() {
            return Err(ImpairError::validation(format!("{label}: router is required")));
        }
        match (&self.interface, self.command.is_router_scoped()) {
            (Some(_), true) => {
                return Err(ImpairError::validation(format!(
                    "{label}: {} is router-wide and takes no interface",
                    self.command
                )))
            }
            (None, false) => {
                return Err(ImpairError::validation(format!(
                    "{label}: {} requires an interface",
                    self.command
                )))
            }
            (Some(iface), false) if iface.trim().is_empty() => {
                return Err(ImpairError::validation(format!(
                    "{label}: interface name must not be empty"
                )))
            }
            _ => {}
        }
        let params = self
            .command
            .normalize_params(&self.params)
            .map_err(|e| match e {
                ImpairError::ValidationFailed(msg) => {
                    ImpairError::ValidationFailed(format!("{label}: {msg}"))
                }
                other => other,
            })?;
        Ok(Action {
            params,
            ..self.clone()
        })
    }
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minutes between automatic firings; zero means manual trigger only.
    #[serde(default)]
    pub cycle_duration: u32,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Sequence {
    pub fn new(id: impl Into<String>, name: impl Into<String>, cycle_duration: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            cycle_duration,
            actions: Vec::new(),
            last_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn is_manual(&self) -> bool {
        self.cycle_duration == 0
    }

    /// Change the cycle length, pulling any offset past the new end back to it.
    pub fn set_cycle_duration(&mut self, minutes: u32) {
        self.cycle_duration = minutes;
        for action in &mut self.actions {
            action.offset = action.offset.min(minutes);
        }
        self.updated_at = Utc::now();
    }

    /// Actions in firing order: by offset, ties kept in declaration order.
    pub fn execution_order(&self) -> Vec<&Action> {
        let mut ordered: Vec<&Action> = self.actions.iter().collect();
        ordered.sort_by_key(|a| a.offset);
        ordered
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Validate the definition and normalize action parameters in place.
    pub fn normalize(&mut self) -> Result<()> {
        paths::validate_id(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(ImpairError::validation("sequence name must not be empty"));
        }
        let mut ids = HashSet::new();
        for action in &self.actions {
            if !ids.insert(action.id.as_str()) {
                return Err(ImpairError::validation(format!(
                    "duplicate action id '{}'",
                    action.id
                )));
            }
        }
        let normalized = self
            .actions
            .iter()
            .map(|a| a.normalized(self.cycle_duration))
            .collect::<Result<Vec<_>>>()?;
        self.actions = normalized;
        Ok(())
    }

    /// Check that every action targets a known router and, when the router
    /// has an interface inventory, a known interface.
    pub fn check_targets(&self, routers: &RouterDirectory) -> Result<()> {
        for action in &self.actions {
            let router = match routers.get(&action.router) {
                Ok(r) => r,
                Err(ImpairError::RouterNotFound(_)) | Err(ImpairError::InvalidId(_)) => {
                    return Err(ImpairError::validation(format!(
                        "action '{}' targets unknown router '{}'",
                        action.id, action.router
                    )))
                }
                Err(e) => return Err(e),
            };
            if let Some(iface) = &action.interface {
                if !router.has_interface(iface) {
                    return Err(ImpairError::validation(format!(
                        "action '{}': router '{}' has no interface '{iface}'",
                        action.id, router.id
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SequenceStore
// ---------------------------------------------------------------------------

/// File-backed CRUD over sequence definitions. Every save path validates.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    root: PathBuf,
}

impl SequenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, id: &str) -> Result<Sequence> {
        paths::validate_id(id)?;
        let path = paths::sequence_path(&self.root, id);
        if !path.exists() {
            return Err(ImpairError::SequenceNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn list(&self) -> Result<Vec<Sequence>> {
        let mut sequences: Vec<Sequence> = io::read_yaml_dir(&paths::sequences_dir(&self.root))?;
        sequences.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sequences)
    }

    pub fn exists(&self, id: &str) -> bool {
        paths::validate_id(id).is_ok() && paths::sequence_path(&self.root, id).exists()
    }

    pub fn create(&self, mut sequence: Sequence, routers: &RouterDirectory) -> Result<Sequence> {
        sequence.normalize()?;
        let lock = io::record_lock(&paths::sequence_path(&self.root, &sequence.id));
        let _held = io::hold(&lock);
        if self.exists(&sequence.id) {
            return Err(ImpairError::SequenceExists(sequence.id));
        }
        sequence.check_targets(routers)?;
        let now = Utc::now();
        sequence.created_at = now;
        sequence.updated_at = now;
        self.write(&sequence)?;
        Ok(sequence)
    }

    /// Replace a definition. `last_run` and `created_at` are owned by the
    /// store and carried over from the saved copy. A shorter cycle clamps the
    /// incoming offsets.
    pub fn update(&self, mut sequence: Sequence, routers: &RouterDirectory) -> Result<Sequence> {
        paths::validate_id(&sequence.id)?;
        let lock = io::record_lock(&paths::sequence_path(&self.root, &sequence.id));
        let _held = io::hold(&lock);
        let existing = self.get(&sequence.id)?;
        if sequence.cycle_duration < existing.cycle_duration {
            let cycle = sequence.cycle_duration;
            sequence.set_cycle_duration(cycle);
        }
        sequence.normalize()?;
        sequence.check_targets(routers)?;
        sequence.last_run = existing.last_run;
        sequence.created_at = existing.created_at;
        sequence.updated_at = Utc::now();
        self.write(&sequence)?;
        Ok(sequence)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        paths::validate_id(id)?;
        let path = paths::sequence_path(&self.root, id);
        let lock = io::record_lock(&path);
        let _held = io::hold(&lock);
        if !path.exists() {
            return Err(ImpairError::SequenceNotFound(id.to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Sequence> {
        self.modify(id, |sequence| {
            sequence.enabled = enabled;
            sequence.updated_at = Utc::now();
        })
    }

    pub fn set_cycle_duration(&self, id: &str, minutes: u32) -> Result<Sequence> {
        self.modify(id, |sequence| {
            sequence.set_cycle_duration(minutes);
            sequence.updated_at = Utc::now();
        })
    }

    /// Persist the completion time of the latest run. An older timestamp
    /// never replaces a newer one.
    pub fn record_run(&self, id: &str, completed_at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |sequence| {
            sequence.last_run = sequence.last_run.max(Some(completed_at));
        })?;
        Ok(())
    }

    /// Apply `change` to the stored definition while holding its record lock.
    fn modify(&self, id: &str, change: impl FnOnce(&mut Sequence)) -> Result<Sequence> {
        paths::validate_id(id)?;
        let lock = io::record_lock(&paths::sequence_path(&self.root, id));
        let _held = io::hold(&lock);
        let mut sequence = self.get(id)?;
        change(&mut sequence);
        self.write(&sequence)?;
        Ok(sequence)
    }

    fn write(&self, sequence: &Sequence) -> Result<()> {
        let data = serde_yaml::to_string(sequence)?;
        io::atomic_write(
            &paths::sequence_path(&self.root, &sequence.id),
            data.as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterNode;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RouterDirectory, SequenceStore) {
        let dir = TempDir::new().unwrap();
        let routers = RouterDirectory::new(dir.path());
        routers
            .create(&RouterNode::new("edge-1", "10.0.0.1", "k").with_interfaces(["eth0", "eth1"]))
            .unwrap();
        let store = SequenceStore::new(dir.path());
        (dir, routers, store)
    }

    fn flap(cycle: u32) -> Sequence {
        Sequence::new("flap", "WAN flap", cycle)
            .with_action(
                Action::new(0, "edge-1", CommandKind::InterfaceDown)
                    .on_interface("eth0")
                    .with_id("down"),
            )
            .with_action(
                Action::new(5, "edge-1", CommandKind::InterfaceUp)
                    .on_interface("eth0")
                    .with_id("up"),
            )
    }

    #[test]
    fn shrinking_cycle_clamps_offsets() {
        let mut seq = flap(10);
        seq.set_cycle_duration(3);
        assert!(seq.actions.iter().all(|a| a.offset <= 3));
        assert_eq!(seq.action("down").unwrap().offset, 0);
        assert_eq!(seq.action("up").unwrap().offset, 3);
    }

    #[test]
    fn growing_cycle_keeps_offsets() {
        let mut seq = flap(10);
        seq.set_cycle_duration(30);
        assert_eq!(seq.action("up").unwrap().offset, 5);
    }

    #[test]
    fn offset_beyond_cycle_is_rejected_at_save() {
        let (_dir, routers, store) = setup();
        let err = store.create(flap(4), &routers).unwrap_err();
        assert!(matches!(err, ImpairError::ValidationFailed(_)), "{err}");
    }

    #[test]
    fn deny_with_bad_mask_is_rejected_at_save() {
        let (_dir, routers, store) = setup();
        let seq = Sequence::new("block", "Block DNS", 10).with_action(
            Action::new(0, "edge-1", CommandKind::DenyTraffic)
                .with_params(CommandParams::subnet("8.8.8.8/33")),
        );
        let err = store.create(seq, &routers).unwrap_err();
        assert!(matches!(err, ImpairError::ValidationFailed(_)), "{err}");
        assert!(!store.exists("block"));
    }

    #[test]
    fn deny_subnet_is_normalized_on_save() {
        let (_dir, routers, store) = setup();
        let seq = Sequence::new("block", "Block DNS", 10).with_action(
            Action::new(0, "edge-1", CommandKind::DenyTraffic)
                .with_params(CommandParams::subnet("8.8.8.8")),
        );
        let saved = store.create(seq, &routers).unwrap();
        assert_eq!(saved.actions[0].params.ip.as_deref(), Some("8.8.8.8/32"));
        let loaded = store.get("block").unwrap();
        assert_eq!(loaded.actions[0].params.ip.as_deref(), Some("8.8.8.8/32"));
    }

    #[test]
    fn subnet_command_with_interface_is_rejected() {
        let mut seq = Sequence::new("block", "Block", 10).with_action(
            Action::new(0, "edge-1", CommandKind::ClearAllBlocks).on_interface("eth0"),
        );
        assert!(matches!(
            seq.normalize(),
            Err(ImpairError::ValidationFailed(_))
        ));
    }

    #[test]
    fn interface_command_without_interface_is_rejected() {
        let mut seq = Sequence::new("flap", "Flap", 10)
            .with_action(Action::new(0, "edge-1", CommandKind::InterfaceDown));
        assert!(matches!(
            seq.normalize(),
            Err(ImpairError::ValidationFailed(_))
        ));
    }

    #[test]
    fn unknown_router_or_interface_is_rejected() {
        let (_dir, routers, store) = setup();
        let seq = Sequence::new("ghost", "Ghost", 10).with_action(
            Action::new(0, "edge-9", CommandKind::InterfaceDown).on_interface("eth0"),
        );
        assert!(matches!(
            store.create(seq, &routers),
            Err(ImpairError::ValidationFailed(_))
        ));

        let seq = Sequence::new("ghost", "Ghost", 10).with_action(
            Action::new(0, "edge-1", CommandKind::InterfaceDown).on_interface("eth7"),
        );
        assert!(matches!(
            store.create(seq, &routers),
            Err(ImpairError::ValidationFailed(_))
        ));
    }

    #[test]
    fn duplicate_action_ids_are_rejected() {
        let mut seq = Sequence::new("dup", "Dup", 10)
            .with_action(
                Action::new(0, "edge-1", CommandKind::InterfaceDown)
                    .on_interface("eth0")
                    .with_id("x"),
            )
            .with_action(
                Action::new(1, "edge-1", CommandKind::InterfaceUp)
                    .on_interface("eth0")
                    .with_id("x"),
            );
        assert!(seq.normalize().is_err());
    }

    #[test]
    fn execution_order_is_by_offset_then_declaration() {
        let seq = Sequence::new("s", "S", 10)
            .with_action(Action::new(5, "edge-1", CommandKind::ClearAllBlocks).with_id("c"))
            .with_action(Action::new(0, "edge-1", CommandKind::ShowDenied).with_id("a"))
            .with_action(Action::new(5, "edge-1", CommandKind::ShowDenied).with_id("d"))
            .with_action(Action::new(0, "edge-1", CommandKind::ClearAllBlocks).with_id("b"));
        let ids: Vec<_> = seq.execution_order().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn update_with_shorter_cycle_clamps_and_keeps_last_run() {
        let (_dir, routers, store) = setup();
        store.create(flap(10), &routers).unwrap();
        let ran_at = Utc::now();
        store.record_run("flap", ran_at).unwrap();

        let mut edited = flap(10);
        edited.cycle_duration = 2;
        let saved = store.update(edited, &routers).unwrap();
        assert_eq!(saved.action("up").unwrap().offset, 2);
        assert_eq!(saved.last_run, Some(ran_at));
    }

    #[test]
    fn store_set_cycle_duration_clamps() {
        let (_dir, routers, store) = setup();
        store.create(flap(10), &routers).unwrap();
        store.set_cycle_duration("flap", 1).unwrap();
        let loaded = store.get("flap").unwrap();
        assert_eq!(loaded.cycle_duration, 1);
        assert!(loaded.actions.iter().all(|a| a.offset <= 1));
    }

    #[test]
    fn enable_disable_and_delete() {
        let (_dir, routers, store) = setup();
        store.create(flap(10), &routers).unwrap();
        assert!(!store.set_enabled("flap", false).unwrap().enabled);
        assert!(!store.get("flap").unwrap().enabled);
        store.delete("flap").unwrap();
        assert!(matches!(
            store.get("flap"),
            Err(ImpairError::SequenceNotFound(_))
        ));
    }

    #[test]
    fn concurrent_record_run_never_reverts_a_disable() {
        let (_dir, routers, store) = setup();
        store.create(flap(10), &routers).unwrap();

        for round in 0..200 {
            store.set_enabled("flap", true).unwrap();
            // A separately built handle shares the same record lock.
            let recorder = SequenceStore::new(store.root());
            let finished = std::thread::spawn(move || {
                recorder.record_run("flap", Utc::now()).unwrap();
            });
            store.set_enabled("flap", false).unwrap();
            finished.join().unwrap();

            let stored = store.get("flap").unwrap();
            assert!(!stored.enabled, "disable lost in round {round}");
            assert!(stored.last_run.is_some());
        }
    }

    #[test]
    fn record_run_keeps_the_newest_timestamp() {
        let (_dir, routers, store) = setup();
        store.create(flap(10), &routers).unwrap();
        let later = Utc::now();
        store.record_run("flap", later).unwrap();
        store
            .record_run("flap", later - chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(store.get("flap").unwrap().last_run, Some(later));
    }

    #[test]
    fn yaml_definition_fills_defaults() {
        let yaml = r#"
id: dns-block
name: DNS block
cycle_duration: 15
actions:
  - router: edge-1
    command: deny-traffic
    params:
      ip: 8.8.8.8/32
  - offset: 10
    router: edge-1
    command: allow-traffic
    params:
      ip: 8.8.8.8/32
"#;
        let seq: Sequence = serde_yaml::from_str(yaml).unwrap();
        assert!(seq.enabled);
        assert_eq!(seq.actions.len(), 2);
        assert_eq!(seq.actions[0].offset, 0);
        assert_ne!(seq.actions[0].id, seq.actions[1].id);
        assert!(seq.last_run.is_none());
    }
}
