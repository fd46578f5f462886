use super::require_init;
use crate::output::{format_secs, print_json, print_table};
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use impair_core::cycle::{cycle_position, CyclePosition};
use impair_core::router::RouterDirectory;
use impair_core::sequence::{Sequence, SequenceStore};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum SequenceSubcommand {
    /// List sequences with their countdowns
    List,
    /// Show a sequence's actions in execution order
    Show { id: String },
    /// Create a sequence from a YAML definition
    Import {
        file: PathBuf,
        /// Replace an existing sequence with the same id
        #[arg(long)]
        replace: bool,
    },
    /// Include a sequence in automatic scheduling
    Enable { id: String },
    /// Exclude a sequence from automatic scheduling
    Disable { id: String },
    /// Change the repeat interval; offsets beyond it are clamped
    Cycle {
        id: String,
        /// Minutes between runs, 0 for manual only
        minutes: u32,
    },
    /// Remove a sequence
    Remove { id: String },
    /// Show where a sequence sits in its cycle
    Position { id: String },
}

pub fn run(root: &Path, subcmd: SequenceSubcommand, json: bool) -> anyhow::Result<()> {
    require_init(root)?;
    let store = SequenceStore::new(root);
    match subcmd {
        SequenceSubcommand::List => list(&store, json),
        SequenceSubcommand::Show { id } => show(&store, &id, json),
        SequenceSubcommand::Import { file, replace } => import(root, &store, &file, replace, json),
        SequenceSubcommand::Enable { id } => set_enabled(&store, &id, true, json),
        SequenceSubcommand::Disable { id } => set_enabled(&store, &id, false, json),
        SequenceSubcommand::Cycle { id, minutes } => cycle(&store, &id, minutes, json),
        SequenceSubcommand::Remove { id } => remove(&store, &id, json),
        SequenceSubcommand::Position { id } => position(&store, &id, json),
    }
}

fn countdown(p: &CyclePosition) -> String {
    if p.manual {
        "manual".into()
    } else if p.due {
        "due now".into()
    } else {
        format!("in {}", format_secs(p.remaining_seconds.unwrap_or(0)))
    }
}

fn list(store: &SequenceStore, json: bool) -> anyhow::Result<()> {
    let all = store.list()?;
    let now = Utc::now();
    if json {
        let items: Vec<_> = all
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "name": s.name,
                    "enabled": s.enabled,
                    "cycle_duration": s.cycle_duration,
                    "actions": s.actions.len(),
                    "last_run": s.last_run,
                    "position": cycle_position(now, s.last_run, s.cycle_duration),
                })
            })
            .collect();
        return print_json(&items);
    }
    if all.is_empty() {
        println!("No sequences. Import one with: impair sequence import <file.yaml>");
        return Ok(());
    }
    let rows = all
        .iter()
        .map(|s| {
            let pos = cycle_position(now, s.last_run, s.cycle_duration);
            vec![
                s.id.clone(),
                s.name.clone(),
                if s.enabled { "yes" } else { "no" }.to_string(),
                if s.is_manual() {
                    "manual".to_string()
                } else {
                    format!("{}m", s.cycle_duration)
                },
                s.actions.len().to_string(),
                s.last_run
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".into()),
                countdown(&pos),
            ]
        })
        .collect();
    print_table(
        &["ID", "NAME", "ENABLED", "CYCLE", "ACTIONS", "LAST RUN", "NEXT"],
        rows,
    );
    Ok(())
}

fn show(store: &SequenceStore, id: &str, json: bool) -> anyhow::Result<()> {
    let seq = store.get(id)?;
    if json {
        return print_json(&seq);
    }
    print_sequence(&seq);
    Ok(())
}

fn print_sequence(seq: &Sequence) {
    println!("Sequence: {} ({})", seq.id, seq.name);
    println!("Enabled:  {}", seq.enabled);
    if seq.is_manual() {
        println!("Cycle:    manual");
    } else {
        println!("Cycle:    every {} minutes", seq.cycle_duration);
    }
    if seq.actions.is_empty() {
        println!("\nNo actions.");
        return;
    }
    println!();
    let rows = seq
        .execution_order()
        .into_iter()
        .map(|a| {
            let params = a.params.summary();
            vec![
                format!("+{}m", a.offset),
                a.id.clone(),
                a.target(),
                a.command.to_string(),
                if params.is_empty() { "-".into() } else { params },
            ]
        })
        .collect();
    print_table(&["AT", "ACTION", "TARGET", "COMMAND", "PARAMS"], rows);
}

fn import(
    root: &Path,
    store: &SequenceStore,
    file: &Path,
    replace: bool,
    json: bool,
) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let seq: Sequence = serde_yaml::from_str(&data)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    let routers = RouterDirectory::new(root);

    let id = seq.id.clone();
    let saved = if replace && store.exists(&id) {
        store.update(seq, &routers)?
    } else {
        store.create(seq, &routers)?
    };

    if json {
        print_json(&saved)?;
    } else {
        println!(
            "Imported sequence '{}' with {} action(s).",
            saved.id,
            saved.actions.len()
        );
    }
    Ok(())
}

fn set_enabled(store: &SequenceStore, id: &str, enabled: bool, json: bool) -> anyhow::Result<()> {
    let seq = store.set_enabled(id, enabled)?;
    if json {
        print_json(&serde_json::json!({ "id": seq.id, "enabled": seq.enabled }))?;
    } else if enabled {
        println!("Enabled sequence '{id}'.");
    } else {
        println!("Disabled sequence '{id}'.");
    }
    Ok(())
}

fn cycle(store: &SequenceStore, id: &str, minutes: u32, json: bool) -> anyhow::Result<()> {
    let seq = store.set_cycle_duration(id, minutes)?;
    if json {
        print_json(&seq)?;
    } else if seq.is_manual() {
        println!("Sequence '{id}' is now manual only.");
    } else {
        println!("Sequence '{id}' now repeats every {minutes} minutes.");
    }
    Ok(())
}

fn remove(store: &SequenceStore, id: &str, json: bool) -> anyhow::Result<()> {
    store.delete(id)?;
    if json {
        print_json(&serde_json::json!({ "removed": id }))?;
    } else {
        println!("Removed sequence '{id}'.");
    }
    Ok(())
}

fn position(store: &SequenceStore, id: &str, json: bool) -> anyhow::Result<()> {
    let seq = store.get(id)?;
    let pos = cycle_position(Utc::now(), seq.last_run, seq.cycle_duration);
    if json {
        return print_json(&pos);
    }
    println!("{}: {}", seq.id, countdown(&pos));
    if let Some(elapsed) = pos.elapsed_seconds {
        println!("  last run {} ago", format_secs(elapsed));
    }
    if let Some(next) = pos.next_due_at {
        println!("  next due at {}", next.to_rfc3339());
    }
    Ok(())
}
