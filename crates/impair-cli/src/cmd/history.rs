use super::require_init;
use crate::output::{or_dash, print_json, print_table};
use clap::{Args, Subcommand};
use impair_core::ledger::{group_runs, HistoryLedger, HistoryQuery};
use impair_core::paths;
use impair_core::types::{CommandKind, OutcomeStatus};
use std::path::Path;

#[derive(Args)]
pub struct HistoryFilter {
    /// Case-insensitive text match
    #[arg(long)]
    search: Option<String>,
    /// success | failed
    #[arg(long)]
    status: Option<OutcomeStatus>,
    /// Command kind, e.g. deny-traffic
    #[arg(long)]
    command: Option<CommandKind>,
    #[arg(long)]
    sequence: Option<String>,
    #[arg(long)]
    router: Option<String>,
    #[arg(long, default_value = "50")]
    limit: usize,
    #[arg(long, default_value = "0")]
    offset: usize,
}

impl From<HistoryFilter> for HistoryQuery {
    fn from(f: HistoryFilter) -> Self {
        HistoryQuery {
            search: f.search,
            status: f.status,
            command: f.command,
            sequence: f.sequence,
            router: f.router,
            limit: f.limit,
            offset: f.offset,
        }
    }
}

#[derive(Subcommand)]
pub enum HistorySubcommand {
    /// List recorded action outcomes, newest first
    List {
        #[command(flatten)]
        filter: HistoryFilter,
    },
    /// List outcomes clustered into runs
    Groups {
        #[command(flatten)]
        filter: HistoryFilter,
    },
    /// Delete every recorded outcome
    Purge {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

pub fn run(root: &Path, subcmd: HistorySubcommand, json: bool) -> anyhow::Result<()> {
    let config = require_init(root)?;
    let ledger = HistoryLedger::open(&paths::history_db_path(root))?;
    match subcmd {
        HistorySubcommand::List { filter } => list(&ledger, filter.into(), json),
        HistorySubcommand::Groups { filter } => {
            groups(&ledger, filter.into(), config.history.group_window_ms, json)
        }
        HistorySubcommand::Purge { yes } => purge(&ledger, yes, json),
    }
}

fn list(ledger: &HistoryLedger, query: HistoryQuery, json: bool) -> anyhow::Result<()> {
    let page = ledger.query(&query)?;
    if json {
        return print_json(&page);
    }
    if page.items.is_empty() {
        println!("No matching history.");
        return Ok(());
    }
    let rows = page
        .items
        .iter()
        .map(|o| {
            vec![
                o.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                o.sequence_id.clone(),
                o.router_id.clone(),
                or_dash(o.interface.as_deref()),
                o.command.to_string(),
                o.status.to_string(),
                or_dash(o.error.as_deref().or(o.detail.as_deref())),
            ]
        })
        .collect();
    print_table(
        &["TIME", "SEQUENCE", "ROUTER", "INTERFACE", "COMMAND", "STATUS", "NOTE"],
        rows,
    );
    println!(
        "\nShowing {}-{} of {}",
        page.offset + 1,
        page.offset + page.items.len(),
        page.total
    );
    Ok(())
}

fn groups(
    ledger: &HistoryLedger,
    query: HistoryQuery,
    window_ms: i64,
    json: bool,
) -> anyhow::Result<()> {
    let page = ledger.query(&query)?;
    let groups = group_runs(&page.items, window_ms);
    if json {
        return print_json(&groups);
    }
    if groups.is_empty() {
        println!("No matching history.");
        return Ok(());
    }
    let rows = groups
        .iter()
        .map(|g| {
            vec![
                g.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                g.sequence_id.clone(),
                g.status.to_string(),
                g.succeeded.to_string(),
                g.failed.to_string(),
            ]
        })
        .collect();
    print_table(&["STARTED", "SEQUENCE", "STATUS", "OK", "FAILED"], rows);
    Ok(())
}

fn purge(ledger: &HistoryLedger, yes: bool, json: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("refusing to purge history without --yes");
    }
    let removed = ledger.purge()?;
    if json {
        print_json(&serde_json::json!({ "removed": removed }))?;
    } else {
        println!("Removed {removed} outcome(s).");
    }
    Ok(())
}
