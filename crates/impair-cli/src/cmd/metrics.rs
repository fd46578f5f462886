use super::require_init;
use crate::output::print_json;
use chrono::Utc;
use impair_core::Orchestrator;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    require_init(root)?;
    let (orchestrator, _control) = Orchestrator::open(root)?;
    let snapshot = orchestrator.metrics(Utc::now())?;
    if json {
        return print_json(&snapshot);
    }
    let h = &snapshot.history;
    println!("Actions:            {}", h.total_actions);
    println!("Runs:               {}", h.total_runs);
    println!("Success rate:       {:.1}%", h.success_rate);
    println!("Failures (1h):      {}", h.failures_last_hour);
    println!("Actions (24h):      {}", h.actions_last_24h);
    println!("Active sequences:   {}", snapshot.active_sequences);
    if let Some(top) = &h.most_targeted_router {
        println!("Most targeted:      {} ({} actions)", top.router_id, top.actions);
    }
    if let Some(at) = h.last_outcome_at {
        println!("Last action:        {}", at.to_rfc3339());
    }
    Ok(())
}
