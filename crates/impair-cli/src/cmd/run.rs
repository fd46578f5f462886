use super::require_init;
use crate::output::print_json;
use impair_core::events::{OrchestratorEvent, StepEvent};
use impair_core::types::{OutcomeStatus, StepStatus};
use impair_core::Orchestrator;
use std::path::Path;

/// Run a sequence in this process, printing steps as they fire.
///
/// Offsets are honored, so a sequence with late actions keeps the command
/// in the foreground until the last one has executed.
pub fn run(root: &Path, sequence_id: &str, json: bool) -> anyhow::Result<()> {
    require_init(root)?;
    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let (orchestrator, _control) = Orchestrator::open(root)?;
        let mut rx = orchestrator.events().subscribe();
        let printer = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    OrchestratorEvent::Step(step) if !json => print_step(&step),
                    OrchestratorEvent::Step(_) => {}
                    OrchestratorEvent::Completed(_) => break,
                }
            }
        });

        match orchestrator.run_now(sequence_id).await {
            Ok(summary) => {
                let _ = printer.await;
                Ok::<_, anyhow::Error>(summary)
            }
            Err(e) => {
                printer.abort();
                Err(e.into())
            }
        }
    })?;

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "\n{} '{}': {}/{} succeeded in {}s",
            match summary.status {
                OutcomeStatus::Success => "Completed",
                OutcomeStatus::Failed => "Failed",
            },
            summary.sequence_id,
            summary.succeeded,
            summary.total,
            (summary.completed_at - summary.started_at).num_seconds()
        );
    }

    if summary.failed > 0 {
        anyhow::bail!("{} of {} action(s) failed", summary.failed, summary.total);
    }
    Ok(())
}

fn print_step(step: &StepEvent) {
    let status = match step.status {
        StepStatus::Running => "running",
        StepStatus::Success => "ok",
        StepStatus::Failed => "FAILED",
    };
    let line = format!(
        "[{}/{}] {:<16} {status}",
        step.step + 1,
        step.total_steps,
        step.action_id
    );
    match &step.error {
        Some(err) => println!("{line}: {err}"),
        None => println!("{line}"),
    }
}
