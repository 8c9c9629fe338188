// src/cli/history.rs — `tuneloop history`: past runs and their iterations

use crate::core::types::IterationRecord;
use crate::memory::store::{RunRow, Store};

pub fn show_history(store: &Store, run: Option<&str>, limit: u32) -> anyhow::Result<()> {
    match run {
        Some(id) => show_run(store, id),
        None => {
            let runs = store.list_runs(limit)?;
            if runs.is_empty() {
                println!("No runs yet. Start one with `tuneloop run`.");
                return Ok(());
            }
            for r in &runs {
                println!("{}", format_run_row(r));
            }
            Ok(())
        }
    }
}

fn show_run(store: &Store, run_id: &str) -> anyhow::Result<()> {
    let records = store.list_iteration_records(run_id)?;
    if records.is_empty() {
        anyhow::bail!("no iterations recorded for run '{run_id}'");
    }
    println!("Run {run_id}");
    for r in &records {
        println!("{}", format_record(r));
        for issue in r.metrics.top_issues.iter().take(3) {
            println!("      issue x{}: {}", issue.count, issue.text);
        }
    }
    if let Some(summary) = store.run_summary(run_id)? {
        println!(
            "  finished: {} (converged: {})",
            summary.exit_reason, summary.converged
        );
    } else {
        println!("  unfinished");
    }
    Ok(())
}

pub fn format_run_row(r: &RunRow) -> String {
    let status = match (&r.exit_reason, r.iterations) {
        (Some(reason), Some(n)) => format!("{reason} after {n} iteration(s)"),
        _ => "unfinished".to_string(),
    };
    let satisfaction = r
        .final_satisfaction
        .map(|s| format!("{s:.1}"))
        .unwrap_or_else(|| "-".into());
    format!(
        "{}  {}  {:<40} satisfaction {}",
        short_id(&r.id),
        r.started_at,
        status,
        satisfaction
    )
}

pub fn format_record(r: &IterationRecord) -> String {
    format!(
        "  [{}] criticality {:>2}  sims {}  satisfaction {:.1}  success {:.0}%  convergence {:.2}  changes {}",
        r.iteration,
        r.target_criticality,
        r.simulation_ids.len(),
        r.metrics.mean_satisfaction,
        r.metrics.success_rate * 100.0,
        r.convergence_score,
        r.changes_proposed
    )
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
