// src/cli/progress.rs — Terminal progress renderer for loop runs

use crate::core::types::ProgressEvent;

/// Build a progress callback that writes formatted output to stderr.
///
/// All progress output goes to stderr so stdout stays clean for the summary.
/// Returns a closure suitable for `AgentLoop::with_progress()`.
pub fn terminal_progress(verbose: bool) -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| {
        if let Some(line) = format_event(&event, verbose) {
            eprintln!("{line}");
        }
    }
}

/// One line per event. Phase changes and per-simulation lines only show
/// in verbose mode.
pub fn format_event(event: &ProgressEvent, verbose: bool) -> Option<String> {
    match event {
        ProgressEvent::IterationStart {
            iteration,
            max_iterations,
            target_criticality,
        } => Some(format!(
            "[iter {iteration}/{max_iterations}] criticality {target_criticality}/10"
        )),
        ProgressEvent::PhaseChanged { iteration, phase } if verbose => {
            Some(format!("[iter {iteration}]   {phase}..."))
        }
        ProgressEvent::PhaseChanged { .. } => None,
        ProgressEvent::PersonaDiscarded {
            iteration,
            name,
            reason,
        } => Some(format!("[iter {iteration}]   discarded persona '{name}': {reason}")),
        ProgressEvent::SimulationFinished {
            iteration,
            persona,
            success,
            abort_reason,
        } if verbose => Some(match abort_reason {
            Some(reason) if !success => format!("[iter {iteration}]   {persona}: aborted ({reason})"),
            _ => format!("[iter {iteration}]   {persona}: completed"),
        }),
        ProgressEvent::SimulationFinished { .. } => None,
        ProgressEvent::VersionAppended {
            iteration,
            module,
            version,
        } => Some(format!("[iter {iteration}]   {module} -> v{version}")),
        ProgressEvent::IterationEnd {
            iteration,
            mean_satisfaction,
            convergence_score,
            changes_proposed,
        } => Some(format!(
            "[iter {iteration}] satisfaction={mean_satisfaction:.1} convergence={convergence_score:.2} changes={changes_proposed}"
        )),
        ProgressEvent::Complete {
            iterations,
            converged,
            exit_reason,
        } => Some(format!(
            "[done] {exit_reason} after {iterations} iteration(s){}",
            if *converged { "" } else { " (not converged)" }
        )),
    }
}
