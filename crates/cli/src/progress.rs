//! Terminal progress driven by runner events

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

use uibench_harness::RunEvent;

/// Render progress until the event channel closes
pub async fn track(mut events: UnboundedReceiver<RunEvent>, total_jobs: u64) {
    let bar = ProgressBar::new(total_jobs);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }

    while let Some(event) = events.recv().await {
        match event {
            RunEvent::ModelStarted { model_id, jobs } => {
                bar.println(format!("Model {} ({} jobs)", model_id, jobs));
            }
            RunEvent::Generating {
                model_id,
                framework,
                level,
            } => bar.set_message(format!("generating {}/{} with {}", framework, level, model_id)),
            RunEvent::GatesStarted {
                framework, level, ..
            } => bar.set_message(format!("gates {}/{}", framework, level)),
            RunEvent::GradingStarted { model_id, cases } => {
                bar.set_message(format!("grading {} screenshot pair(s) for {}", cases, model_id))
            }
            RunEvent::JobFinished(_) => bar.inc(1),
            RunEvent::ModelFinished { model_id } => {
                bar.println(format!("Model {} done", model_id));
            }
            RunEvent::SummaryWritten { .. } => bar.set_message("summary written"),
        }
    }
    bar.finish_and_clear();
}
