//! Progress and error side channel for pipeline runs.
//!
//! Observers are notified as stages start, finish or are skipped, and when
//! a run fails. They never influence the run itself.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use brainprep_core::{PreprocessError, Stage};

use crate::report::RunReport;

/// Callbacks for monitoring a [`Preprocessor`](crate::Preprocessor) run.
pub trait PipelineObserver: Send + Sync {
    /// Called once before the first stage.
    fn on_run_start(&self, _center: &str, _moving: &[String]) {}

    fn on_stage_start(&self, _stage: Stage) {}

    fn on_stage_complete(&self, _stage: Stage, _elapsed: Duration) {}

    fn on_stage_skipped(&self, _stage: Stage, _reason: &str) {}

    /// Called once after all outputs are materialized.
    fn on_run_complete(&self, _report: &RunReport) {}

    /// Called when `stage` fails; the run aborts afterwards.
    fn on_error(&self, _stage: Stage, _error: &PreprocessError) {}
}

/// Observer writing run banners and stage timings to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_run_start(&self, center: &str, moving: &[String]) {
        tracing::info!("{:=^80}", " Starting preprocessing ");
        tracing::info!(
            "Received center modality: {} and moving modalities: {}",
            center,
            moving.join(", ")
        );
    }

    fn on_stage_start(&self, stage: Stage) {
        let banner = match Stage::PIPELINE.iter().position(|s| *s == stage) {
            Some(index) => format!(" Starting {} ({}/{}) ", stage, index + 1, Stage::PIPELINE.len()),
            None => format!(" Starting {} ", stage),
        };
        tracing::info!("{:-^80}", banner);
    }

    fn on_stage_complete(&self, stage: Stage, elapsed: Duration) {
        tracing::info!("{} complete in {:.2}s", stage, elapsed.as_secs_f64());
    }

    fn on_stage_skipped(&self, stage: Stage, reason: &str) {
        tracing::info!("{:-^80}", format!(" Skipping {} ", stage));
        tracing::info!("{}", reason);
    }

    fn on_run_complete(&self, report: &RunReport) {
        tracing::info!(
            "Wrote {} outputs in {:.2}s",
            report.outputs.len(),
            report.total_elapsed().as_secs_f64()
        );
        tracing::info!("{:=^80}", " Preprocessing complete ");
    }

    fn on_error(&self, stage: Stage, error: &PreprocessError) {
        tracing::error!("{} failed: {}", stage, error);
    }
}

/// Event recorded by [`HistoryObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    RunStarted { center: String, moving: Vec<String> },
    StageStarted(Stage),
    StageCompleted(Stage),
    StageSkipped(Stage),
    RunCompleted { outputs: usize },
    Failed { stage: Stage, message: String },
}

/// Observer that records every event in order.
#[derive(Debug, Clone, Default)]
pub struct HistoryObserver {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl HistoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the recorded events.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn push(&self, event: PipelineEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PipelineEvent>> {
        // A panicking observer elsewhere must not hide the history.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PipelineObserver for HistoryObserver {
    fn on_run_start(&self, center: &str, moving: &[String]) {
        self.push(PipelineEvent::RunStarted {
            center: center.to_string(),
            moving: moving.to_vec(),
        });
    }

    fn on_stage_start(&self, stage: Stage) {
        self.push(PipelineEvent::StageStarted(stage));
    }

    fn on_stage_complete(&self, stage: Stage, _elapsed: Duration) {
        self.push(PipelineEvent::StageCompleted(stage));
    }

    fn on_stage_skipped(&self, stage: Stage, _reason: &str) {
        self.push(PipelineEvent::StageSkipped(stage));
    }

    fn on_run_complete(&self, report: &RunReport) {
        self.push(PipelineEvent::RunCompleted {
            outputs: report.outputs.len(),
        });
    }

    fn on_error(&self, stage: Stage, error: &PreprocessError) {
        self.push(PipelineEvent::Failed {
            stage,
            message: error.to_string(),
        });
    }
}
