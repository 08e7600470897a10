//! Summary of a completed run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use brainprep_core::{ArtifactKind, OutputVariant, Stage};

/// One file written at a caller-requested output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedOutput {
    pub modality: String,
    pub variant: OutputVariant,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed { elapsed: Duration },
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// What a successful [`Preprocessor::run`](crate::Preprocessor::run) produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outputs: Vec<MaterializedOutput>,
    pub stages: Vec<StageReport>,
    /// Scratch workspace left on disk, if it was kept.
    pub workspace: Option<PathBuf>,
}

impl RunReport {
    pub(crate) fn record_stage(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push(StageReport { stage, outcome });
    }

    pub(crate) fn record_output(
        &mut self,
        modality: &str,
        variant: OutputVariant,
        kind: ArtifactKind,
        path: &Path,
    ) {
        self.outputs.push(MaterializedOutput {
            modality: modality.to_string(),
            variant,
            kind,
            path: path.to_path_buf(),
        });
    }

    pub fn stage_outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| s.outcome)
    }

    pub fn was_skipped(&self, stage: Stage) -> bool {
        self.stage_outcome(stage) == Some(StageOutcome::Skipped)
    }

    pub fn outputs_for<'a>(&'a self, modality: &'a str) -> impl Iterator<Item = &'a MaterializedOutput> {
        self.outputs.iter().filter(move |o| o.modality == modality)
    }

    pub fn outputs_of(&self, variant: OutputVariant) -> impl Iterator<Item = &MaterializedOutput> {
        self.outputs.iter().filter(move |o| o.variant == variant)
    }

    pub fn total_elapsed(&self) -> Duration {
        self.stages
            .iter()
            .map(|s| match s.outcome {
                StageOutcome::Completed { elapsed } => elapsed,
                StageOutcome::Skipped => Duration::ZERO,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brainprep_core::BinaryKind;

    #[test]
    fn test_queries() {
        let mut report = RunReport::default();
        report.record_stage(
            Stage::Coregistration,
            StageOutcome::Completed {
                elapsed: Duration::from_secs(2),
            },
        );
        report.record_stage(Stage::BrainExtraction, StageOutcome::Skipped);
        report.record_output("t1c", OutputVariant::RawSkull, ArtifactKind::Image, Path::new("/o/t1c.nii.gz"));
        report.record_output(
            "t1c",
            OutputVariant::RawSkull,
            ArtifactKind::Binary(BinaryKind::Roi),
            Path::new("/o/t1c_roi.nii.gz"),
        );
        report.record_output("t2", OutputVariant::RawSkull, ArtifactKind::Image, Path::new("/o/t2.nii.gz"));

        assert!(report.was_skipped(Stage::BrainExtraction));
        assert!(!report.was_skipped(Stage::Coregistration));
        assert_eq!(report.stage_outcome(Stage::AtlasCorrection), None);
        assert_eq!(report.outputs_for("t1c").count(), 2);
        assert_eq!(report.outputs_of(OutputVariant::RawBet).count(), 0);
        assert_eq!(report.total_elapsed(), Duration::from_secs(2));
    }
}
