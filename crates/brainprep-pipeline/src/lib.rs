//! Pipeline orchestration for multi-modal brain MRI preprocessing.
//!
//! [`Preprocessor`] drives an [`Exam`](brainprep_core::Exam) through four
//! stages: coregistration onto the center modality, atlas registration,
//! optional atlas correction and optional brain extraction. Intermediate
//! artifacts live in a scoped [`Workspace`] that is removed on every exit
//! path; requested outputs are materialized at the caller's paths.

pub mod config;
pub mod preprocessor;
pub mod progress;
pub mod report;
pub mod workspace;

pub use config::{apply_environment_overrides, apply_overrides, load_config, PreprocessorConfig};
pub use preprocessor::{Preprocessor, SaveDirs};
pub use progress::{HistoryObserver, PipelineEvent, PipelineObserver, TracingObserver};
pub use report::{MaterializedOutput, RunReport, StageOutcome, StageReport};
pub use workspace::Workspace;
