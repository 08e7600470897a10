//! Core types for multi-modal brain MRI preprocessing.
//!
//! A [`Modality`] tracks the artifacts of one imaging channel through the
//! pipeline stages; an [`Exam`] groups a center modality with the moving
//! modalities aligned onto it. Registration, brain extraction, normalization
//! and the volume codec are collaborators behind the traits in
//! [`collaborators`].

pub mod artifact;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod exam;
pub mod modality;
pub mod normalization;

pub use artifact::{ArtifactKind, ArtifactRecord, ArtifactRef, ArtifactTrack, BinaryKind, Stage, TransformRef};
pub use collaborators::{
    BrainExtractor, ExtractionRequest, Interpolation, Normalizer, RegistrationRequest, Registrator,
    TransformRequest, VolumeData, VolumeIo,
};
pub use config::{DeviceSelection, ResolvedDevice, RunConfig, RunContext};
pub use error::{PreprocessError, Result};
pub use exam::Exam;
pub use modality::{Modality, ModalityBuilder, OutputPaths, OutputSlot, OutputVariant, StageOutput};
pub use normalization::PercentileNormalizer;
