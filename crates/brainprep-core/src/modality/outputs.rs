//! Output variants and destination slots of a modality.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::BinaryKind;

/// The four user-facing output variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputVariant {
    RawSkull,
    NormalizedSkull,
    RawBet,
    NormalizedBet,
}

impl OutputVariant {
    pub const ALL: [OutputVariant; 4] = [
        OutputVariant::RawSkull,
        OutputVariant::NormalizedSkull,
        OutputVariant::RawBet,
        OutputVariant::NormalizedBet,
    ];

    /// Variants materialized before brain extraction.
    pub const SKULL: [OutputVariant; 2] = [OutputVariant::RawSkull, OutputVariant::NormalizedSkull];

    /// Variants materialized after brain extraction.
    pub const BET: [OutputVariant; 2] = [OutputVariant::RawBet, OutputVariant::NormalizedBet];

    pub fn is_normalized(&self) -> bool {
        matches!(self, OutputVariant::NormalizedSkull | OutputVariant::NormalizedBet)
    }

    pub fn is_skull_stripped(&self) -> bool {
        matches!(self, OutputVariant::RawBet | OutputVariant::NormalizedBet)
    }

    fn index(&self) -> usize {
        match self {
            OutputVariant::RawSkull => 0,
            OutputVariant::NormalizedSkull => 1,
            OutputVariant::RawBet => 2,
            OutputVariant::NormalizedBet => 3,
        }
    }
}

impl fmt::Display for OutputVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputVariant::RawSkull => "raw_skull",
            OutputVariant::NormalizedSkull => "normalized_skull",
            OutputVariant::RawBet => "raw_bet",
            OutputVariant::NormalizedBet => "normalized_bet",
        };
        f.write_str(name)
    }
}

/// Destinations for one output variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSlot {
    pub image: PathBuf,
    #[serde(default)]
    pub roi: Option<PathBuf>,
    #[serde(default)]
    pub biopsy: Option<PathBuf>,
}

impl OutputSlot {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            roi: None,
            biopsy: None,
        }
    }

    pub fn with_roi(mut self, roi: impl Into<PathBuf>) -> Self {
        self.roi = Some(roi.into());
        self
    }

    pub fn with_biopsy(mut self, biopsy: impl Into<PathBuf>) -> Self {
        self.biopsy = Some(biopsy.into());
        self
    }

    pub fn binary(&self, kind: BinaryKind) -> Option<&Path> {
        match kind {
            BinaryKind::Roi => self.roi.as_deref(),
            BinaryKind::Biopsy => self.biopsy.as_deref(),
        }
    }
}

/// Up to one slot per variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPaths {
    slots: [Option<OutputSlot>; 4],
}

impl OutputPaths {
    pub fn set(&mut self, variant: OutputVariant, slot: OutputSlot) {
        self.slots[variant.index()] = Some(slot);
    }

    pub fn get(&self, variant: OutputVariant) -> Option<&OutputSlot> {
        self.slots[variant.index()].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Configured slots in variant order.
    pub fn iter(&self) -> impl Iterator<Item = (OutputVariant, &OutputSlot)> {
        OutputVariant::ALL
            .into_iter()
            .filter_map(|variant| self.get(variant).map(|slot| (variant, slot)))
    }

    pub fn any_normalized(&self) -> bool {
        self.iter().any(|(variant, _)| variant.is_normalized())
    }

    pub fn any_skull_stripped(&self) -> bool {
        self.iter().any(|(variant, _)| variant.is_skull_stripped())
    }

    pub fn any_binary(&self, kind: BinaryKind) -> bool {
        self.iter().any(|(_, slot)| slot.binary(kind).is_some())
    }
}
