//! One exam: a center modality and the moving modalities aligned onto it.

use std::collections::HashSet;

use crate::error::{PreprocessError, Result};
use crate::modality::Modality;

/// Center modality plus zero or more moving modalities.
#[derive(Debug, Clone)]
pub struct Exam {
    center: Modality,
    moving: Vec<Modality>,
}

impl Exam {
    /// Build an exam. Modality names and the derived label names
    /// (`<name>_roi`, `<name>_biopsy`) must all be distinct because they
    /// determine artifact file names.
    pub fn new(center: Modality, moving: Vec<Modality>) -> Result<Self> {
        let mut seen = HashSet::new();
        for modality in std::iter::once(&center).chain(&moving) {
            if !seen.insert(modality.name().to_string()) {
                return Err(PreprocessError::invalid_configuration(format!(
                    "duplicate modality name {} in exam",
                    modality.name()
                )));
            }
        }
        for modality in std::iter::once(&center).chain(&moving) {
            for kind in modality.binaries() {
                let label = modality.binary_name(kind);
                if !seen.insert(label.clone()) {
                    return Err(PreprocessError::invalid_configuration(format!(
                        "{} of modality {} would share the file name {} with another artifact",
                        kind,
                        modality.name(),
                        label
                    )));
                }
            }
        }
        Ok(Self { center, moving })
    }

    pub fn center(&self) -> &Modality {
        &self.center
    }

    pub fn moving(&self) -> &[Modality] {
        &self.moving
    }

    /// Center first, then moving modalities in order.
    pub fn modalities(&self) -> impl Iterator<Item = &Modality> {
        std::iter::once(&self.center).chain(self.moving.iter())
    }

    pub fn modality(&self, name: &str) -> Option<&Modality> {
        self.modalities().find(|m| m.name() == name)
    }

    /// Borrow the center and the moving modalities independently.
    pub fn split_mut(&mut self) -> (&mut Modality, &mut [Modality]) {
        (&mut self.center, &mut self.moving)
    }

    /// True iff any modality has a skull-stripped output configured.
    pub fn requires_brain_extraction(&self) -> bool {
        self.modalities().any(Modality::requires_brain_extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modality::{OutputSlot, OutputVariant};

    fn modality(name: &str, variant: OutputVariant) -> Modality {
        Modality::builder(name, format!("/in/{name}.nii.gz"))
            .output(variant, OutputSlot::new(format!("/out/{name}.nii.gz")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Exam::new(
            modality("t1c", OutputVariant::RawSkull),
            vec![modality("t1c", OutputVariant::RawSkull)],
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_label_names_must_not_shadow_modalities() {
        let center = Modality::builder("t1c", "/in/t1c.nii.gz")
            .roi("/in/t1c_roi.nii.gz")
            .output(OutputVariant::RawSkull, OutputSlot::new("/out/t1c.nii.gz"))
            .build()
            .unwrap();
        let err = Exam::new(center.clone(), vec![modality("t1c_roi", OutputVariant::RawSkull)]).unwrap_err();
        assert!(err.is_configuration(), "{err}");

        // Without the ROI there is nothing to collide with.
        let plain = modality("t1c", OutputVariant::RawSkull);
        assert!(Exam::new(plain, vec![modality("t1c_roi", OutputVariant::RawSkull)]).is_ok());
        assert!(Exam::new(center, vec![modality("t2", OutputVariant::RawSkull)]).is_ok());
    }

    #[test]
    fn test_brain_extraction_gate() {
        let exam = Exam::new(
            modality("t1c", OutputVariant::RawSkull),
            vec![modality("t2", OutputVariant::RawSkull)],
        )
        .unwrap();
        assert!(!exam.requires_brain_extraction());

        let exam = Exam::new(
            modality("t1c", OutputVariant::RawSkull),
            vec![modality("t2", OutputVariant::RawBet)],
        )
        .unwrap();
        assert!(exam.requires_brain_extraction());
        assert_eq!(
            exam.modalities().map(Modality::name).collect::<Vec<_>>(),
            vec!["t1c", "t2"]
        );
    }
}
