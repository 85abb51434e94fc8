//! Sample and per-sample attack state.
use crate::util::clip;
use crate::AttackFloat;
use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};

/// An input to attack with its ground-truth label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub image: ArrayD<AttackFloat>,
    pub label: usize,
    /// Optional known adversarial point to start from.
    pub start: Option<ArrayD<AttackFloat>>,
}

impl Sample {
    pub const fn new(image: ArrayD<AttackFloat>, label: usize) -> Self {
        Self {
            image,
            label,
            start: None,
        }
    }

    pub fn with_start(mut self, start: ArrayD<AttackFloat>) -> Self {
        self.start = Some(start);
        self
    }
}

/// Mutable state of one sample's attack.
///
/// The driver creates a fresh value per sample and is its only writer. Once a
/// perturbed point is set it is adversarial.
#[derive(Clone, Debug)]
pub struct Adversarial {
    true_label: usize,
    perturbed: Option<ArrayD<AttackFloat>>,
    distance: AttackFloat,
    normalized_distance: AttackFloat,
}

impl Adversarial {
    pub fn new(sample: &Sample) -> Self {
        Self {
            true_label: sample.label,
            perturbed: None,
            distance: AttackFloat::INFINITY,
            normalized_distance: AttackFloat::INFINITY,
        }
    }

    pub const fn true_label(&self) -> usize {
        self.true_label
    }

    pub fn perturbed(&self) -> Option<ArrayViewD<AttackFloat>> {
        self.perturbed.as_ref().map(ArrayD::view)
    }

    pub const fn is_set(&self) -> bool {
        self.perturbed.is_some()
    }

    /// Distance under the active metric, infinite until a point is set.
    pub const fn distance(&self) -> AttackFloat {
        self.distance
    }

    pub const fn normalized_distance(&self) -> AttackFloat {
        self.normalized_distance
    }

    /// Stores a caller-provided start, clipped into the value range.
    ///
    /// The distance stays unknown until the driver has checked and projected it.
    pub fn set_starting_point(&mut self, start: ArrayD<AttackFloat>, bounds: (AttackFloat, AttackFloat)) {
        self.perturbed = Some(clip(start, bounds.0, bounds.1));
        self.distance = AttackFloat::INFINITY;
        self.normalized_distance = AttackFloat::INFINITY;
    }

    pub fn clear(&mut self) {
        self.perturbed = None;
        self.distance = AttackFloat::INFINITY;
        self.normalized_distance = AttackFloat::INFINITY;
    }

    pub fn update(
        &mut self,
        perturbed: ArrayD<AttackFloat>,
        distance: AttackFloat,
        normalized_distance: AttackFloat,
    ) {
        self.perturbed = Some(perturbed);
        self.distance = distance;
        self.normalized_distance = normalized_distance;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fresh_state_is_unset() {
        let sample = Sample::new(array![0.1, 0.2].into_dyn(), 3);
        let adv = Adversarial::new(&sample);
        assert!(!adv.is_set());
        assert_eq!(adv.true_label(), 3);
        assert!(adv.distance().is_infinite());
    }

    #[test]
    fn test_starting_point_is_clipped() {
        let sample = Sample::new(array![0.5, 0.5].into_dyn(), 0);
        let mut adv = Adversarial::new(&sample);
        adv.set_starting_point(array![1.5, -0.5].into_dyn(), (0., 1.));
        assert_eq!(adv.perturbed().unwrap(), array![1., 0.].into_dyn());
        adv.update(array![0.9, 0.1].into_dyn(), 0.56, 0.16);
        assert_eq!(adv.distance(), 0.56);
        adv.clear();
        assert!(!adv.is_set());
    }
}
