//! The black-box classifier seam and label-noise wrappers around it.
use crate::error::ClassifierError;
use crate::AttackFloat;
use log::trace;
use ndarray::{Array2, ArrayViewD, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A hard-label classifier.
///
/// `images` carries the batch along its leading axis and exactly one label must
/// be returned per image. Implementations must be safe to call from several
/// sample-level workers at once.
pub trait Classifier: Send + Sync {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError>;
}

impl<C: Classifier + ?Sized> Classifier for &C {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        (**self).predict(images)
    }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        (**self).predict(images)
    }
}

impl<C: Classifier + ?Sized> Classifier for Arc<C> {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        (**self).predict(images)
    }
}

fn lock_rng(rng: &Mutex<StdRng>) -> Result<std::sync::MutexGuard<'_, StdRng>, ClassifierError> {
    rng.lock().map_err(|_| ClassifierError::Unavailable {
        reason: "noise generator lock poisoned".to_string(),
    })
}

/// Flips each prediction to a uniformly random different label with probability `flip_prob`.
#[derive(Debug)]
pub struct NoisyClassifier<C> {
    inner: C,
    flip_prob: AttackFloat,
    num_classes: usize,
    rng: Mutex<StdRng>,
}

impl<C: Classifier> NoisyClassifier<C> {
    /// # Panics
    /// If `flip_prob` is outside `[0, 1]` or fewer than two classes are given.
    pub fn new(inner: C, flip_prob: AttackFloat, num_classes: usize, seed: u64) -> Self {
        assert!((0. ..=1.).contains(&flip_prob));
        assert!(num_classes > 1);
        Self {
            inner,
            flip_prob,
            num_classes,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl<C: Classifier> Classifier for NoisyClassifier<C> {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        let mut labels = self.inner.predict(images)?;
        let mut rng = lock_rng(&self.rng)?;
        let mut flipped = 0;
        for label in &mut labels {
            if rng.gen_bool(self.flip_prob) {
                // Draw from the other `num_classes - 1` labels.
                let draw = rng.gen_range(0..self.num_classes - 1);
                *label = if draw >= *label { draw + 1 } else { draw };
                flipped += 1;
            }
        }
        trace!("flipped {} of {} predictions", flipped, labels.len());
        Ok(labels)
    }
}

/// A model exposing unnormalized class scores, one row per image.
pub trait LogitModel: Send + Sync {
    fn logits(&self, images: ArrayViewD<AttackFloat>) -> Result<Array2<AttackFloat>, ClassifierError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sampling {
    /// Deterministic top-1 label.
    Argmax,
    /// Sample the label from the softmax of the logits.
    Softmax,
}

/// Turns a [`LogitModel`] into a hard-label [`Classifier`].
#[derive(Debug)]
pub struct SoftmaxClassifier<M> {
    model: M,
    sampling: Sampling,
    rng: Mutex<StdRng>,
}

impl<M: LogitModel> SoftmaxClassifier<M> {
    pub fn new(model: M, sampling: Sampling, seed: u64) -> Self {
        Self {
            model,
            sampling,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl<M: LogitModel> Classifier for SoftmaxClassifier<M> {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        let logits = self.model.logits(images)?;
        match self.sampling {
            Sampling::Argmax => Ok(logits
                .axis_iter(Axis(0))
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .fold((0, AttackFloat::NEG_INFINITY), |best, (idx, &v)| {
                            if v > best.1 {
                                (idx, v)
                            } else {
                                best
                            }
                        })
                        .0
                })
                .collect()),
            Sampling::Softmax => {
                let mut rng = lock_rng(&self.rng)?;
                logits
                    .axis_iter(Axis(0))
                    .map(|row| {
                        let max = row.fold(AttackFloat::NEG_INFINITY, |m, &v| m.max(v));
                        let weights: Vec<AttackFloat> = row.iter().map(|v| (v - max).exp()).collect();
                        let dist = WeightedIndex::new(&weights)
                            .map_err(|err| ClassifierError::Other(Box::new(err)))?;
                        Ok(dist.sample(&mut *rng))
                    })
                    .collect()
            }
        }
    }
}
