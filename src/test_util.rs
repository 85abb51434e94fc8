#![cfg(test)]
use crate::error::ClassifierError;
use crate::oracle::{Classifier, LogitModel};
use crate::util::l2_norm;
use crate::AttackFloat;
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, Axis};
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Label 1 outside the closed unit ball, 0 inside.
#[derive(Clone, Copy, Debug)]
pub struct UnitCircle;

impl Classifier for UnitCircle {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        Ok(images
            .axis_iter(Axis(0))
            .map(|x| usize::from(l2_norm(&x) > 1.))
            .collect())
    }
}

/// Label 1 iff the flattened coordinate `axis` exceeds `threshold`.
#[derive(Clone, Copy, Debug)]
pub struct HalfSpace {
    axis: usize,
    threshold: AttackFloat,
}

impl HalfSpace {
    pub const fn new(axis: usize, threshold: AttackFloat) -> Self {
        Self { axis, threshold }
    }
}

impl Classifier for HalfSpace {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        Ok(images
            .axis_iter(Axis(0))
            .map(|x| usize::from(x.iter().nth(self.axis).map_or(false, |&v| v > self.threshold)))
            .collect())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Constant(pub usize);

impl Classifier for Constant {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        Ok(vec![self.0; images.len_of(Axis(0))])
    }
}

/// Replays a fixed label sequence, one label per image, wrapping around.
#[derive(Debug)]
pub struct ScriptedClassifier {
    script: Vec<usize>,
    cursor: AtomicUsize,
    batch_len: Option<usize>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<usize>) -> Self {
        assert!(!script.is_empty());
        Self {
            script,
            cursor: AtomicUsize::new(0),
            batch_len: None,
        }
    }

    /// Always answers with `len` labels, whatever the batch size.
    pub fn with_batch_len(mut self, len: usize) -> Self {
        self.batch_len = Some(len);
        self
    }

    pub fn rewind(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }
}

impl Classifier for ScriptedClassifier {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        let n = self.batch_len.unwrap_or_else(|| images.len_of(Axis(0)));
        Ok((0..n)
            .map(|_| {
                let i = self.cursor.fetch_add(1, Ordering::SeqCst);
                self.script[i % self.script.len()]
            })
            .collect())
    }
}

/// Always fails, as an unreachable remote model would.
#[derive(Clone, Copy, Debug)]
pub struct Offline;

impl Classifier for Offline {
    fn predict(&self, _images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        Err(ClassifierError::Unavailable {
            reason: "offline".to_string(),
        })
    }
}

/// Two-class logits `[0, x0]` per image.
#[derive(Clone, Copy, Debug)]
pub struct LinearLogits;

impl LogitModel for LinearLogits {
    fn logits(&self, images: ArrayViewD<AttackFloat>) -> Result<Array2<AttackFloat>, ClassifierError> {
        let n = images.len_of(Axis(0));
        Ok(Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                0.
            } else {
                images.index_axis(Axis(0), i).iter().next().copied().unwrap_or(0.)
            }
        }))
    }
}

prop_compose! {
    pub fn array1(len: usize)(v in Vec::lift1_with(-3. .. 3., SizeRange::new(len..=len))) -> Array1<AttackFloat> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    /// A point strictly outside the unit ball and inside `[-3, 3]^len`.
    pub fn outside_unit_ball(len: usize)(x in array1(len).prop_filter("inside unit ball", |x| l2_norm(&x.view().into_dyn()) > 1.05)) -> ArrayD<AttackFloat> {
        x.into_dyn()
    }
}
