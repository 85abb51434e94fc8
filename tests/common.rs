#![allow(dead_code)]
use hopskip_rs::{AttackFloat, AttackParams, Classifier, ClassifierError, Diary, Sample};
use ndarray::{array, ArrayViewD, Axis};

/// Label 1 outside the closed unit ball, 0 inside.
pub struct UnitCircle;

impl Classifier for UnitCircle {
    fn predict(&self, images: ArrayViewD<AttackFloat>) -> Result<Vec<usize>, ClassifierError> {
        Ok(images
            .axis_iter(Axis(0))
            .map(|x| usize::from(x.iter().map(|v| v * v).sum::<AttackFloat>() > 1.))
            .collect())
    }
}

pub fn circle_params(iterations: usize) -> AttackParams {
    AttackParams {
        num_iterations: iterations,
        gamma: 0.01,
        clip_min: -3.,
        clip_max: 3.,
        initial_num_evals: 100,
        max_num_evals: 400,
        batch_size: 64,
        ..AttackParams::default()
    }
}

/// The origin, labeled clean, starting from `(x, y)`.
pub fn origin_from(x: AttackFloat, y: AttackFloat) -> Sample {
    Sample::new(array![0., 0.].into_dyn(), 0).with_start(array![x, y].into_dyn())
}

pub fn assert_monotone(diary: &Diary) {
    let mut distances = diary.distances();
    distances.insert(0, AttackFloat::INFINITY);
    assert!(
        distances.windows(2).all(|w| w[1] <= w[0]),
        "distances increased: {:?}",
        distances
    );
    let calls: Vec<usize> = diary.iterations.iter().map(|page| page.calls.end).collect();
    assert!(calls.windows(2).all(|w| w[0] <= w[1]), "{:?}", calls);
    assert!(diary.queries.raw_queries >= diary.queries.model_calls);
}
