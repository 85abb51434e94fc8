//! Boundary Locator: bisection along the segment between a clean and an adversarial point.
use crate::error::AttackError;
use crate::metric::Constraint;
use crate::oracle::{Aggregation, Classifier, DecisionOracle};
use crate::util::{clip, interpolate, l2_norm, linf_norm};
use crate::AttackFloat;
use log::{debug, trace};
use ndarray::{stack, ArrayD, ArrayViewD, Axis};
use ordered_float::OrderedFloat;

/// Doubling budget for walking away from the original in `project_outward`.
const MAX_OUTWARD_DOUBLINGS: usize = 64;

/// Result of a boundary search.
#[derive(Clone, Debug)]
pub struct Projection {
    /// Adversarial-side point within `theta` of the boundary along the search line.
    pub point: ArrayD<AttackFloat>,
    /// Metric distance from the clean endpoint (or the original, see `project_outward`).
    pub distance: AttackFloat,
    /// Interpolation parameter of `point` on the search line.
    pub t: AttackFloat,
    /// Number of bisection rounds.
    pub steps: usize,
    /// Position of the winning candidate in a batched search.
    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct BoundaryLocator {
    constraint: Constraint,
    theta: AttackFloat,
    sampling_freq: usize,
    aggregation: Aggregation,
    clip_min: AttackFloat,
    clip_max: AttackFloat,
}

impl BoundaryLocator {
    pub const fn new(
        constraint: Constraint,
        theta: AttackFloat,
        sampling_freq: usize,
        aggregation: Aggregation,
        bounds: (AttackFloat, AttackFloat),
    ) -> Self {
        Self {
            constraint,
            theta,
            sampling_freq,
            aggregation,
            clip_min: bounds.0,
            clip_max: bounds.1,
        }
    }

    pub const fn theta(&self) -> AttackFloat {
        self.theta
    }

    pub const fn constraint(&self) -> Constraint {
        self.constraint
    }

    pub fn clip(&self, x: ArrayD<AttackFloat>) -> ArrayD<AttackFloat> {
        clip(x, self.clip_min, self.clip_max)
    }

    /// Decision for one point under the locator's repeat policy.
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    pub fn is_adversarial<C: Classifier + ?Sized>(
        &self,
        oracle: &mut DecisionOracle<C>,
        point: &ArrayViewD<AttackFloat>,
    ) -> Result<bool, AttackError> {
        oracle.is_adversarial(point.clone(), self.sampling_freq, self.aggregation)
    }

    /// Decisions for a batch (leading axis) under the locator's repeat policy.
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    pub fn decide<C: Classifier + ?Sized>(
        &self,
        oracle: &mut DecisionOracle<C>,
        batch: &ArrayViewD<AttackFloat>,
    ) -> Result<Vec<bool>, AttackError> {
        oracle.decide(batch.clone(), self.sampling_freq, self.aggregation)
    }

    /// Bisects `t` in `[0, 1]` on `(1 - t) * clean + t * adversarial`.
    ///
    /// `point(low)` stays non-adversarial and `point(high)` adversarial; stops
    /// once `high - low <= theta` and returns `point(high)`. Takes at most
    /// `ceil(log2(1 / theta))` oracle decisions.
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    pub fn binary_search<C: Classifier + ?Sized>(
        &self,
        oracle: &mut DecisionOracle<C>,
        clean: &ArrayViewD<AttackFloat>,
        adversarial: &ArrayViewD<AttackFloat>,
    ) -> Result<Projection, AttackError> {
        let (mut low, mut high): (AttackFloat, AttackFloat) = (0., 1.);
        let mut steps = 0;
        while high - low > self.theta {
            let mid = (high + low) / 2.;
            let x_mid = interpolate(clean, adversarial, mid);
            if self.is_adversarial(oracle, &x_mid.view())? {
                high = mid;
            } else {
                low = mid;
            }
            steps += 1;
        }
        let point = interpolate(clean, adversarial, high);
        let distance = self.constraint.distance(&point.view(), clean);
        trace!("binary search: t = {} after {} steps", high, steps);
        Ok(Projection {
            point,
            distance,
            t: high,
            steps,
            index: 0,
        })
    }

    /// Bisects every candidate (stacked on the leading axis) at once, one
    /// batched decision per round, and keeps the closest projection.
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    ///
    /// # Panics
    /// If `candidates` is empty.
    pub fn binary_search_batch<C: Classifier + ?Sized>(
        &self,
        oracle: &mut DecisionOracle<C>,
        original: &ArrayViewD<AttackFloat>,
        candidates: &ArrayViewD<AttackFloat>,
    ) -> Result<Projection, AttackError> {
        let n = candidates.len_of(Axis(0));
        assert!(n > 0);
        let mut lows: Vec<AttackFloat> = vec![0.; n];
        let mut highs: Vec<AttackFloat> = vec![1.; n];
        let mut steps = 0;
        while lows
            .iter()
            .zip(&highs)
            .any(|(low, high)| high - low > self.theta)
        {
            let mids: Vec<AttackFloat> = lows
                .iter()
                .zip(&highs)
                .map(|(low, high)| (low + high) / 2.)
                .collect();
            let points: Vec<ArrayD<AttackFloat>> = candidates
                .axis_iter(Axis(0))
                .zip(&mids)
                .map(|(candidate, &mid)| interpolate(original, &candidate, mid))
                .collect();
            let views: Vec<ArrayViewD<AttackFloat>> = points.iter().map(|p| p.view()).collect();
            let batch = stack(Axis(0), &views).map_err(|_| AttackError::ShapeMismatch {
                expected: original.shape().to_vec(),
                given: candidates.shape().to_vec(),
            })?;
            let decisions = self.decide(oracle, &batch.view())?;
            for (i, is_adv) in decisions.into_iter().enumerate() {
                if is_adv {
                    highs[i] = mids[i];
                } else {
                    lows[i] = mids[i];
                }
            }
            steps += 1;
        }

        let (index, (point, distance, t)) = candidates
            .axis_iter(Axis(0))
            .zip(&highs)
            .map(|(candidate, &high)| {
                let point = interpolate(original, &candidate, high);
                let distance = self.constraint.distance(&point.view(), original);
                (point, distance, high)
            })
            .enumerate()
            .min_by_key(|(_, (_, distance, _))| OrderedFloat(*distance))
            .expect("candidates is non-empty");
        debug!(
            "batched binary search over {} candidates: best distance {}",
            n, distance
        );
        Ok(Projection {
            point,
            distance,
            t,
            steps,
            index,
        })
    }

    /// Projects an arbitrary `start` onto the boundary as seen from `original`.
    ///
    /// An adversarial `start` is bisected against `original` directly. Otherwise
    /// the point is pushed away from `original` with doubling steps until it
    /// turns adversarial, then bisected between `start` and that point. Returns
    /// `None` when clipping stalls the walk before the boundary is crossed.
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    pub fn project_outward<C: Classifier + ?Sized>(
        &self,
        oracle: &mut DecisionOracle<C>,
        original: &ArrayViewD<AttackFloat>,
        start: &ArrayViewD<AttackFloat>,
    ) -> Result<Option<Projection>, AttackError> {
        if self.is_adversarial(oracle, start)? {
            return self.binary_search(oracle, original, start).map(Some);
        }
        let offset = start - original;
        let norm = l2_norm(&offset.view());
        if norm == 0. {
            return Ok(None);
        }
        let direction = offset / norm;
        let mut c = 0.25;
        let mut prev = original.to_owned();
        for _ in 0..MAX_OUTWARD_DOUBLINGS {
            let x = self.clip(start + &(&direction * c));
            if linf_norm(&(&x - &prev).view()) == 0. {
                break;
            }
            if self.is_adversarial(oracle, &x.view())? {
                let mut projection = self.binary_search(oracle, start, &x.view())?;
                projection.distance = self.constraint.distance(&projection.point.view(), original);
                debug!("outward projection crossed the boundary at c = {}", c);
                return Ok(Some(projection));
            }
            prev = x;
            c += c;
        }
        debug!("outward projection stalled at c = {}", c);
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{HalfSpace, UnitCircle};
    use approx::assert_abs_diff_eq;
    use more_asserts::{assert_ge, assert_le};
    use ndarray::{array, Array};
    use proptest::prelude::*;

    fn locator(theta: AttackFloat) -> BoundaryLocator {
        BoundaryLocator::new(Constraint::L2, theta, 1, Aggregation::Majority, (-4., 4.))
    }

    #[test]
    fn test_binary_search_lands_on_circle() {
        let original = array![0., 0.].into_dyn();
        let candidate = array![2., 2.].into_dyn();
        let mut oracle = DecisionOracle::new(&UnitCircle, 0, 16);
        let proj = locator(1e-4)
            .binary_search(&mut oracle, &original.view(), &candidate.view())
            .unwrap();
        assert_ge!(proj.distance, 1.);
        assert_le!(proj.distance, 1. + 1e-4 * 8_f64.sqrt());
        assert!(oracle.is_adversarial(proj.point.view(), 1, Aggregation::Majority).unwrap());
    }

    #[test]
    fn test_batch_search_prefers_closest() {
        let original = array![0., 0.].into_dyn();
        let candidates = array![[3., 0.], [0.5, 2.], [-1.5, -1.5]].into_dyn();
        let mut oracle = DecisionOracle::new(&UnitCircle, 0, 16);
        let loc = locator(1e-3);
        let proj = loc
            .binary_search_batch(&mut oracle, &original.view(), &candidates.view())
            .unwrap();
        assert_ge!(proj.distance, 1.);
        assert_le!(proj.distance, 1. + 3e-3);
        let max_steps = (1. / loc.theta()).log2().ceil() as usize;
        assert_le!(proj.steps, max_steps);
    }

    #[test]
    fn test_batch_search_reports_winning_index() {
        // Boundary x0 = 1: only the first candidate meets it head on.
        let clf = HalfSpace::new(0, 1.);
        let original = array![0., 0.].into_dyn();
        let candidates = array![[2., 2.], [2., 0.], [3., -3.]].into_dyn();
        let mut oracle = DecisionOracle::new(&clf, 0, 16);
        let proj = locator(1e-3)
            .binary_search_batch(&mut oracle, &original.view(), &candidates.view())
            .unwrap();
        assert_eq!(proj.index, 1);
        assert_abs_diff_eq!(proj.distance, 1., epsilon = 3e-3);
    }

    #[test]
    fn test_project_outward_from_inside() {
        let original = array![0., 0.].into_dyn();
        let start = array![0.3, 0.4].into_dyn();
        let mut oracle = DecisionOracle::new(&UnitCircle, 0, 16);
        let proj = locator(1e-4)
            .project_outward(&mut oracle, &original.view(), &start.view())
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(proj.distance, 1., epsilon = 1e-3);
    }

    #[test]
    fn test_project_outward_stalls_when_clipped() {
        let original = array![0., 0.].into_dyn();
        let start = array![0.3, 0.4].into_dyn();
        let mut oracle = DecisionOracle::new(&UnitCircle, 0, 16);
        let tight = BoundaryLocator::new(Constraint::L2, 1e-4, 1, Aggregation::Majority, (-0.5, 0.5));
        assert!(tight
            .project_outward(&mut oracle, &original.view(), &start.view())
            .unwrap()
            .is_none());
    }

    proptest! {
        #[test]
        fn test_binary_search_call_bound(
            x in 1.1f64..3.5,
            y in -3.5f64..3.5,
            theta in 1e-6f64..0.2,
        ) {
            let original = Array::zeros(2).into_dyn();
            let candidate = array![x, y].into_dyn();
            let mut oracle = DecisionOracle::new(&UnitCircle, 0, 16);
            let proj = locator(theta)
                .binary_search(&mut oracle, &original.view(), &candidate.view())
                .unwrap();
            let bound = (1. / theta).log2().ceil() as usize;
            prop_assert!(oracle.model_calls() <= bound);
            prop_assert_eq!(proj.steps, oracle.model_calls());
            // The true crossing is at t* = 1 / |candidate|.
            let t_star = 1. / l2_norm(&candidate.view());
            prop_assert!(proj.t >= t_star && proj.t - t_star <= theta);
        }
    }
}
