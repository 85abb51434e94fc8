//! Step-Size Controller strategies.
//!
//! A strategy is chosen once when the attack is configured. Geometric
//! progression only picks the step and leaves re-projection to the driver;
//! grid search has to project every candidate to choose among them and hands
//! back the winning projection.
use crate::boundary::{BoundaryLocator, Projection};
use crate::error::AttackError;
use crate::oracle::{Classifier, DecisionOracle};
use crate::AttackFloat;
use enum_dispatch::enum_dispatch;
use log::{debug, warn};
use ndarray::{stack, Array1, ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug)]
pub struct StepOutcome {
    /// Step length along the update direction.
    pub epsilon: AttackFloat,
    /// Clipped point after the move, before re-projection.
    pub stepped: ArrayD<AttackFloat>,
    /// Projection of `stepped`, when the strategy already computed it.
    pub projection: Option<Projection>,
}

#[enum_dispatch]
pub trait StepSizeSearch {
    /// Moves `perturbed` along `update` so that the moved point stays adversarial.
    ///
    /// `dist` is the current distance to `original` and `step` the 1-based iteration.
    ///
    /// # Errors
    /// `StepStall` when no tried step stays adversarial; classifier failures
    /// are returned unmodified.
    fn search<C: Classifier + ?Sized>(
        &self,
        oracle: &mut DecisionOracle<C>,
        locator: &BoundaryLocator,
        original: &ArrayViewD<AttackFloat>,
        perturbed: &ArrayViewD<AttackFloat>,
        update: &ArrayViewD<AttackFloat>,
        dist: AttackFloat,
        step: usize,
    ) -> Result<StepOutcome, AttackError>;
}

/// Halve `dist / sqrt(step)` until the moved point is adversarial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometricProgression {
    pub max_halvings: usize,
}

impl Default for GeometricProgression {
    fn default() -> Self {
        Self { max_halvings: 64 }
    }
}

impl GeometricProgression {
    /// Halving count at which a long search is reported, halfway through the budget.
    pub const fn warn_at(&self) -> Option<usize> {
        match self.max_halvings / 2 {
            0 => None,
            half => Some(half),
        }
    }
}

impl StepSizeSearch for GeometricProgression {
    fn search<C: Classifier + ?Sized>(
        &self,
        oracle: &mut DecisionOracle<C>,
        locator: &BoundaryLocator,
        _original: &ArrayViewD<AttackFloat>,
        perturbed: &ArrayViewD<AttackFloat>,
        update: &ArrayViewD<AttackFloat>,
        dist: AttackFloat,
        step: usize,
    ) -> Result<StepOutcome, AttackError> {
        let mut epsilon = dist / (step.max(1) as AttackFloat).sqrt();
        let warn_at = self.warn_at();
        for halvings in 0..=self.max_halvings {
            if Some(halvings) == warn_at {
                warn!("Decreased epsilon {} times (epsilon = {})", halvings, epsilon);
            }
            let stepped = locator.clip(perturbed + &(update * epsilon));
            if locator.is_adversarial(oracle, &stepped.view())? {
                debug!("step size {} after {} halvings", epsilon, halvings);
                return Ok(StepOutcome {
                    epsilon,
                    stepped,
                    projection: None,
                });
            }
            epsilon /= 2.;
        }
        warn!(
            "step size search stalled after {} halvings (epsilon = {})",
            self.max_halvings, epsilon
        );
        Err(AttackError::StepStall {
            attempts: self.max_halvings + 1,
        })
    }
}

/// Try `num_scales` log-spaced scales of `dist` in one batch and keep the best projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSearch {
    pub num_scales: usize,
}

impl Default for GridSearch {
    fn default() -> Self {
        Self { num_scales: 20 }
    }
}

impl GridSearch {
    /// Scales spanning `1e-4 * dist ..= dist`.
    pub fn epsilons(&self, dist: AttackFloat) -> Array1<AttackFloat> {
        Array1::logspace(10., -4., 0., self.num_scales) * dist
    }
}

impl StepSizeSearch for GridSearch {
    fn search<C: Classifier + ?Sized>(
        &self,
        oracle: &mut DecisionOracle<C>,
        locator: &BoundaryLocator,
        original: &ArrayViewD<AttackFloat>,
        perturbed: &ArrayViewD<AttackFloat>,
        update: &ArrayViewD<AttackFloat>,
        dist: AttackFloat,
        _step: usize,
    ) -> Result<StepOutcome, AttackError> {
        let epsilons = self.epsilons(dist);
        let moved: Vec<ArrayD<AttackFloat>> = epsilons
            .iter()
            .map(|&eps| locator.clip(perturbed + &(update * eps)))
            .collect();
        let views: Vec<ArrayViewD<AttackFloat>> = moved.iter().map(|m| m.view()).collect();
        let shape_err = || AttackError::ShapeMismatch {
            expected: perturbed.shape().to_vec(),
            given: update.shape().to_vec(),
        };
        let batch = stack(Axis(0), &views).map_err(|_| shape_err())?;
        let decisions = locator.decide(oracle, &batch.view())?;

        let adversarial: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter_map(|(i, &is_adv)| is_adv.then(|| i))
            .collect();
        if adversarial.is_empty() {
            warn!("no adversarial scale among {} candidates", self.num_scales);
            return Err(AttackError::StepStall {
                attempts: self.num_scales,
            });
        }
        let kept: Vec<ArrayViewD<AttackFloat>> = adversarial.iter().map(|&i| views[i].clone()).collect();
        let kept = stack(Axis(0), &kept).map_err(|_| shape_err())?;
        let projection = locator.binary_search_batch(oracle, original, &kept.view())?;
        let chosen = adversarial[projection.index];
        debug!(
            "grid search kept {} of {} scales, chose epsilon {}",
            adversarial.len(),
            self.num_scales,
            epsilons[chosen]
        );
        Ok(StepOutcome {
            epsilon: epsilons[chosen],
            stepped: moved[chosen].clone(),
            projection: Some(projection),
        })
    }
}

#[enum_dispatch(StepSizeSearch)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSizeStrategy {
    GeometricProgression,
    GridSearch,
}

impl Default for StepSizeStrategy {
    fn default() -> Self {
        GeometricProgression::default().into()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metric::Constraint;
    use crate::oracle::Aggregation;
    use crate::test_util::{Constant, UnitCircle};
    use approx::assert_abs_diff_eq;
    use more_asserts::{assert_ge, assert_le};
    use ndarray::array;

    fn locator() -> BoundaryLocator {
        BoundaryLocator::new(Constraint::L2, 1e-4, 1, Aggregation::Majority, (-4., 4.))
    }

    #[test]
    fn test_geometric_keeps_full_step_when_adversarial() {
        let original = array![0., 0.].into_dyn();
        let perturbed = array![1.0001, 0.].into_dyn();
        let update = array![1., 0.].into_dyn();
        let mut oracle = DecisionOracle::new(&UnitCircle, 0, 8);
        let out = GeometricProgression::default()
            .search(
                &mut oracle,
                &locator(),
                &original.view(),
                &perturbed.view(),
                &update.view(),
                1.0001,
                4,
            )
            .unwrap();
        assert_abs_diff_eq!(out.epsilon, 1.0001 / 2.);
        assert_abs_diff_eq!(out.stepped[[0]], 1.0001 * 1.5);
        assert!(out.projection.is_none());
        assert_eq!(oracle.model_calls(), 1);
    }

    #[test]
    fn test_geometric_halves_toward_boundary() {
        // Moving inward is only adversarial for tiny steps.
        let original = array![0., 0.].into_dyn();
        let perturbed = array![1.5, 0.].into_dyn();
        let update = array![-1., 0.].into_dyn();
        let mut oracle = DecisionOracle::new(&UnitCircle, 0, 8);
        let out = GeometricProgression::default()
            .search(
                &mut oracle,
                &locator(),
                &original.view(),
                &perturbed.view(),
                &update.view(),
                1.5,
                1,
            )
            .unwrap();
        assert_abs_diff_eq!(out.epsilon, 0.375);
        assert!(out.stepped[[0]] > 1.);
    }

    #[test]
    fn test_geometric_reports_stall() {
        let clf = Constant(0);
        let original = array![0., 0.].into_dyn();
        let perturbed = array![1., 0.].into_dyn();
        let update = array![1., 0.].into_dyn();
        let mut oracle = DecisionOracle::new(&clf, 0, 8);
        let result = GeometricProgression { max_halvings: 10 }.search(
            &mut oracle,
            &locator(),
            &original.view(),
            &perturbed.view(),
            &update.view(),
            1.,
            1,
        );
        assert!(matches!(result, Err(AttackError::StepStall { attempts: 11 })));
        assert_eq!(oracle.model_calls(), 11);
    }

    #[test]
    fn test_halving_warning_fits_budget() {
        let default = GeometricProgression::default();
        assert_eq!(default.warn_at(), Some(32));
        assert!(default.warn_at().unwrap() < default.max_halvings);
        assert_eq!(GeometricProgression { max_halvings: 1 }.warn_at(), None);
        assert_eq!(GeometricProgression { max_halvings: 10 }.warn_at(), Some(5));
    }

    #[test]
    fn test_grid_epsilons() {
        let eps = GridSearch::default().epsilons(2.);
        assert_eq!(eps.len(), 20);
        assert_abs_diff_eq!(eps[0], 2e-4, epsilon = 1e-12);
        assert_abs_diff_eq!(eps[19], 2., epsilon = 1e-12);
    }

    #[test]
    fn test_grid_search_picks_closest_projection() {
        let original = array![0., 0.].into_dyn();
        let perturbed = array![0.8, 0.8].into_dyn();
        let update = array![0.6, -0.8].into_dyn();
        let mut oracle = DecisionOracle::new(&UnitCircle, 0, 32);
        let strategy: StepSizeStrategy = GridSearch::default().into();
        let out = strategy
            .search(
                &mut oracle,
                &locator(),
                &original.view(),
                &perturbed.view(),
                &update.view(),
                1.13,
                1,
            )
            .unwrap();
        let projection = out.projection.unwrap();
        assert_ge!(projection.distance, 1.);
        assert_le!(projection.distance, 1.001);
        assert!(oracle.is_adversarial(out.stepped.view(), 1, Aggregation::Majority).unwrap());
    }

    #[test]
    fn test_grid_search_stall() {
        let clf = Constant(0);
        let original = array![0., 0.].into_dyn();
        let perturbed = array![1., 0.].into_dyn();
        let update = array![1., 0.].into_dyn();
        let mut oracle = DecisionOracle::new(&clf, 0, 8);
        let strategy: StepSizeStrategy = GridSearch { num_scales: 5 }.into();
        assert!(matches!(
            strategy.search(
                &mut oracle,
                &locator(),
                &original.view(),
                &perturbed.view(),
                &update.view(),
                1.,
                1
            ),
            Err(AttackError::StepStall { attempts: 5 })
        ));
    }

    #[test]
    fn test_strategy_serde_tag() {
        let json = serde_json::to_string(&StepSizeStrategy::default()).unwrap();
        assert_eq!(json, r#"{"kind":"geometric_progression","max_halvings":64}"#);
        let parsed: StepSizeStrategy =
            serde_json::from_str(r#"{"kind":"grid_search","num_scales":8}"#).unwrap();
        assert_eq!(parsed, GridSearch { num_scales: 8 }.into());
    }
}
