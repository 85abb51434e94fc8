//! Monte-Carlo estimate of the boundary normal from hard-label probes.
use crate::error::AttackError;
use crate::metric::Constraint;
use crate::oracle::{Classifier, DecisionOracle};
use crate::util::{clip, l2_norm};
use crate::AttackFloat;
use itertools::Itertools;
use log::{debug, trace};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use rand::Rng;

#[derive(Clone, Debug)]
pub struct GradientEstimate {
    /// Unit-norm estimate of the outward normal.
    pub direction: ArrayD<AttackFloat>,
    pub probes: usize,
    /// False when every probe agreed and the raw scores were used.
    pub baseline_subtracted: bool,
}

#[derive(Clone, Debug)]
pub struct GradientEstimator {
    constraint: Constraint,
    initial_num_evals: usize,
    max_num_evals: usize,
    grad_queries: usize,
    batch_size: usize,
    clip_min: AttackFloat,
    clip_max: AttackFloat,
}

impl GradientEstimator {
    pub fn new(
        constraint: Constraint,
        initial_num_evals: usize,
        max_num_evals: usize,
        grad_queries: usize,
        batch_size: usize,
        bounds: (AttackFloat, AttackFloat),
    ) -> Self {
        Self {
            constraint,
            initial_num_evals,
            max_num_evals,
            grad_queries: grad_queries.max(1),
            batch_size: batch_size.max(1),
            clip_min: bounds.0,
            clip_max: bounds.1,
        }
    }

    /// Evaluation budget at iteration `step`, growing with `sqrt(step)` up to the cap.
    pub fn num_evals(&self, step: usize) -> usize {
        let grown = self.initial_num_evals as AttackFloat * (step as AttackFloat).sqrt();
        (grown as usize).min(self.max_num_evals)
    }

    /// Number of distinct probes for an evaluation budget; each is queried `grad_queries` times.
    pub fn num_probes(&self, num_evals: usize) -> usize {
        (num_evals / self.grad_queries).max(1)
    }

    /// Estimates the boundary normal at `sample` from `num_probes` probes of radius `delta`.
    ///
    /// # Errors
    /// `DegenerateGradient` when the accumulated direction has zero or
    /// non-finite norm; classifier failures are returned unmodified.
    pub fn estimate<C: Classifier + ?Sized, R: Rng>(
        &self,
        oracle: &mut DecisionOracle<C>,
        rng: &mut R,
        sample: &ArrayViewD<AttackFloat>,
        num_probes: usize,
        delta: AttackFloat,
    ) -> Result<GradientEstimate, AttackError> {
        let q = self.grad_queries as AttackFloat;
        let mut fvals: Vec<AttackFloat> = Vec::with_capacity(num_probes);
        let mut directions: Vec<ArrayD<AttackFloat>> = Vec::new();

        let mut remaining = num_probes;
        while remaining > 0 {
            let batch = remaining.min(self.batch_size);
            let rv = self.constraint.random_vectors(batch, sample.shape(), rng);
            let probes = clip(&(&rv * delta) + sample, self.clip_min, self.clip_max);
            // Clipping shortens some probes; follow the direction actually taken.
            let effective = (&probes - sample) / delta;
            let counts = oracle.decide_counts(probes.view(), self.grad_queries)?;
            fvals.extend(counts.into_iter().map(|c| 2. * c as AttackFloat - q));
            directions.push(effective);
            remaining -= batch;
        }

        let mean = fvals.iter().sum::<AttackFloat>() / fvals.len() as AttackFloat;
        let unanimous = (mean / q).abs() == 1.;
        let vals: Vec<AttackFloat> = if unanimous {
            fvals
        } else {
            fvals.into_iter().map(|f| f - mean).collect()
        };

        let mut sum_directions = ArrayD::<AttackFloat>::zeros(IxDyn(sample.shape()));
        vals.iter()
            .zip_eq(directions.iter().flat_map(|d| d.axis_iter(Axis(0))))
            .for_each(|(&val, r)| sum_directions.scaled_add(val, &r));

        let gradf = sum_directions / (num_probes as AttackFloat * q);
        let norm = l2_norm(&gradf.view());
        if !norm.is_finite() || norm == 0. {
            debug!(
                "degenerate gradient from {} probes (delta = {})",
                num_probes, delta
            );
            return Err(AttackError::DegenerateGradient { probes: num_probes });
        }
        trace!(
            "gradient from {} probes, mean score {}, centered: {}",
            num_probes,
            mean,
            !unanimous
        );
        Ok(GradientEstimate {
            direction: gradf / norm,
            probes: num_probes,
            baseline_subtracted: !unanimous,
        })
    }
}
