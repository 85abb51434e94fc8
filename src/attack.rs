//! Attack Driver: runs the boundary attack sample by sample.
//!
//! Each sample goes through `Uninitialized -> Initializing -> BoundaryProjected
//! -> Iterating(1) -> ... -> Done`. A sample owns its oracle, its state and its
//! diary, so samples can run on separate workers without sharing anything but
//! the classifier.
use crate::adversarial::{Adversarial, Sample};
use crate::boundary::BoundaryLocator;
use crate::diary::{epoch_now, Diary, DiaryPage, PageOutcome};
use crate::error::AttackError;
use crate::gradient::GradientEstimator;
use crate::oracle::{Classifier, DecisionOracle};
use crate::params::AttackParams;
use crate::stepsize::StepSizeSearch;
use crate::util::lower_median;
use crate::AttackFloat;
use log::{debug, info, trace, warn};
use ndarray::{Array, ArrayD, ArrayViewD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackPhase {
    Uninitialized,
    Initializing,
    BoundaryProjected,
    /// 1-based index of the running iteration.
    Iterating(usize),
    Done,
}

impl AttackPhase {
    /// Whether `next` may directly follow `self`.
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Done, _) => false,
            (_, Self::Done) => true,
            (Self::Uninitialized, Self::Initializing)
            | (Self::Initializing, Self::BoundaryProjected)
            | (Self::BoundaryProjected, Self::Iterating(1)) => true,
            (Self::Iterating(k), Self::Iterating(j)) => j == k + 1,
            _ => false,
        }
    }
}

/// Diaries of every attacked sample plus the summary statistic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttackReport {
    /// Lower median of the final normalized distances of samples that ran
    /// at least one iteration.
    pub median: Option<AttackFloat>,
    pub diaries: Vec<Diary>,
}

impl AttackReport {
    pub fn from_diaries(diaries: Vec<Diary>) -> Self {
        let finals: Vec<AttackFloat> = diaries
            .iter()
            .filter(|diary| !diary.is_failed())
            .filter_map(Diary::final_distance)
            .collect();
        Self {
            median: lower_median(&finals),
            diaries,
        }
    }

    pub fn num_failed(&self) -> usize {
        self.diaries.iter().filter(|diary| diary.is_failed()).count()
    }

    /// # Errors
    /// Serialization failures from `serde_json`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Everything one sample's attack mutates.
struct SampleRun<'a, C: ?Sized> {
    oracle: DecisionOracle<'a, C>,
    locator: BoundaryLocator,
    adv: Adversarial,
    diary: Diary,
    phase: AttackPhase,
    dim: usize,
}

impl<'a, C: Classifier + ?Sized> SampleRun<'a, C> {
    fn advance(&mut self, next: AttackPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "{:?} -> {:?}",
            self.phase,
            next
        );
        trace!("phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    fn calls(&self) -> usize {
        self.oracle.model_calls()
    }
}

pub struct Attack<'c, C: ?Sized> {
    classifier: &'c C,
    params: AttackParams,
    estimator: GradientEstimator,
}

impl<'c, C: Classifier + ?Sized> Attack<'c, C> {
    /// # Errors
    /// When `params` does not validate.
    pub fn new(classifier: &'c C, params: AttackParams) -> Result<Self, AttackError> {
        params.validate()?;
        let estimator = GradientEstimator::new(
            params.constraint,
            params.initial_num_evals,
            params.max_num_evals,
            params.grad_queries,
            params.batch_size,
            params.bounds(),
        );
        debug!("attack configured: {:?}", params);
        Ok(Self {
            classifier,
            params,
            estimator,
        })
    }

    pub const fn params(&self) -> &AttackParams {
        &self.params
    }

    fn locator(&self, dim: usize) -> BoundaryLocator {
        let theta = self.params.constraint.theta(self.params.gamma, dim);
        BoundaryLocator::new(
            self.params.constraint,
            theta,
            self.params.sampling_freq_binsearch,
            self.params.aggregation,
            self.params.bounds(),
        )
    }

    fn normalized(&self, dist: AttackFloat, dim: usize) -> AttackFloat {
        self.params
            .constraint
            .normalized_distance(dist, dim, self.params.value_range())
    }

    /// Attacks every sample in order for `num_iterations` iterations.
    ///
    /// Sample `i` draws from a generator seeded with `seed + i`, so the result
    /// matches [`Self::attack_parallel`] for deterministic classifiers.
    ///
    /// # Errors
    /// Only classifier failures; per-sample failures end up in the diaries.
    pub fn attack(&self, samples: &[Sample]) -> Result<AttackReport, AttackError> {
        let diaries = samples
            .iter()
            .enumerate()
            .map(|(i, sample)| self.attack_indexed(i, sample))
            .collect::<Result<Vec<_>, _>>()?;
        let report = AttackReport::from_diaries(diaries);
        info!(
            "attacked {} samples ({} failed), median distance {:?}",
            samples.len(),
            report.num_failed(),
            report.median
        );
        Ok(report)
    }

    /// Same as [`Self::attack`] with samples spread over the rayon pool.
    ///
    /// # Errors
    /// Only classifier failures; per-sample failures end up in the diaries.
    pub fn attack_parallel(&self, samples: &[Sample]) -> Result<AttackReport, AttackError> {
        let diaries = samples
            .par_iter()
            .enumerate()
            .map(|(i, sample)| self.attack_indexed(i, sample))
            .collect::<Result<Vec<_>, _>>()?;
        let report = AttackReport::from_diaries(diaries);
        info!(
            "attacked {} samples in parallel ({} failed), median distance {:?}",
            samples.len(),
            report.num_failed(),
            report.median
        );
        Ok(report)
    }

    fn attack_indexed(&self, index: usize, sample: &Sample) -> Result<Diary, AttackError> {
        info!("Attacking sample {}", index);
        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(index as u64));
        self.attack_one(sample, self.params.num_iterations, &mut rng)
    }

    /// # Errors
    /// Only classifier failures; per-sample failures are recorded in the diary.
    pub fn attack_one<R: Rng>(
        &self,
        sample: &Sample,
        iterations: usize,
        rng: &mut R,
    ) -> Result<Diary, AttackError> {
        self.attack_one_with(sample, iterations, rng, |_, _| true)
    }

    /// Like [`Self::attack_one`], asking `should_continue` before every
    /// iteration whether to go on. Stopping early still yields a valid diary.
    ///
    /// # Errors
    /// Only classifier failures; per-sample failures are recorded in the diary.
    pub fn attack_one_with<R, F>(
        &self,
        sample: &Sample,
        iterations: usize,
        rng: &mut R,
        mut should_continue: F,
    ) -> Result<Diary, AttackError>
    where
        R: Rng,
        F: FnMut(usize, &Adversarial) -> bool,
    {
        let dim = sample.image.len();
        let mut run = SampleRun {
            oracle: DecisionOracle::new(self.classifier, sample.label, self.params.batch_size),
            locator: self.locator(dim.max(1)),
            adv: Adversarial::new(sample),
            diary: Diary::new(sample.image.clone(), sample.label),
            phase: AttackPhase::Uninitialized,
            dim,
        };
        match self.run(&mut run, sample, iterations, rng, &mut should_continue) {
            Ok(()) => {}
            Err(err) if err.is_per_sample() => {
                warn!("giving up on sample: {}", err);
                run.diary.failure = Some(err.to_string());
            }
            Err(err) => return Err(err),
        }
        run.advance(AttackPhase::Done);
        run.diary.queries = run.oracle.counter();
        Ok(run.diary)
    }

    fn run<R, F>(
        &self,
        run: &mut SampleRun<C>,
        sample: &Sample,
        iterations: usize,
        rng: &mut R,
        should_continue: &mut F,
    ) -> Result<(), AttackError>
    where
        R: Rng,
        F: FnMut(usize, &Adversarial) -> bool,
    {
        let original = sample.image.view();
        if run.dim == 0 {
            return Err(AttackError::ShapeMismatch {
                expected: vec![1],
                given: original.shape().to_vec(),
            });
        }
        if let Some(start) = &sample.start {
            if start.shape() != original.shape() {
                return Err(AttackError::ShapeMismatch {
                    expected: original.shape().to_vec(),
                    given: start.shape().to_vec(),
                });
            }
        }

        run.advance(AttackPhase::Initializing);
        let start = self.initialize(run, &original, sample.start.as_ref(), rng)?;
        run.diary.epoch_initialization = Some(epoch_now());
        run.diary.initialization_calls = run.calls();
        run.diary.initial_image = Some(start.clone());

        let projection = run
            .locator
            .binary_search(&mut run.oracle, &original, &start.view())?;
        let normalized = self.normalized(projection.distance, run.dim);
        run.adv
            .update(projection.point.clone(), projection.distance, normalized);
        run.diary.epoch_initial_bin_search = Some(epoch_now());
        run.diary.calls_initial_bin_search = run.calls();
        run.diary.initial_projection = Some(projection.point.clone());
        run.advance(AttackPhase::BoundaryProjected);
        info!(
            "initial distance {} after {} calls",
            normalized,
            run.calls()
        );

        let mut current = projection.point;
        let mut dist_post_update = projection.distance;
        for step in 1..=iterations {
            if !should_continue(step, &run.adv) {
                info!("stopped before iteration {}", step);
                break;
            }
            run.advance(AttackPhase::Iterating(step));
            let page = self.iterate(run, &original, &current.view(), dist_post_update, step, rng)?;
            if page.outcome == PageOutcome::Moved {
                current = page.perturbed.clone();
                dist_post_update = page.distance;
                run.adv
                    .update(current.clone(), page.distance, page.normalized_distance);
            }
            run.diary.iterations.push(page);
        }
        Ok(())
    }

    /// Finds an adversarial point to start from: the caller's start if it is
    /// adversarial, its outward projection otherwise, and uniform noise last.
    fn initialize<R: Rng>(
        &self,
        run: &mut SampleRun<C>,
        original: &ArrayViewD<AttackFloat>,
        start: Option<&ArrayD<AttackFloat>>,
        rng: &mut R,
    ) -> Result<ArrayD<AttackFloat>, AttackError> {
        if let Some(start) = start {
            run.adv.set_starting_point(start.clone(), self.params.bounds());
            if let Some(point) = run.adv.perturbed().map(|p| p.to_owned()) {
                if run.locator.is_adversarial(&mut run.oracle, &point.view())? {
                    debug!("using the provided starting point");
                    return Ok(point);
                }
                warn!("provided starting point is not adversarial, projecting outward");
                if let Some(projection) =
                    run.locator
                        .project_outward(&mut run.oracle, original, &point.view())?
                {
                    return Ok(projection.point);
                }
                warn!("outward projection stalled, falling back to random initialization");
                run.adv.clear();
            }
        }

        info!("Initializing starting point...");
        let (clip_min, clip_max) = self.params.bounds();
        for attempt in 1..=self.params.max_init_attempts {
            let noise: ArrayD<AttackFloat> = Array::random_using(
                IxDyn(original.shape()),
                Uniform::new_inclusive(clip_min, clip_max),
                rng,
            );
            if run.locator.is_adversarial(&mut run.oracle, &noise.view())? {
                debug!("random starting point found after {} attempts", attempt);
                return Ok(noise);
            }
        }
        Err(AttackError::NoAdversarialStart {
            attempts: self.params.max_init_attempts,
        })
    }

    /// One gradient-step-project round from `current`.
    ///
    /// Per-iteration failures and rejected moves close the page with the
    /// incoming point unchanged.
    fn iterate<R: Rng>(
        &self,
        run: &mut SampleRun<C>,
        original: &ArrayViewD<AttackFloat>,
        current: &ArrayViewD<AttackFloat>,
        dist_post_update: AttackFloat,
        step: usize,
        rng: &mut R,
    ) -> Result<DiaryPage, AttackError> {
        let params = &self.params;
        let dist = run.adv.distance();
        let mut page = DiaryPage::open(
            step,
            run.calls(),
            current.to_owned(),
            dist,
            run.adv.normalized_distance(),
        );

        let delta = params.constraint.delta(
            step,
            dist_post_update,
            run.locator.theta(),
            run.dim,
            params.value_range(),
        );
        let num_evals = self.estimator.num_evals(step);
        let mut num_probes = self.estimator.num_probes(num_evals);
        page.num_eval_det = num_evals;
        page.delta = delta;

        let mut estimate = self
            .estimator
            .estimate(&mut run.oracle, rng, current, num_probes, delta);
        let mut retries = 0;
        while matches!(estimate, Err(AttackError::DegenerateGradient { .. }))
            && retries < params.degenerate_retries
        {
            retries += 1;
            num_probes *= 2;
            debug!("retrying gradient estimate with {} probes", num_probes);
            estimate = self
                .estimator
                .estimate(&mut run.oracle, rng, current, num_probes, delta);
        }
        page.num_probes = num_probes;
        page.mark_approx_grad(run.calls());
        let grad = match estimate {
            Ok(estimate) => estimate.direction,
            Err(err) if err.is_per_iteration() => {
                warn!("iteration {}: {}; keeping the current point", step, err);
                page.outcome = PageOutcome::DegenerateGradient;
                page.close(run.calls());
                return Ok(page);
            }
            Err(err) => return Err(err),
        };

        let update = params.constraint.update_direction(&grad.view());
        let searched = params.stepsize_search.search(
            &mut run.oracle,
            &run.locator,
            original,
            current,
            &update.view(),
            dist,
            step,
        );
        page.mark_step_search(run.calls());
        let outcome = match searched {
            Ok(outcome) => outcome,
            Err(err) if err.is_per_iteration() => {
                warn!("iteration {}: {}; keeping the current point", step, err);
                page.outcome = PageOutcome::StepStall;
                page.close(run.calls());
                return Ok(page);
            }
            Err(err) => return Err(err),
        };

        let projection = match outcome.projection {
            Some(projection) => projection,
            None => run
                .locator
                .binary_search(&mut run.oracle, original, &outcome.stepped.view())?,
        };
        page.mark_bin_search(run.calls());
        page.epsilon = Some(outcome.epsilon);
        page.approx_grad = Some(outcome.stepped);
        page.bin_search = Some(projection.point.clone());

        if projection.distance <= dist {
            page.normalized_distance = self.normalized(projection.distance, run.dim);
            page.distance = projection.distance;
            page.perturbed = projection.point;
            page.outcome = PageOutcome::Moved;
        } else {
            debug!(
                "rejecting projection at distance {} (current {})",
                projection.distance, dist
            );
            page.outcome = PageOutcome::Rejected;
        }
        page.close(run.calls());
        info!(
            "iteration {}: distance {} ({} calls)",
            step,
            page.normalized_distance,
            page.calls.end
        );
        Ok(page)
    }
}
