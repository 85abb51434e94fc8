//! Per-iteration telemetry ("diary pages") and the per-sample run artifact.
//!
//! The attack only ever appends to a [`Diary`]; reading it back is left to
//! whoever persists or plots the run.
use crate::oracle::QueryCounter;
use crate::AttackFloat;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0., |d| d.as_secs_f64())
}

/// Values recorded at each phase boundary of an iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMarks<T> {
    pub start: T,
    pub approx_grad: T,
    pub step_search: T,
    pub bin_search: T,
    pub end: T,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    /// The re-projected point was accepted.
    Moved,
    /// The re-projected point was farther than the current one and was dropped.
    Rejected,
    /// No usable gradient direction; the point was left in place.
    DegenerateGradient,
    /// No step size kept the point adversarial; the point was left in place.
    StepStall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiaryPage {
    pub step: usize,
    pub time: PhaseMarks<f64>,
    pub calls: PhaseMarks<usize>,
    /// Evaluation budget and probes actually used for the gradient estimate.
    pub num_eval_det: usize,
    pub num_probes: usize,
    pub delta: AttackFloat,
    pub epsilon: Option<AttackFloat>,
    /// Point right after the step, before re-projection.
    pub approx_grad: Option<ArrayD<AttackFloat>>,
    /// Point right after re-projection.
    pub bin_search: Option<ArrayD<AttackFloat>>,
    /// Attack state at the end of the iteration.
    pub perturbed: ArrayD<AttackFloat>,
    pub distance: AttackFloat,
    pub normalized_distance: AttackFloat,
    pub outcome: PageOutcome,
}

impl DiaryPage {
    /// Opens a page at the current time and query count, seeded with the incoming state.
    pub fn open(
        step: usize,
        calls: usize,
        perturbed: ArrayD<AttackFloat>,
        distance: AttackFloat,
        normalized_distance: AttackFloat,
    ) -> Self {
        let now = epoch_now();
        Self {
            step,
            time: PhaseMarks {
                start: now,
                approx_grad: now,
                step_search: now,
                bin_search: now,
                end: now,
            },
            calls: PhaseMarks {
                start: calls,
                approx_grad: calls,
                step_search: calls,
                bin_search: calls,
                end: calls,
            },
            num_eval_det: 0,
            num_probes: 0,
            delta: 0.,
            epsilon: None,
            approx_grad: None,
            bin_search: None,
            perturbed,
            distance,
            normalized_distance,
            outcome: PageOutcome::Moved,
        }
    }

    pub fn mark_approx_grad(&mut self, calls: usize) {
        self.time.approx_grad = epoch_now();
        self.calls.approx_grad = calls;
    }

    pub fn mark_step_search(&mut self, calls: usize) {
        self.time.step_search = epoch_now();
        self.calls.step_search = calls;
    }

    pub fn mark_bin_search(&mut self, calls: usize) {
        self.time.bin_search = epoch_now();
        self.calls.bin_search = calls;
    }

    pub fn close(&mut self, calls: usize) {
        self.time.end = epoch_now();
        self.calls.end = calls;
    }

    /// Queries spent in this iteration.
    pub const fn calls_spent(&self) -> usize {
        self.calls.end - self.calls.start
    }
}

/// Everything recorded while attacking one sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diary {
    pub original: ArrayD<AttackFloat>,
    pub true_label: usize,
    pub epoch_start: f64,
    pub epoch_initialization: Option<f64>,
    pub epoch_initial_bin_search: Option<f64>,
    pub initial_image: Option<ArrayD<AttackFloat>>,
    pub initial_projection: Option<ArrayD<AttackFloat>>,
    pub initialization_calls: usize,
    pub calls_initial_bin_search: usize,
    pub iterations: Vec<DiaryPage>,
    /// Counters at the end of the attack.
    pub queries: QueryCounter,
    /// Why the sample was abandoned, if it was.
    pub failure: Option<String>,
}

impl Diary {
    pub fn new(original: ArrayD<AttackFloat>, true_label: usize) -> Self {
        Self {
            original,
            true_label,
            epoch_start: epoch_now(),
            epoch_initialization: None,
            epoch_initial_bin_search: None,
            initial_image: None,
            initial_projection: None,
            initialization_calls: 0,
            calls_initial_bin_search: 0,
            iterations: vec![],
            queries: QueryCounter::default(),
            failure: None,
        }
    }

    pub const fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Normalized distance after the last iteration.
    pub fn final_distance(&self) -> Option<AttackFloat> {
        self.iterations.last().map(|page| page.normalized_distance)
    }

    pub fn distances(&self) -> Vec<AttackFloat> {
        self.iterations.iter().map(|page| page.distance).collect()
    }

    /// # Errors
    /// Serialization failures from `serde_json`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
