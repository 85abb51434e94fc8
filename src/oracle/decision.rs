//! Decision Oracle Adapter: turns classifier labels into adversarial decisions.
//!
//! Every query of the attack goes through a [`DecisionOracle`]. It is created
//! per sample, so its [`QueryCounter`] is never shared between samples.
//!
//! Accounting convention: `model_calls` grows by one per candidate decision,
//! however many repeats are spent on it; `raw_queries` grows by one per
//! classifier evaluation of one image.
use crate::error::{AttackError, ClassifierError};
use crate::oracle::Classifier;
use crate::AttackFloat;
use log::trace;
use ndarray::{ArrayViewD, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the repeated labels of one candidate are reduced to a decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// The most frequent label must differ from the true label. A tie that
    /// includes the true label is not adversarial.
    #[default]
    Majority,
    /// More than half of the repeats must be adversarial.
    Mean,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCounter {
    pub model_calls: usize,
    pub raw_queries: usize,
}

pub struct DecisionOracle<'a, C: ?Sized> {
    classifier: &'a C,
    true_label: usize,
    batch_size: usize,
    counter: QueryCounter,
}

impl<'a, C: Classifier + ?Sized> DecisionOracle<'a, C> {
    /// # Panics
    /// If `batch_size` is zero.
    pub fn new(classifier: &'a C, true_label: usize, batch_size: usize) -> Self {
        assert!(batch_size > 0);
        Self {
            classifier,
            true_label,
            batch_size,
            counter: QueryCounter::default(),
        }
    }

    pub const fn true_label(&self) -> usize {
        self.true_label
    }

    pub const fn counter(&self) -> QueryCounter {
        self.counter
    }

    pub const fn model_calls(&self) -> usize {
        self.counter.model_calls
    }

    /// Resets both counters, e.g. when the adapter is reused for a new attack.
    pub fn reset(&mut self, true_label: usize) {
        self.true_label = true_label;
        self.counter = QueryCounter::default();
    }

    /// One decision per candidate along the leading axis.
    ///
    /// Candidates must already be clipped to the valid value range.
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    pub fn decide(
        &mut self,
        candidates: ArrayViewD<AttackFloat>,
        repeats: usize,
        aggregate: Aggregation,
    ) -> Result<Vec<bool>, AttackError> {
        let true_label = self.true_label;
        let labels = self.query_labels(candidates, repeats)?;
        Ok(labels
            .iter()
            .map(|reps| match aggregate {
                Aggregation::Majority => modal_label(reps, true_label) != Some(true_label),
                Aggregation::Mean => adversarial_fraction(reps, true_label) > 0.5,
            })
            .collect())
    }

    /// Number of adversarial outcomes out of `repeats` for every candidate.
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    pub fn decide_counts(
        &mut self,
        candidates: ArrayViewD<AttackFloat>,
        repeats: usize,
    ) -> Result<Vec<usize>, AttackError> {
        let true_label = self.true_label;
        let labels = self.query_labels(candidates, repeats)?;
        Ok(labels
            .iter()
            .map(|reps| reps.iter().filter(|&&l| l != true_label).count())
            .collect())
    }

    /// Fraction of adversarial outcomes out of `repeats` for every candidate.
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    pub fn decide_soft(
        &mut self,
        candidates: ArrayViewD<AttackFloat>,
        repeats: usize,
    ) -> Result<Vec<AttackFloat>, AttackError> {
        let true_label = self.true_label;
        let labels = self.query_labels(candidates, repeats)?;
        Ok(labels
            .iter()
            .map(|reps| adversarial_fraction(reps, true_label))
            .collect())
    }

    /// Decision for a single point (no leading batch axis).
    ///
    /// # Errors
    /// Classifier failures are returned unmodified.
    pub fn is_adversarial(
        &mut self,
        point: ArrayViewD<AttackFloat>,
        repeats: usize,
        aggregate: Aggregation,
    ) -> Result<bool, AttackError> {
        let decisions = self.decide(point.insert_axis(Axis(0)), repeats, aggregate)?;
        Ok(decisions[0])
    }

    /// Labels of every repeat, grouped per candidate in input order.
    fn query_labels(
        &mut self,
        candidates: ArrayViewD<AttackFloat>,
        repeats: usize,
    ) -> Result<Vec<Vec<usize>>, AttackError> {
        let repeats = repeats.max(1);
        let num_candidates = candidates.len_of(Axis(0));
        let mut labels: Vec<Vec<usize>> = Vec::with_capacity(num_candidates);
        for chunk in candidates.axis_chunks_iter(Axis(0), self.batch_size) {
            let chunk_len = chunk.len_of(Axis(0));
            let mut chunk_labels = vec![Vec::with_capacity(repeats); chunk_len];
            for _ in 0..repeats {
                let predicted = self.classifier.predict(chunk.view())?;
                if predicted.len() != chunk_len {
                    return Err(ClassifierError::BatchSizeMismatch {
                        expected: chunk_len,
                        given: predicted.len(),
                    }
                    .into());
                }
                chunk_labels
                    .iter_mut()
                    .zip(predicted)
                    .for_each(|(reps, label)| reps.push(label));
            }
            self.counter.raw_queries += chunk_len * repeats;
            trace!("queried sub-batch of {} x {} repeats", chunk_len, repeats);
            labels.extend(chunk_labels);
        }
        self.counter.model_calls += num_candidates;
        Ok(labels)
    }
}

/// Most frequent label. Ties go to `preferred` when it is among them,
/// otherwise to the smallest tied label.
fn modal_label(labels: &[usize], preferred: usize) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(la, ca), (lb, cb)| {
            ca.cmp(cb)
                .then_with(|| (*la == preferred).cmp(&(*lb == preferred)))
                .then(lb.cmp(la))
        })
        .map(|(label, _)| label)
}

fn adversarial_fraction(labels: &[usize], true_label: usize) -> AttackFloat {
    if labels.is_empty() {
        return 0.;
    }
    labels.iter().filter(|&&l| l != true_label).count() as AttackFloat / labels.len() as AttackFloat
}
