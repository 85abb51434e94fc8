#![allow(clippy::must_use_candidate)]
//! Decision-based adversarial attacks (HopSkipJump style) against classifiers
//! that only expose their top-1 label.
//!
//! The attack alternates between projecting onto the decision boundary with a
//! bisection, estimating the boundary normal from hard-label probes, and
//! stepping along that normal while staying adversarial.
extern crate ndarray;
extern crate ndarray_rand;
extern crate ndarray_stats;
extern crate rand;

pub mod adversarial;
pub mod attack;
pub mod boundary;
pub mod diary;
pub mod error;
pub mod gradient;
pub mod logging;
pub mod metric;
pub mod oracle;
pub mod params;
pub mod stepsize;
pub mod util;

#[cfg(test)]
mod test_util;

pub type AttackFloat = f64;

pub use crate::adversarial::{Adversarial, Sample};
pub use crate::attack::{Attack, AttackPhase, AttackReport};
pub use crate::diary::{Diary, DiaryPage, PageOutcome};
pub use crate::error::{AttackError, ClassifierError};
pub use crate::metric::Constraint;
pub use crate::oracle::{Aggregation, Classifier, DecisionOracle, QueryCounter};
pub use crate::params::AttackParams;
pub use crate::stepsize::{GeometricProgression, GridSearch, StepSizeStrategy};
