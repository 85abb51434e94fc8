//! Attack configuration.
//!
//! Every field has a default, so a JSON document only needs the values it
//! overrides.
use crate::error::AttackError;
use crate::metric::Constraint;
use crate::oracle::Aggregation;
use crate::stepsize::StepSizeStrategy;
use crate::AttackFloat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackParams {
    pub constraint: Constraint,
    pub num_iterations: usize,
    /// Scales the bisection precision `theta`.
    pub gamma: AttackFloat,
    pub initial_num_evals: usize,
    pub max_num_evals: usize,
    pub batch_size: usize,
    pub stepsize_search: StepSizeStrategy,
    /// Repeats per decision in bisection, step search and initialization.
    pub sampling_freq_binsearch: usize,
    /// Repeats per gradient probe.
    pub grad_queries: usize,
    pub aggregation: Aggregation,
    pub clip_min: AttackFloat,
    pub clip_max: AttackFloat,
    pub max_init_attempts: usize,
    /// Extra gradient estimates (with doubled probes) after a degenerate one.
    pub degenerate_retries: usize,
    pub seed: u64,
}

impl Default for AttackParams {
    fn default() -> Self {
        Self {
            constraint: Constraint::L2,
            num_iterations: 32,
            gamma: 1.0,
            initial_num_evals: 100,
            max_num_evals: 10_000,
            batch_size: 128,
            stepsize_search: StepSizeStrategy::default(),
            sampling_freq_binsearch: 1,
            grad_queries: 1,
            aggregation: Aggregation::Majority,
            clip_min: 0.,
            clip_max: 1.,
            max_init_attempts: 10_000,
            degenerate_retries: 1,
            seed: 42,
        }
    }
}

impl AttackParams {
    pub const fn bounds(&self) -> (AttackFloat, AttackFloat) {
        (self.clip_min, self.clip_max)
    }

    pub fn value_range(&self) -> AttackFloat {
        self.clip_max - self.clip_min
    }

    /// # Errors
    /// `InvalidParameter` naming the first offending field.
    pub fn validate(&self) -> Result<(), AttackError> {
        let positive = [
            ("batch_size", self.batch_size),
            ("initial_num_evals", self.initial_num_evals),
            ("max_num_evals", self.max_num_evals),
            ("sampling_freq_binsearch", self.sampling_freq_binsearch),
            ("grad_queries", self.grad_queries),
            ("max_init_attempts", self.max_init_attempts),
        ];
        if let Some(&(name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(AttackError::InvalidParameter {
                name,
                reason: "must be positive".to_string(),
            });
        }
        if self.initial_num_evals > self.max_num_evals {
            return Err(AttackError::InvalidParameter {
                name: "initial_num_evals",
                reason: format!("exceeds max_num_evals ({})", self.max_num_evals),
            });
        }
        if !(self.gamma.is_finite() && self.gamma > 0.) {
            return Err(AttackError::InvalidParameter {
                name: "gamma",
                reason: format!("must be a positive number, got {}", self.gamma),
            });
        }
        if !(self.clip_min.is_finite() && self.clip_max.is_finite() && self.clip_min < self.clip_max) {
            return Err(AttackError::InvalidParameter {
                name: "clip_min",
                reason: format!("empty value range [{}, {}]", self.clip_min, self.clip_max),
            });
        }
        Ok(())
    }

    /// # Errors
    /// Malformed JSON, an unknown constraint name, or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self, AttackError> {
        let json_err = |err: serde_json::Error| AttackError::InvalidParameter {
            name: "json",
            reason: err.to_string(),
        };
        let value: Value = serde_json::from_str(json).map_err(json_err)?;
        if let Some(name) = value.get("constraint").and_then(Value::as_str) {
            name.parse::<Constraint>()?;
        }
        let params: Self = serde_json::from_value(value).map_err(json_err)?;
        params.validate()?;
        Ok(params)
    }

    /// # Errors
    /// I/O failures plus everything `from_json_str` reports.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, AttackError> {
        let json = fs::read_to_string(path.as_ref()).map_err(|err| AttackError::InvalidParameter {
            name: "path",
            reason: format!("{}: {}", path.as_ref().display(), err),
        })?;
        Self::from_json_str(&json)
    }
}
