//! Distance metrics and the quantities derived from them.
use crate::error::AttackError;
use crate::util::{l2_norm, linf_norm, sign};
use crate::AttackFloat;
use ndarray::{Array, ArrayD, ArrayViewD, Axis, IxDyn};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Norm the attack minimizes. Fixed for the lifetime of an attack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Constraint {
    L2,
    Linf,
}

impl Constraint {
    pub fn distance(self, x1: &ArrayViewD<AttackFloat>, x2: &ArrayViewD<AttackFloat>) -> AttackFloat {
        let diff = x1 - x2;
        match self {
            Self::L2 => l2_norm(&diff.view()),
            Self::Linf => linf_norm(&diff.view()),
        }
    }

    /// Bisection precision on the interpolation parameter.
    ///
    /// Smaller for higher dimensional inputs so that the pixel-space error
    /// of a projection stays below a fixed fraction of one unit.
    pub fn theta(self, gamma: AttackFloat, dim: usize) -> AttackFloat {
        let d = dim as AttackFloat;
        match self {
            Self::L2 => gamma / (d.sqrt() * d),
            Self::Linf => gamma / (d * d),
        }
    }

    /// Probe radius for gradient estimation at iteration `step` (1-based).
    pub fn delta(
        self,
        step: usize,
        dist_post_update: AttackFloat,
        theta: AttackFloat,
        dim: usize,
        value_range: AttackFloat,
    ) -> AttackFloat {
        if step <= 1 {
            return 0.1 * value_range;
        }
        let d = dim as AttackFloat;
        match self {
            Self::L2 => d.sqrt() * theta * dist_post_update,
            Self::Linf => d * theta * dist_post_update,
        }
    }

    /// Distance rescaled to be comparable across input sizes and value ranges.
    ///
    /// `l2` reports a mean squared error, `linf` the fraction of the value range.
    pub fn normalized_distance(
        self,
        dist: AttackFloat,
        dim: usize,
        value_range: AttackFloat,
    ) -> AttackFloat {
        match self {
            Self::L2 => dist.powi(2) / dim as AttackFloat / value_range.powi(2),
            Self::Linf => dist / value_range,
        }
    }

    /// Direction actually followed for a given gradient estimate.
    pub fn update_direction(self, grad: &ArrayViewD<AttackFloat>) -> ArrayD<AttackFloat> {
        match self {
            Self::L2 => grad.to_owned(),
            Self::Linf => sign(grad),
        }
    }

    /// Draws `n` probe directions stacked along a new leading axis.
    ///
    /// `l2` probes are unit-norm Gaussian directions. `linf` probes are uniform
    /// in `[-1, 1]` per coordinate and are not renormalized.
    pub fn random_vectors<R: Rng>(self, n: usize, shape: &[usize], rng: &mut R) -> ArrayD<AttackFloat> {
        let mut full_shape = vec![n];
        full_shape.extend_from_slice(shape);
        match self {
            Self::L2 => {
                let mut rv: ArrayD<AttackFloat> =
                    Array::random_using(IxDyn(&full_shape), StandardNormal, rng);
                for mut probe in rv.axis_iter_mut(Axis(0)) {
                    let norm = l2_norm(&probe.view());
                    if norm > 0. {
                        probe /= norm;
                    }
                }
                rv
            }
            Self::Linf => Array::random_using(IxDyn(&full_shape), Uniform::new_inclusive(-1., 1.), rng),
        }
    }
}

impl FromStr for Constraint {
    type Err = AttackError;

    /// Accepts `l2`/`linf` as well as the distance names `MSE`/`Linf`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "mse" => Ok(Self::L2),
            "linf" => Ok(Self::Linf),
            _ => Err(AttackError::UnknownConstraint {
                name: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Constraint {
    type Error = AttackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Constraint> for String {
    fn from(c: Constraint) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L2 => write!(f, "l2"),
            Self::Linf => write!(f, "linf"),
        }
    }
}
