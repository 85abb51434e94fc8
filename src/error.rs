//! Error taxonomy for the attack.
//!
//! Configuration errors are raised while building an [`crate::Attack`].
//! `NoAdversarialStart` and `ShapeMismatch` are per-sample failures that the
//! driver records and moves past. `DegenerateGradient` and `StepStall` are per-iteration signals
//! that leave the current point unmoved. Anything coming out of the classifier
//! is fatal and is passed through untouched.
use std::error::Error;
use std::fmt;

/// Failure reported by an external [`crate::Classifier`].
#[derive(Debug)]
pub enum ClassifierError {
    /// The classifier returned a different number of labels than images given.
    BatchSizeMismatch { expected: usize, given: usize },
    /// The classifier could not be reached or refused the request.
    Unavailable { reason: String },
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BatchSizeMismatch { expected, given } => write!(
                f,
                "classifier returned {} labels for a batch of {}",
                given, expected
            ),
            Self::Unavailable { reason } => write!(f, "classifier unavailable: {}", reason),
            Self::Other(err) => write!(f, "classifier error: {}", err),
        }
    }
}

impl Error for ClassifierError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum AttackError {
    /// Distance metric name that is neither `l2` nor `linf`.
    UnknownConstraint { name: String },
    InvalidParameter { name: &'static str, reason: String },
    ShapeMismatch {
        expected: Vec<usize>,
        given: Vec<usize>,
    },
    /// Random initialization never hit the adversarial region.
    NoAdversarialStart { attempts: usize },
    /// The accumulated probe direction has zero (or non-finite) norm.
    DegenerateGradient { probes: usize },
    /// Step-size search found no scale that stays adversarial.
    StepStall { attempts: usize },
    Oracle { err: ClassifierError },
}

impl AttackError {
    /// Whether the error only affects the current sample.
    pub const fn is_per_sample(&self) -> bool {
        matches!(
            self,
            Self::NoAdversarialStart { .. } | Self::ShapeMismatch { .. }
        )
    }

    /// Whether the error only affects the current iteration.
    pub const fn is_per_iteration(&self) -> bool {
        matches!(
            self,
            Self::DegenerateGradient { .. } | Self::StepStall { .. }
        )
    }
}

impl fmt::Display for AttackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConstraint { name } => write!(f, "unknown constraint metric: {}", name),
            Self::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter `{}`: {}", name, reason)
            }
            Self::ShapeMismatch { expected, given } => write!(
                f,
                "shape mismatch: expected {:?}, given {:?}",
                expected, given
            ),
            Self::NoAdversarialStart { attempts } => write!(
                f,
                "no adversarial starting point found after {} attempts",
                attempts
            ),
            Self::DegenerateGradient { probes } => write!(
                f,
                "gradient estimate from {} probes has zero norm",
                probes
            ),
            Self::StepStall { attempts } => write!(
                f,
                "no adversarial step size found after {} attempts",
                attempts
            ),
            Self::Oracle { err } => write!(f, "{}", err),
        }
    }
}

impl Error for AttackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Oracle { err } => Some(err),
            _ => None,
        }
    }
}

impl From<ClassifierError> for AttackError {
    fn from(err: ClassifierError) -> Self {
        Self::Oracle { err }
    }
}
