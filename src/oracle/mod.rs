pub mod classifier;
pub mod decision;

pub use classifier::{Classifier, LogitModel, NoisyClassifier, Sampling, SoftmaxClassifier};
pub use decision::{Aggregation, DecisionOracle, QueryCounter};
