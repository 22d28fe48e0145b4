//! Retention: deciding which snapshots a lifecycle policy deletes.
//!
//! [`rules`] holds the pure selection logic; [`PolicyEvaluator`] runs a
//! policy against the store and the storage backend.

mod evaluator;
mod rules;

pub use evaluator::{EvaluationResult, PolicyEvaluator};
pub use rules::{describe, select_candidates};
