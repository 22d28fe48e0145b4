//! Storage tiering: planning transitions from tier rules and executing them.

mod engine;
mod worker;

pub use engine::{TieringEngine, TieringOutcome, estimated_saving};
pub use worker::{DrainOutcome, TransitionResult, TransitionWorker};
