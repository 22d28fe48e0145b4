//! Snapshot lifecycle, immutability and storage-tiering engine.
//!
//! - [`guard`]: is a snapshot locked or held?
//! - [`retention`]: lifecycle policies and the deletions they imply
//! - [`tiering`]: tier rules, pending transitions and the worker that runs them
//! - [`restore`]: cold and archive retrieval
//! - [`cost`]: tier occupancy, cost and daily reports
//! - [`service`]: one scheduler tick across every organization

pub mod admin;
pub mod backend;
pub mod cost;
pub mod error;
pub mod guard;
mod lease;
pub mod metrics;
pub mod restore;
pub mod retention;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tiering;

pub use admin::AdminService;
pub use backend::{ObjectStoreBackend, StorageBackend};
pub use cost::CostAggregator;
pub use error::{CandidateError, LifecycleError, Result};
pub use guard::Guard;
pub use metrics::LifecycleMetrics;
pub use restore::{ColdRestoreWorkflow, NewRestoreRequest};
pub use retention::{EvaluationResult, PolicyEvaluator};
pub use service::{LifecycleService, TickReport};
pub use tiering::{TieringEngine, TransitionWorker};
