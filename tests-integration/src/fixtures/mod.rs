//! Test fixtures for integration testing
//!
//! [`LifecycleTestContext`] wires every engine component over one store,
//! clock and backend; [`StorageTestContext`] gives direct access to the
//! object store behind an [`lifecycle::ObjectStoreBackend`].

mod lifecycle_context;
mod storage_context;

pub use lifecycle_context::{LifecycleTestContext, StoreMode, retention_rule};
pub use storage_context::StorageTestContext;
