//! Common test utilities and helpers for integration tests

pub mod fixtures;
