pub mod cli;
pub mod clock;
pub mod config;
pub mod model;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
