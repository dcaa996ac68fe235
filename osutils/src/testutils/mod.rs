//! Helpers for tests that need to script the behavior of the system.

mod runner;

pub use runner::MockRunner;
