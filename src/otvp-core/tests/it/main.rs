//! Consolidated integration tests for otvp-core.
//!
//! One test binary keeps proptest suites from competing for threads across
//! separate executables.

mod claims;
mod engine;
mod envelope;
mod merkle;
