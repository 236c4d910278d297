//! Sync Engine Integration Tests
//!
//! End-to-end runs through the `IndexSync` facade: lifecycle, mutual
//! exclusion, pause/resume, cancellation, failure handling and
//! network-wide runs.

#[path = "../common/mod.rs"]
mod common;

mod failures;
mod lifecycle;
mod resume;
