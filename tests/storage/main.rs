//! Storage Integration Tests
//!
//! Run state shared through the file store: CAS across handles, version
//! monotonicity, and two engines coordinating through one data directory.

#[path = "../common/mod.rs"]
mod common;

mod file_store;
