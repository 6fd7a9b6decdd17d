//! Benchmark-suite orchestration.
//!
//! Runs a user-selected set of benchmark jobs in a fixed transcript order:
//! local jobs first under output capture, then network jobs after a single
//! reachability probe, with async-eligible network jobs running in the
//! background and awaited at their display position.

pub mod capture;
pub mod engine;
pub mod jobs;
pub mod locator;
pub mod model;
pub mod orchestrator;
pub mod presenter;
pub mod progress;
pub mod transcript;
