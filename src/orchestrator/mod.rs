//! Application-level orchestration.
//!
//! This module owns run lifecycle control (start/stop) and post-run processing
//! such as transcript export. UI/CLI layers call into this module to keep
//! responsibilities separated.

mod controller;
mod post_process;

pub use controller::{run_controller, RunController, StartOutcome, UiCommand};
pub use post_process::{export_transcript, process_run_completion};
