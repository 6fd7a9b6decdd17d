//! Step plan for one run.
//!
//! Phase 1 runs local jobs inline, then a single connectivity probe gates
//! everything network-bound: async-eligible jobs are launched up front and
//! awaited at their slot in the fixed drain order, between the synchronous
//! network jobs.

use crate::jobs::{JobId, JobKind, SelectionSet, DRAIN_ORDER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run a job inline under output capture and append its text.
    Run(JobId),
    /// Check outbound reachability once.
    Probe,
    /// Start an async-eligible job in the background.
    Launch(JobId),
    /// Block on a launched job's result and append it.
    Await(JobId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn build(selection: &SelectionSet) -> Self {
        let mut steps: Vec<Step> = selection
            .ids()
            .iter()
            .filter(|id| id.kind() == JobKind::LocalSync)
            .map(|id| Step::Run(*id))
            .collect();

        if selection.ids().iter().any(|id| id.kind().is_network()) {
            steps.push(Step::Probe);
            steps.extend(
                selection
                    .ids()
                    .iter()
                    .filter(|id| id.kind() == JobKind::NetworkAsync)
                    .map(|id| Step::Launch(*id)),
            );
            steps.extend(
                DRAIN_ORDER
                    .iter()
                    .filter(|id| selection.contains(**id))
                    .map(|id| match id.kind() {
                        JobKind::NetworkAsync => Step::Await(*id),
                        _ => Step::Run(*id),
                    }),
            );
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}
