//! Run orchestration.
//!
//! [`RunEngine`] interprets a [`Plan`] for one selection: local jobs inline,
//! one connectivity probe, async-eligible network jobs launched in the
//! background, then the fixed drain order in which each async result is
//! awaited exactly where it is displayed.

mod cancel;
mod connectivity;
mod plan;
mod slot;

pub use cancel::CancelToken;
pub use connectivity::{ConnectivityProbe, FixedProbe, TcpProbe};
pub use plan::{Plan, Step};
pub use slot::{async_slot, AsyncSlot, SlotWriter};

use crate::capture;
use crate::jobs::{Job, JobBook, JobContext, JobId, SelectionSet};
use crate::locator::{Companion, CompanionLocator, Locate};
use crate::model::{
    Connectivity, InfoEvent, JobParams, NoticeKind, RunConfig, RunOutcome, RunReport,
};
use crate::presenter::Presenter;
use crate::progress::compute_progress;
use crate::transcript;
use anyhow::Result;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;

/// Result written into an async job's slot: the job's text, or a panic message.
type JobResult = std::result::Result<String, String>;

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}

pub(crate) fn join_message(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic())
    } else {
        e.to_string()
    }
}

fn ensure_newline(mut text: String) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

pub struct RunEngine {
    cfg: RunConfig,
    selection: SelectionSet,
    jobs: JobBook,
    probe: Arc<dyn ConnectivityProbe>,
    locator: Arc<dyn Locate>,
}

impl RunEngine {
    pub fn new(cfg: RunConfig, selection: SelectionSet, jobs: JobBook) -> Self {
        let locator = Arc::new(CompanionLocator::new(cfg.companion.clone()));
        Self {
            cfg,
            selection,
            jobs,
            probe: Arc::new(TcpProbe::default()),
            locator,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn Locate>) -> Self {
        self.locator = locator;
        self
    }

    pub async fn run(self, presenter: Presenter, cancel: CancelToken) -> Result<RunReport> {
        let started = Instant::now();
        let total = self.selection.len();
        tracing::info!(run_id = %self.cfg.run_id, total, "run started");

        let header = transcript::header(&self.cfg);
        let text =
            tokio::task::spawn_blocking(move || capture::capture_text(|| capture::emit(&header)))
                .await?;
        presenter.append_text(&text);

        let report = |pass: &Pass, outcome: RunOutcome| RunReport {
            run_id: self.cfg.run_id.clone(),
            outcome,
            attempted: pass.attempted,
            total,
            elapsed_secs: started.elapsed().as_secs_f64(),
            connectivity: pass.connectivity,
            transcript: pass.presenter.transcript(),
        };

        let mut guard = CompanionGuard {
            locator: self.locator.clone(),
            companion: None,
        };
        let mut pass = Pass {
            cfg: self.cfg.clone(),
            params: Arc::new(self.cfg.params.clone()),
            jobs: self.jobs.clone(),
            presenter: presenter.clone(),
            cancel: cancel.clone(),
            total,
            attempted: 0,
            connectivity: None,
            companion: None,
            pending: HashMap::new(),
        };

        if self.jobs.needs_companion(self.selection.ids()) {
            match self.locator.locate() {
                Ok(found) => {
                    presenter.info(InfoEvent::CompanionLocated {
                        path: found.path.clone(),
                    });
                    pass.companion = Some(found.path.clone());
                    guard.companion = Some(found);
                }
                Err(e) => {
                    tracing::error!(error = %e, "companion lookup failed");
                    presenter.notify(NoticeKind::Error, e.to_string());
                    presenter.append_text(&format!("Error: {e}\n"));
                    return Ok(report(&pass, RunOutcome::Failed));
                }
            }
        }

        let plan = Plan::build(&self.selection);
        let mut outcome = RunOutcome::Completed;
        for step in plan.steps() {
            if cancel.is_cancelled() {
                outcome = RunOutcome::Cancelled;
                break;
            }
            let text = match *step {
                Step::Probe => {
                    let result = self.probe.probe(self.cfg.probe_timeout).await;
                    presenter.info(InfoEvent::Connectivity(result));
                    pass.connectivity = Some(result);
                    continue;
                }
                Step::Launch(id) => {
                    if pass.admits(id) {
                        pass.launch(id);
                    }
                    continue;
                }
                Step::Run(id) => {
                    if !pass.admits(id) {
                        tracing::debug!(job = %id, "skipped: not runnable here");
                        continue;
                    }
                    pass.advance(id);
                    pass.run_inline(id).await
                }
                Step::Await(id) => {
                    let Some(slot) = pass.pending.remove(&id) else {
                        continue;
                    };
                    pass.advance(id);
                    match pass.await_result(id, slot).await {
                        Some(text) => text,
                        None => {
                            outcome = RunOutcome::Cancelled;
                            break;
                        }
                    }
                }
            };
            // A stop that landed while the job ran abandons its output too.
            if cancel.is_cancelled() {
                outcome = RunOutcome::Cancelled;
                break;
            }
            presenter.append_text(&text);
        }

        if !pass.pending.is_empty() {
            tracing::debug!(orphans = pass.pending.len(), "leaving background jobs detached");
        }
        tracing::info!(?outcome, attempted = pass.attempted, "run finished");
        Ok(report(&pass, outcome))
    }
}

/// Releases the located companion on every exit path of a run.
struct CompanionGuard {
    locator: Arc<dyn Locate>,
    companion: Option<Companion>,
}

impl Drop for CompanionGuard {
    fn drop(&mut self) {
        if let Some(c) = self.companion.take() {
            self.locator.cleanup(&c);
        }
    }
}

/// Mutable state of one interpreter pass over a plan.
struct Pass {
    cfg: RunConfig,
    params: Arc<JobParams>,
    jobs: JobBook,
    presenter: Presenter,
    cancel: CancelToken,
    total: usize,
    attempted: usize,
    connectivity: Option<Connectivity>,
    companion: Option<PathBuf>,
    pending: HashMap<JobId, AsyncSlot<JobResult>>,
}

impl Pass {
    /// Platform and connectivity gate. Local jobs are never gated on the network.
    fn admits(&self, id: JobId) -> bool {
        if !id.supported_here() {
            return false;
        }
        !id.kind().is_network() || self.connectivity.is_some_and(|c| c.connected)
    }

    fn advance(&mut self, id: JobId) {
        self.attempted += 1;
        let progress = compute_progress(self.attempted, self.total, id.label(self.cfg.language));
        self.presenter.set_progress(progress);
    }

    fn context(&self, id: JobId) -> JobContext {
        JobContext {
            id,
            language: self.cfg.language,
            params: self.params.clone(),
            connectivity: self.connectivity,
            companion: self.companion.clone(),
            cancel: self.cancel.clone(),
        }
    }

    fn title(&self, id: JobId) -> String {
        transcript::centered_title(id.title(self.cfg.language), self.cfg.width)
    }

    /// Run a synchronous job under output capture on a blocking thread.
    async fn run_inline(&self, id: JobId) -> String {
        let ctx = self.context(id);
        let title = self.title(id);
        let job = self.jobs.get(id);
        let section = title.clone();
        let res = tokio::task::spawn_blocking(move || {
            capture::capture_text(move || {
                capture::emit(&section);
                match job {
                    Some(job) => {
                        let out = job.run(&ctx);
                        if !out.is_empty() {
                            capture::emit(&out);
                        }
                    }
                    None => capture::emit(&missing_job(id)),
                }
            })
        })
        .await;
        match res {
            Ok(text) => text,
            Err(e) => {
                let msg = join_message(e);
                tracing::warn!(job = %id, error = %msg, "job failed");
                format!("{title}Error: {msg}\n")
            }
        }
    }

    /// Start an async-eligible job; its result lands in a slot read later.
    fn launch(&mut self, id: JobId) {
        let (writer, slot) = async_slot::<JobResult>();
        let ctx = self.context(id);
        let job = self.jobs.get(id);
        tracing::debug!(job = %id, "launching in background");
        tokio::task::spawn_blocking(move || {
            let result = match job {
                Some(job) => run_isolated(job.as_ref(), &ctx),
                None => Ok(missing_job(id)),
            };
            if !writer.fill(result) {
                tracing::debug!(job = %id, "result discarded: run no longer waiting");
            }
        });
        self.pending.insert(id, slot);
    }

    /// Wait for a launched job and render its block. `None` if the run was
    /// cancelled while waiting; the slot is dropped and the job left detached.
    async fn await_result(&self, id: JobId, slot: AsyncSlot<JobResult>) -> Option<String> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            r = slot.wait() => r,
        };
        let body = match result {
            Some(Ok(text)) => text,
            Some(Err(msg)) => format!("Error: {msg}\n"),
            None => format!("Error: {id} test produced no result\n"),
        };
        let section = self.title(id);
        let block = ensure_newline(body);
        let res = tokio::task::spawn_blocking(move || {
            capture::capture_text(move || {
                capture::emit(&section);
                capture::emit(&block);
            })
        })
        .await;
        Some(res.unwrap_or_else(|e| format!("Error: {}\n", join_message(e))))
    }
}

fn run_isolated(job: &dyn Job, ctx: &JobContext) -> JobResult {
    panic::catch_unwind(AssertUnwindSafe(|| job.run(ctx))).map_err(panic_message)
}

fn missing_job(id: JobId) -> String {
    format!("Error: no implementation registered for {id}\n")
}
