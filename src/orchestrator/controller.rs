//! Run lifecycle controller.
//!
//! Owns the run state machine and the enable state of the start/stop
//! controls, and hands each run to a background task so the caller is never
//! blocked. Presentation layers drive it through [`UiCommand`]s.

use crate::engine::{join_message, CancelToken, ConnectivityProbe, RunEngine};
use crate::jobs::{JobBook, JobId, Preset, Selection};
use crate::locator::Locate;
use crate::model::{
    gen_run_id, InfoEvent, JobParams, NoticeKind, RunConfig, RunEvent, RunOutcome, RunReport,
    RunState,
};
use crate::presenter::Presenter;
use crate::transcript;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Commands emitted by UI layers to control the run.
#[derive(Debug, Clone)]
pub enum UiCommand {
    Start,
    Stop,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Nothing selected; a notice was shown and no task was spawned.
    EmptySelection,
    AlreadyRunning,
}

struct Inner {
    state: RunState,
    cancel: Option<CancelToken>,
    selection: Selection,
    params: JobParams,
    last_report: Option<RunReport>,
}

#[derive(Clone)]
pub struct RunController {
    cfg: Arc<RunConfig>,
    jobs: JobBook,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    locator: Option<Arc<dyn Locate>>,
    presenter: Presenter,
    inner: Arc<Mutex<Inner>>,
    state_tx: Arc<watch::Sender<RunState>>,
}

impl RunController {
    pub fn new(cfg: RunConfig, selection: Selection, jobs: JobBook, presenter: Presenter) -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        let inner = Inner {
            state: RunState::Idle,
            cancel: None,
            selection,
            params: cfg.params.clone(),
            last_report: None,
        };
        Self {
            cfg: Arc::new(cfg),
            jobs,
            probe: None,
            locator: None,
            presenter,
            inner: Arc::new(Mutex::new(inner)),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn Locate>) -> Self {
        self.locator = Some(locator);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: RunState) {
        tracing::debug!(from = ?inner.state, to = ?state, "run state");
        inner.state = state;
        // Event first: a watcher that sees the new state has every event before it.
        self.presenter.emit(RunEvent::StateChanged(state));
        self.state_tx.send_replace(state);
    }

    fn set_controls(&self, start_enabled: bool, stop_enabled: bool) {
        self.presenter.emit(RunEvent::Controls {
            start_enabled,
            stop_enabled,
        });
    }

    fn say(&self, zh: &'static str, en: &'static str) -> &'static str {
        self.cfg.language.pick(zh, en)
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    pub fn selection(&self) -> Selection {
        self.lock().selection.clone()
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.lock().last_report.clone()
    }

    /// Toggle one job. Ignored while a run is active.
    pub fn set_job(&self, id: JobId, enabled: bool) -> bool {
        let mut inner = self.lock();
        if inner.state != RunState::Idle {
            return false;
        }
        inner.selection.set(id, enabled);
        true
    }

    /// Overwrite the selection with a preset. Ignored while a run is active.
    pub fn apply_preset(&self, preset: Preset) -> bool {
        let mut inner = self.lock();
        if inner.state != RunState::Idle {
            return false;
        }
        let Inner {
            selection, params, ..
        } = &mut *inner;
        selection.apply_preset(preset, params)
    }

    /// Snapshot the selection and start a run in the background.
    pub fn start(&self) -> StartOutcome {
        let mut inner = self.lock();
        if inner.state != RunState::Idle {
            return StartOutcome::AlreadyRunning;
        }
        let selection = inner.selection.snapshot();
        let total = selection.len();
        if selection.is_empty() {
            self.presenter.notify(
                NoticeKind::Info,
                self.say("请至少选择一项测试", "Select at least one test"),
            );
            return StartOutcome::EmptySelection;
        }

        let mut cfg = RunConfig::clone(&self.cfg);
        cfg.run_id = gen_run_id();
        cfg.params = inner.params.clone();

        let cancel = CancelToken::new();
        inner.cancel = Some(cancel.clone());
        self.presenter.reset();
        self.set_state(&mut inner, RunState::Running);
        self.set_controls(false, true);
        self.presenter.set_status(self.say("测试进行中…", "Running…"));
        drop(inner);

        let mut engine = RunEngine::new(cfg.clone(), selection, self.jobs.clone());
        if let Some(probe) = &self.probe {
            engine = engine.with_probe(probe.clone());
        }
        if let Some(locator) = &self.locator {
            engine = engine.with_locator(locator.clone());
        }

        let this = self.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let presenter = this.presenter.clone();
            // The inner task is the panic boundary: whatever happens, teardown runs.
            let joined = tokio::spawn(engine.run(presenter, cancel)).await;
            let report = match joined {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => this.failed(&cfg, total, format!("{e:#}")),
                Err(e) => this.failed(&cfg, total, join_message(e)),
            };
            this.finish(report, started.elapsed());
        });
        StartOutcome::Started
    }

    /// Report for a run whose engine task errored or panicked. Progress made
    /// before the abort is lost with the task; the selection size is not.
    fn failed(&self, cfg: &RunConfig, total: usize, message: String) -> RunReport {
        tracing::error!(error = %message, "run aborted");
        self.presenter.append_text(&format!("Error: {message}\n"));
        RunReport {
            run_id: cfg.run_id.clone(),
            outcome: RunOutcome::Failed,
            attempted: 0,
            total,
            elapsed_secs: 0.0,
            connectivity: None,
            transcript: String::new(),
        }
    }

    fn finish(&self, mut report: RunReport, elapsed: std::time::Duration) {
        let mut inner = self.lock();
        if inner.state == RunState::Cancelling {
            report.outcome = RunOutcome::Cancelled;
        }
        match report.outcome {
            RunOutcome::Completed => {
                let trailer = transcript::trailer(self.cfg.language, self.cfg.width, elapsed);
                self.presenter.append_text(&trailer);
                self.set_state(&mut inner, RunState::Completed);
                self.presenter.set_status(self.say("测试完成", "Completed"));
            }
            RunOutcome::Failed => {
                self.set_state(&mut inner, RunState::Failed);
                self.presenter.set_status(self.say("测试失败", "Failed"));
            }
            RunOutcome::Cancelled => {}
        }
        report.elapsed_secs = elapsed.as_secs_f64();
        report.transcript = self.presenter.transcript();
        tracing::info!(outcome = ?report.outcome, elapsed = ?elapsed, "run torn down");

        inner.cancel = None;
        inner.last_report = Some(report);
        self.set_controls(true, false);
        self.set_state(&mut inner, RunState::Idle);
    }

    /// Request cancellation of the active run. Returns false if there was
    /// nothing to stop (idle, or already stopping).
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != RunState::Running {
            return false;
        }
        if let Some(cancel) = &inner.cancel {
            cancel.cancel();
        }
        self.set_state(&mut inner, RunState::Cancelling);
        self.presenter
            .seal_with(&transcript::stop_marker(self.cfg.language));
        self.presenter.set_status(self.say("已停止", "Stopped"));
        self.set_controls(false, false);
        true
    }

    /// Wait until the controller is idle and return the latest report.
    pub async fn wait_idle(&self) -> Option<RunReport> {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| *s == RunState::Idle).await;
        self.last_report()
    }
}

/// Drive one run from UI commands. Returns once the run started here has
/// returned to idle, or immediately on [`UiCommand::Quit`].
pub async fn run_controller(
    controller: &RunController,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    start_on_launch: bool,
) -> Option<RunReport> {
    let mut state_rx = controller.subscribe();
    let mut active = false;
    if start_on_launch {
        if controller.start() != StartOutcome::Started {
            return controller.last_report();
        }
        active = true;
    }

    let mut commands_open = true;
    // Stop watchdog: a job already in flight keeps running after a stop.
    let mut stop_deadline: Option<Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if commands_open => {
                match cmd {
                    Some(UiCommand::Start) => {
                        if controller.start() == StartOutcome::Started {
                            active = true;
                        }
                    }
                    Some(UiCommand::Stop) => {
                        if controller.stop() {
                            stop_deadline = Some(Instant::now() + Duration::from_secs(3));
                        }
                    }
                    Some(UiCommand::Quit) => {
                        controller.stop();
                        break;
                    }
                    None => {
                        commands_open = false;
                        if !active {
                            break;
                        }
                    }
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if active && *state_rx.borrow_and_update() == RunState::Idle {
                    break;
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = stop_deadline {
                    if Instant::now() >= deadline && controller.state() == RunState::Cancelling {
                        let notice = controller.say(
                            "仍在等待当前测试结束…",
                            "Still waiting for the running job to finish…",
                        );
                        controller.presenter.info(InfoEvent::Message(notice.into()));
                        stop_deadline = None;
                    }
                }
            }
        }
    }

    controller.last_report()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FixedProbe;
    use crate::jobs::JobContext;
    use crate::model::{Connectivity, Language};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    fn controller(selection: Selection) -> (RunController, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let c = RunController::new(
            RunConfig::default(),
            selection,
            JobBook::new(),
            Presenter::new(tx),
        )
        .with_probe(Arc::new(FixedProbe(Connectivity::offline())));
        (c, rx)
    }

    #[tokio::test]
    async fn empty_selection_never_leaves_idle() {
        let (c, mut rx) = controller(Selection::none());
        assert_eq!(c.start(), StartOutcome::EmptySelection);
        assert_eq!(c.state(), RunState::Idle);
        assert!(c.last_report().is_none());
        match rx.try_recv().unwrap() {
            RunEvent::Notify { kind, message } => {
                assert_eq!(kind, NoticeKind::Info);
                assert_eq!(message, "Select at least one test");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let (c, _rx) = controller(Selection::default());
        assert!(!c.stop());
        assert_eq!(c.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn selection_is_locked_while_running() {
        let mut sel = Selection::none();
        // Network job with an offline probe: the run finishes without capturing output.
        sel.set(JobId::Speed, true);
        let (c, _rx) = controller(sel);
        assert_eq!(c.start(), StartOutcome::Started);
        assert_eq!(c.start(), StartOutcome::AlreadyRunning);
        assert!(!c.set_job(JobId::Cpu, true));
        assert!(!c.apply_preset(Preset::Full));

        let report = c.wait_idle().await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.attempted, 0);
        assert!(c.set_job(JobId::Cpu, true));
        assert!(c.selection().is_enabled(JobId::Cpu));
    }

    #[tokio::test]
    async fn aborted_run_keeps_the_selection_size() {
        let (c, _rx) = controller(Selection::default());
        let cfg = RunConfig {
            run_id: "abc123".into(),
            ..RunConfig::default()
        };
        let report = c.failed(&cfg, 4, "engine exploded".into());
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.total, 4);
        assert_eq!(report.attempted, 0);
        assert_eq!(report.run_id, "abc123");
        assert!(c.presenter.transcript().contains("Error: engine exploded"));
    }

    #[tokio::test]
    async fn watchdog_notice_follows_the_run_language() {
        let started = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let (flag, gate) = (started.clone(), release.clone());
        let jobs = JobBook::new().with(JobId::Cpu, move |_: &JobContext| {
            flag.store(true, Ordering::SeqCst);
            while !gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            String::new()
        });
        let mut sel = Selection::none();
        sel.set(JobId::Cpu, true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cfg = RunConfig {
            language: Language::Zh,
            ..RunConfig::default()
        };
        let c = RunController::new(cfg, sel, jobs, Presenter::new(tx));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let driver = {
            let c = c.clone();
            tokio::spawn(async move { run_controller(&c, cmd_rx, true).await })
        };

        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cmd_tx.send(UiCommand::Stop).unwrap();
        while c.state() != RunState::Cancelling {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Past the 3 s watchdog deadline with the job still in flight.
        tokio::time::sleep(Duration::from_secs(4)).await;
        release.store(true, Ordering::SeqCst);
        driver.await.unwrap();

        let mut notices = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let RunEvent::Info(InfoEvent::Message(m)) = ev {
                notices.push(m);
            }
        }
        assert!(notices.iter().any(|m| m == "仍在等待当前测试结束…"));
        assert!(!notices.iter().any(|m| m.starts_with("Still waiting")));
    }
}
