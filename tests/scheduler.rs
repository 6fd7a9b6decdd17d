//! Orchestrator scheduling: phase order, connectivity gating, progress and
//! failure isolation. Capture sessions here share fd 1 with the test harness,
//! so assertions are on containment and ordering only.

use ecs_suite::engine::{CancelToken, FixedProbe, RunEngine};
use ecs_suite::jobs::{Job, JobBook, JobContext, JobId, Selection, SelectionSet};
use ecs_suite::locator::{Companion, CompanionLocator, Locate, LocateError};
use ecs_suite::model::{
    Connectivity, InfoEvent, Language, RunConfig, RunEvent, RunOutcome, RunReport,
};
use ecs_suite::presenter::Presenter;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn config() -> RunConfig {
    RunConfig {
        language: Language::En,
        width: 40,
        ..RunConfig::default()
    }
}

fn selection(ids: &[JobId]) -> SelectionSet {
    let mut sel = Selection::none();
    for id in ids {
        sel.set(*id, true);
    }
    sel.snapshot()
}

fn online() -> Arc<FixedProbe> {
    Arc::new(FixedProbe(Connectivity::from_reachability(true, false)))
}

fn offline() -> Arc<FixedProbe> {
    Arc::new(FixedProbe(Connectivity::offline()))
}

fn reply(text: &'static str) -> impl Fn(&JobContext) -> String + Send + Sync {
    move |_: &JobContext| text.to_string()
}

async fn run(engine: RunEngine) -> (RunReport, Vec<RunEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = engine
        .run(Presenter::new(tx), CancelToken::new())
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    (report, events)
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("{needle:?} missing from transcript:\n{haystack}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_results_appear_in_fixed_order_regardless_of_finish_time() {
    let email_started = Arc::new(AtomicBool::new(false));
    let flag = email_started.clone();
    let slow_unlock = move |_: &JobContext| {
        // Only finishes early if the email job runs alongside it.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !flag.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        std::thread::sleep(Duration::from_millis(200));
        if flag.load(Ordering::SeqCst) {
            "unlock-overlapped".to_string()
        } else {
            "unlock-serial".to_string()
        }
    };
    let flag = email_started.clone();
    let fast_email = move |_: &JobContext| {
        flag.store(true, Ordering::SeqCst);
        "email-result".to_string()
    };

    let jobs = JobBook::new()
        .with(JobId::Comm, reply("comm-result\n"))
        .with(JobId::Unlock, slow_unlock)
        .with(JobId::Email, fast_email)
        .with(JobId::Ping, reply("ping-result\n"))
        .with(JobId::Speed, reply("speed-result\n"));
    let ids = [JobId::Speed, JobId::Ping, JobId::Email, JobId::Unlock, JobId::Comm];
    let engine = RunEngine::new(config(), selection(&ids), jobs).with_probe(online());

    let (report, _) = run(engine).await;
    let t = &report.transcript;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.attempted, 5);

    let order = [
        position(t, "Common-Streaming-Media-Unlock"),
        position(t, "comm-result"),
        position(t, "Cross-Border-Streaming-Media-Unlock"),
        position(t, "unlock-overlapped"),
        position(t, "Email-Port-Check"),
        position(t, "email-result"),
        position(t, "Three-Network-ICMP-Ping-Check"),
        position(t, "ping-result"),
        position(t, "Speed-Test"),
        position(t, "speed-result"),
    ];
    assert!(order.windows(2).all(|w| w[0] < w[1]), "{t}");
}

#[tokio::test]
async fn local_jobs_run_before_any_network_job() {
    let jobs = JobBook::new()
        .with(JobId::Cpu, reply("cpu-result\n"))
        .with(JobId::Disk, reply("disk-result\n"))
        .with(JobId::Comm, reply("comm-result\n"));
    let ids = [JobId::Comm, JobId::Disk, JobId::Cpu];
    let engine = RunEngine::new(config(), selection(&ids), jobs).with_probe(online());

    let (report, events) = run(engine).await;
    let t = &report.transcript;
    assert!(position(t, "Fusion Benchmark Suite") < position(t, "cpu-result"));
    assert!(position(t, "cpu-result") < position(t, "disk-result"));
    assert!(position(t, "disk-result") < position(t, "comm-result"));
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::Info(InfoEvent::Connectivity(c)) if c.connected)));
}

#[tokio::test]
async fn offline_run_skips_network_jobs_without_counting_them() {
    let jobs = JobBook::new()
        .with(JobId::Cpu, reply("cpu-result\n"))
        .with(JobId::Speed, reply("speed-result\n"))
        .with(JobId::Ping, reply("ping-result\n"));
    let ids = [JobId::Cpu, JobId::Speed, JobId::Ping];
    let engine = RunEngine::new(config(), selection(&ids), jobs).with_probe(offline());

    let (report, events) = run(engine).await;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.total, 3);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.connectivity, Some(Connectivity::offline()));
    assert!(report.transcript.contains("cpu-result"));
    assert!(!report.transcript.contains("Speed-Test"));
    assert!(!report.transcript.contains("ping-result"));

    let progress: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Progress { fraction, label } => Some((*fraction, label.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].1, "[1/3] CPU test");
    assert!((progress[0].0 - 1.0 / 3.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn progress_counts_attempted_steps_against_fixed_total() {
    let jobs = JobBook::new()
        .with(JobId::Basic, reply("a\n"))
        .with(JobId::Cpu, reply("b\n"))
        .with(JobId::Memory, reply("c\n"))
        .with(JobId::Disk, reply("d\n"));
    let ids = [JobId::Basic, JobId::Cpu, JobId::Memory, JobId::Disk];
    let engine = RunEngine::new(config(), selection(&ids), jobs);

    let (report, events) = run(engine).await;
    assert_eq!(report.attempted, 4);
    let fractions: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Progress { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert_eq!(fractions, vec![0.25, 0.5, 0.75, 1.0]);
    // A local-only run never probes the network.
    assert!(report.connectivity.is_none());
}

#[tokio::test]
async fn panicking_jobs_become_transcript_errors_and_the_run_continues() {
    let jobs = JobBook::new()
        .with(JobId::Cpu, |_: &JobContext| -> String { panic!("cpu exploded") })
        .with(JobId::Memory, reply("memory-result\n"))
        .with(JobId::Email, |_: &JobContext| -> String { panic!("email exploded") })
        .with(JobId::Speed, reply("speed-result\n"));
    let ids = [JobId::Cpu, JobId::Memory, JobId::Email, JobId::Speed];
    let engine = RunEngine::new(config(), selection(&ids), jobs).with_probe(online());

    let (report, _) = run(engine).await;
    let t = &report.transcript;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.attempted, 4);
    assert!(position(t, "Error: cpu exploded") < position(t, "memory-result"));
    assert!(position(t, "Error: email exploded") < position(t, "speed-result"));
}

#[tokio::test]
async fn unregistered_job_reports_an_error() {
    let engine = RunEngine::new(config(), selection(&[JobId::Basic]), JobBook::new());
    let (report, _) = run(engine).await;
    assert!(report
        .transcript
        .contains("Error: no implementation registered for basic"));
}

#[tokio::test]
async fn cancelled_token_runs_no_jobs() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let jobs = JobBook::new().with(JobId::Cpu, move |_: &JobContext| {
        flag.store(true, Ordering::SeqCst);
        String::new()
    });
    let engine = RunEngine::new(config(), selection(&[JobId::Cpu]), jobs);
    let cancel = CancelToken::new();
    cancel.cancel();
    let (tx, _rx) = mpsc::unbounded_channel();
    let report = engine.run(Presenter::new(tx), cancel).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.attempted, 0);
    assert!(!ran.load(Ordering::SeqCst));
}

/// A job that needs the companion binary but never runs it.
struct NeedsBinary;

impl Job for NeedsBinary {
    fn run(&self, ctx: &JobContext) -> String {
        format!("binary at {}\n", ctx.companion.as_ref().unwrap().display())
    }

    fn needs_companion(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct CountingLocator {
    cleanups: AtomicUsize,
}

impl Locate for CountingLocator {
    fn locate(&self) -> Result<Companion, LocateError> {
        Ok(Companion::temporary("/tmp/ecs-suite-test-companion"))
    }

    fn cleanup(&self, _companion: &Companion) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn missing_companion_aborts_before_any_job() {
    let jobs = JobBook::new().with(JobId::Cpu, NeedsBinary);
    let engine = RunEngine::new(config(), selection(&[JobId::Cpu]), jobs)
        .with_locator(Arc::new(CompanionLocator::explicit_only("/nonexistent/goecs")));

    let (report, events) = run(engine).await;
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.attempted, 0);
    assert!(report.transcript.contains("Error: benchmark binary not found"));
    assert!(!report.transcript.contains("CPU-Test"));
    assert!(events.iter().any(|e| matches!(e, RunEvent::Notify { .. })));
}

#[tokio::test]
async fn companion_is_located_once_and_cleaned_up() {
    let locator = Arc::new(CountingLocator::default());
    let jobs = JobBook::new()
        .with(JobId::Cpu, NeedsBinary)
        .with(JobId::Memory, NeedsBinary);
    let engine = RunEngine::new(config(), selection(&[JobId::Cpu, JobId::Memory]), jobs)
        .with_locator(locator.clone());

    let (report, _) = run(engine).await;
    assert_eq!(
        report
            .transcript
            .matches("binary at /tmp/ecs-suite-test-companion")
            .count(),
        2
    );
    assert_eq!(locator.cleanups.load(Ordering::SeqCst), 1);

    // Cancelled runs release the companion too.
    let jobs = JobBook::new().with(JobId::Cpu, NeedsBinary);
    let engine = RunEngine::new(config(), selection(&[JobId::Cpu]), jobs)
        .with_locator(locator.clone());
    let cancel = CancelToken::new();
    cancel.cancel();
    let (tx, _rx) = mpsc::unbounded_channel();
    engine.run(Presenter::new(tx), cancel).await.unwrap();
    assert_eq!(locator.cleanups.load(Ordering::SeqCst), 2);
}
