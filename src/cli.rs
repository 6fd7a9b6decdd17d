use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use ecs_suite::capture::console;
use ecs_suite::engine::FixedProbe;
use ecs_suite::jobs::{JobBook, JobId, JobKind, Preset, Selection, CATALOG};
use ecs_suite::model::{
    Connectivity, JobParams, Language, NoticeKind, RunConfig, RunEvent, RunOutcome,
};
use ecs_suite::orchestrator::{process_run_completion, run_controller, RunController, UiCommand};
use ecs_suite::presenter::Presenter;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output routing for the console writer.
enum OutputLine {
    /// Transcript text, written verbatim.
    Transcript(String),
    /// A status or notice line for the operator.
    Notice(String),
}

/// Spawn a blocking writer on the original console so that text still reaches
/// the terminal while a capture session has fd 1 and 2 redirected.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut out: Box<dyn Write> = match console::stdout() {
            Ok(f) => Box::new(f),
            Err(_) => Box::new(std::io::stdout()),
        };
        let mut err: Box<dyn Write> = match console::stderr() {
            Ok(f) => Box::new(f),
            Err(_) => Box::new(std::io::stderr()),
        };

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Transcript(text) => {
                    let _ = out.write_all(text.as_bytes());
                    let _ = out.flush();
                }
                OutputLine::Notice(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "ecs-suite",
    version,
    about = "Benchmark suite runner: hardware, network and streaming-unlock tests in a fixed report order"
)]
pub struct Cli {
    /// Named job combination, applied before --jobs and --skip
    #[arg(long, value_enum, default_value_t = Preset::Custom)]
    pub preset: Preset,

    /// Comma-separated jobs to enable (see --list)
    #[arg(long, value_delimiter = ',')]
    pub jobs: Vec<String>,

    /// Comma-separated jobs to disable
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Transcript language
    #[arg(long, value_enum, default_value_t = Language::Zh)]
    pub lang: Language,

    /// CPU test method (sysbench, geekbench, winsat)
    #[arg(long, default_value = "sysbench")]
    pub cpu_method: String,

    /// CPU thread mode (single, multi)
    #[arg(long, default_value = "multi")]
    pub thread_mode: String,

    /// Memory test method (auto, stream, sysbench, dd, winsat)
    #[arg(long, default_value = "auto")]
    pub memory_method: String,

    /// Disk test method (auto, fio, dd, winsat)
    #[arg(long, default_value = "auto")]
    pub disk_method: String,

    /// Directory the disk test writes to
    #[arg(long)]
    pub disk_path: Option<String>,

    /// Test every mounted disk
    #[arg(long)]
    pub disk_multi: bool,

    /// Route-trace origin (GZ, SH, BJ, CD, ALL)
    #[arg(long, default_value = "GZ")]
    pub nt3_location: String,

    /// Route-trace address family (ipv4, ipv6, both)
    #[arg(long, default_value = "ipv4")]
    pub nt3_type: String,

    /// Speed-test nodes per carrier
    #[arg(long, default_value_t = 2)]
    pub sp_num: u32,

    /// Path to the benchmark binary used by the jobs
    #[arg(long)]
    pub companion: Option<PathBuf>,

    /// Timeout of the reachability probe run before network tests
    #[arg(long, default_value = "3s")]
    pub probe_timeout: humantime::Duration,

    /// Column width of section titles
    #[arg(long, default_value_t = 82)]
    pub width: usize,

    /// Write the final transcript to this file
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Print the run report as JSON instead of streaming the transcript
    #[arg(long)]
    pub json: bool,

    /// List jobs and presets and exit
    #[arg(long)]
    pub list: bool,

    /// Treat the network as unreachable and skip network tests
    #[arg(long)]
    pub offline: bool,
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        language: args.lang,
        width: args.width,
        probe_timeout: Duration::from(args.probe_timeout),
        companion: args.companion.clone(),
        params: JobParams {
            cpu_method: args.cpu_method.clone(),
            thread_mode: args.thread_mode.clone(),
            memory_method: args.memory_method.clone(),
            disk_method: args.disk_method.clone(),
            disk_path: args.disk_path.clone().filter(|p| !p.trim().is_empty()),
            disk_multi: args.disk_multi,
            nt3_location: args.nt3_location.clone(),
            nt3_type: args.nt3_type.clone(),
            sp_num: args.sp_num,
        },
        ..RunConfig::default()
    }
}

fn parse_jobs(names: &[String]) -> Result<Vec<JobId>> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| {
            JobId::from_name(n).with_context(|| format!("unknown job '{n}' (see --list)"))
        })
        .collect()
}

/// Fold preset, `--jobs` and `--skip` into a selection. An explicit job list
/// without a preset replaces the default selection.
pub fn build_selection(args: &Cli, params: &mut JobParams) -> Result<Selection> {
    let enable = parse_jobs(&args.jobs)?;
    let disable = parse_jobs(&args.skip)?;

    let mut selection = Selection::default();
    if !selection.apply_preset(args.preset, params) && !enable.is_empty() {
        selection.set_all(false);
    }
    for id in enable {
        selection.set(id, true);
    }
    for id in disable {
        selection.set(id, false);
    }
    Ok(selection)
}

fn print_catalog(lang: Language) {
    println!("{:<10} {:<14} {:<8} DESCRIPTION", "JOB", "KIND", "DEFAULT");
    for spec in &CATALOG {
        let kind = match spec.kind {
            JobKind::LocalSync => "local",
            JobKind::NetworkSync => "network",
            JobKind::NetworkAsync => "network-async",
        };
        let default = if spec.default_enabled { "on" } else { "off" };
        println!(
            "{:<10} {:<14} {:<8} {}",
            spec.name,
            kind,
            default,
            spec.id.label(lang)
        );
    }
    println!();
    println!("PRESETS");
    for preset in Preset::value_variants() {
        let Some(name) = preset.to_possible_value() else {
            continue;
        };
        let members = match preset.members() {
            Some(ids) => ids.iter().map(|id| id.name()).collect::<Vec<_>>().join(","),
            None => "(current selection)".to_string(),
        };
        println!("  {:<14} {}", name.get_name(), members);
    }
}

/// Forward Ctrl-C to the controller: the first press stops, the next quits.
fn spawn_interrupt_handler(cmd_tx: mpsc::UnboundedSender<UiCommand>) {
    tokio::spawn(async move {
        let mut presses = 0u32;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            let cmd = if presses == 1 {
                UiCommand::Stop
            } else {
                UiCommand::Quit
            };
            tracing::debug!(?cmd, "interrupt");
            if cmd_tx.send(cmd).is_err() {
                break;
            }
        }
    });
}

pub async fn run(args: Cli) -> Result<()> {
    if args.list {
        print_catalog(args.lang);
        return Ok(());
    }

    let mut cfg = build_config(&args);
    let selection = build_selection(&args, &mut cfg.params)?;

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let mut controller =
        RunController::new(cfg, selection, JobBook::companion(), Presenter::new(evt_tx));
    if args.offline {
        controller = controller.with_probe(Arc::new(FixedProbe(Connectivity::offline())));
    }

    let stream_transcript = !args.json;
    let printer_tx = out_tx.clone();
    let printer = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            let line = match ev {
                RunEvent::AppendText(text) if stream_transcript => OutputLine::Transcript(text),
                RunEvent::Progress { label, .. } => OutputLine::Notice(label),
                RunEvent::Notify { kind, message } => match kind {
                    NoticeKind::Info => OutputLine::Notice(message),
                    NoticeKind::Error => OutputLine::Notice(format!("Error: {message}")),
                },
                RunEvent::Info(info) => OutputLine::Notice(info.to_message()),
                RunEvent::AppendText(_)
                | RunEvent::Status(_)
                | RunEvent::StateChanged(_)
                | RunEvent::Controls { .. } => continue,
            };
            let _ = printer_tx.send(line);
        }
    });

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    spawn_interrupt_handler(cmd_tx);

    let report = run_controller(&controller, cmd_rx, true).await;
    drop(controller);
    // A quit can leave an abandoned job holding the event channel open.
    let _ = tokio::time::timeout(Duration::from_millis(500), printer).await;

    let Some(report) = report else {
        drop(out_tx);
        let _ = out_handle.await;
        bail!("no run completed");
    };

    for info in process_run_completion(args.export.as_deref(), &report) {
        let _ = out_tx.send(OutputLine::Notice(info.to_message()));
    }
    if args.json {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Transcript(out + "\n"));
    }

    drop(out_tx);
    let _ = out_handle.await;

    if report.outcome == RunOutcome::Failed {
        bail!("run failed");
    }
    Ok(())
}
