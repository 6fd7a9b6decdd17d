use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: String,
    pub language: Language,
    /// Column width used for centred section titles.
    pub width: usize,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    #[serde(default)]
    pub companion: Option<PathBuf>,
    pub params: JobParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: String::from("0"),
            language: Language::En,
            width: 82,
            probe_timeout: Duration::from_secs(3),
            companion: None,
            params: JobParams::default(),
        }
    }
}

/// Generate a random identifier for one run.
pub fn gen_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

/// Per-job knobs. Opaque to the scheduler; only job implementations read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    pub cpu_method: String,
    pub thread_mode: String,
    pub memory_method: String,
    pub disk_method: String,
    #[serde(default)]
    pub disk_path: Option<String>,
    pub disk_multi: bool,
    pub nt3_location: String,
    pub nt3_type: String,
    pub sp_num: u32,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            cpu_method: "sysbench".into(),
            thread_mode: "multi".into(),
            memory_method: "auto".into(),
            disk_method: "auto".into(),
            disk_path: None,
            disk_multi: false,
            nt3_location: "GZ".into(),
            nt3_type: "ipv4".into(),
            sp_num: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }

    /// Pick the variant of a bilingual string.
    pub fn pick(self, zh: &'static str, en: &'static str) -> &'static str {
        match self {
            Language::Zh => zh,
            Language::En => en,
        }
    }
}

/// Lifecycle of one Run Controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Cancelling,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpStack {
    Ipv4,
    Ipv6,
    DualStack,
    None,
}

/// Outcome of the single pre-network reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connectivity {
    pub connected: bool,
    pub stack: IpStack,
}

impl Connectivity {
    pub fn offline() -> Self {
        Self {
            connected: false,
            stack: IpStack::None,
        }
    }

    pub fn from_reachability(v4: bool, v6: bool) -> Self {
        let stack = match (v4, v6) {
            (true, true) => IpStack::DualStack,
            (true, false) => IpStack::Ipv4,
            (false, true) => IpStack::Ipv6,
            (false, false) => IpStack::None,
        };
        Self {
            connected: v4 || v6,
            stack,
        }
    }
}

/// Events emitted by the orchestrator and controller for presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    AppendText(String),
    Progress {
        fraction: f64,
        label: String,
    },
    Status(String),
    Notify {
        kind: NoticeKind,
        message: String,
    },
    StateChanged(RunState),
    Controls {
        start_enabled: bool,
        stop_enabled: bool,
    },
    Info(InfoEvent),
}

/// Structured info events consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Connectivity(Connectivity),
    CompanionLocated { path: PathBuf },
    Exported { path: PathBuf },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Connectivity(c) if c.connected => {
                format!("Network reachable ({:?})", c.stack)
            }
            InfoEvent::Connectivity(_) => {
                "Network unreachable; network tests will be skipped".to_string()
            }
            InfoEvent::CompanionLocated { path } => {
                format!("Using benchmark binary: {}", path.display())
            }
            InfoEvent::Exported { path } => format!("Exported transcript: {}", path.display()),
        }
    }
}

/// Summary of one finished run, suitable for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub attempted: usize,
    pub total: usize,
    pub elapsed_secs: f64,
    pub connectivity: Option<Connectivity>,
    pub transcript: String,
}
