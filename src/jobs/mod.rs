//! Job catalog and the invocation contract.
//!
//! The catalog is fixed at compile time: every job has a stable name, a kind
//! that decides which phase runs it, a default enable flag and bilingual
//! labels. Implementations are looked up in a [`JobBook`] at run time.

mod companion;
mod selection;

pub use companion::CompanionJob;
pub use selection::{Preset, Selection, SelectionSet};

use crate::engine::CancelToken;
use crate::model::{Connectivity, JobParams, Language};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobId {
    Basic,
    Cpu,
    Memory,
    Disk,
    Comm,
    Unlock,
    Security,
    Email,
    Backtrace,
    Nt3,
    Speed,
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Runs in phase 1; never gated on connectivity.
    LocalSync,
    /// Runs inline in phase 3 when the network is reachable.
    NetworkSync,
    /// Launched in phase 2, awaited at its fixed phase-3 position.
    NetworkAsync,
}

impl JobKind {
    pub fn is_network(self) -> bool {
        !matches!(self, JobKind::LocalSync)
    }
}

/// Static description of a catalog entry.
#[derive(Debug)]
pub struct JobSpec {
    pub id: JobId,
    pub name: &'static str,
    pub kind: JobKind,
    pub default_enabled: bool,
    label: (&'static str, &'static str),
    title: (&'static str, &'static str),
    windows: bool,
}

pub const CATALOG: [JobSpec; 12] = [
    JobSpec {
        id: JobId::Basic,
        name: "basic",
        kind: JobKind::LocalSync,
        default_enabled: true,
        label: ("基础信息测试", "Basic information"),
        title: ("系统基础信息", "System-Basic-Information"),
        windows: true,
    },
    JobSpec {
        id: JobId::Cpu,
        name: "cpu",
        kind: JobKind::LocalSync,
        default_enabled: true,
        label: ("CPU 性能测试", "CPU test"),
        title: ("CPU测试", "CPU-Test"),
        windows: true,
    },
    JobSpec {
        id: JobId::Memory,
        name: "memory",
        kind: JobKind::LocalSync,
        default_enabled: true,
        label: ("内存性能测试", "Memory test"),
        title: ("内存测试", "Memory-Test"),
        windows: true,
    },
    JobSpec {
        id: JobId::Disk,
        name: "disk",
        kind: JobKind::LocalSync,
        default_enabled: true,
        label: ("磁盘性能测试", "Disk test"),
        title: ("硬盘测试", "Disk-Test"),
        windows: true,
    },
    JobSpec {
        id: JobId::Comm,
        name: "comm",
        kind: JobKind::NetworkSync,
        default_enabled: false,
        label: ("御三家流媒体测试", "Common streaming unlock"),
        title: ("御三家流媒体解锁", "Common-Streaming-Media-Unlock"),
        windows: true,
    },
    JobSpec {
        id: JobId::Unlock,
        name: "unlock",
        kind: JobKind::NetworkAsync,
        default_enabled: false,
        label: ("跨国流媒体解锁测试", "Cross-border streaming unlock"),
        title: ("跨国流媒体解锁", "Cross-Border-Streaming-Media-Unlock"),
        windows: true,
    },
    JobSpec {
        id: JobId::Security,
        name: "security",
        kind: JobKind::NetworkSync,
        default_enabled: false,
        label: ("IP质量检测", "IP quality check"),
        title: ("IP质量检测", "IP-Quality-Check"),
        windows: true,
    },
    JobSpec {
        id: JobId::Email,
        name: "email",
        kind: JobKind::NetworkAsync,
        default_enabled: false,
        label: ("邮件端口检测", "Email port check"),
        title: ("邮件端口检测", "Email-Port-Check"),
        windows: true,
    },
    JobSpec {
        id: JobId::Backtrace,
        name: "backtrace",
        kind: JobKind::NetworkSync,
        default_enabled: false,
        label: ("上游及回程线路检测", "Upstream and return route"),
        title: ("上游及回程线路检测", "Upstream-and-Return-Route-Check"),
        windows: false,
    },
    JobSpec {
        id: JobId::Nt3,
        name: "nt3",
        kind: JobKind::NetworkSync,
        default_enabled: false,
        label: ("三网回程路由检测", "Three-network return route"),
        title: ("三网回程路由检测", "Three-Network-Return-Route-Check"),
        windows: false,
    },
    JobSpec {
        id: JobId::Speed,
        name: "speed",
        kind: JobKind::NetworkSync,
        default_enabled: false,
        label: ("网络测速", "Speed test"),
        title: ("就近节点测速", "Speed-Test"),
        windows: true,
    },
    JobSpec {
        id: JobId::Ping,
        name: "ping",
        kind: JobKind::NetworkAsync,
        default_enabled: false,
        label: ("三网PING值检测", "Three-network ping"),
        title: ("三网ICMP的PING值检测", "Three-Network-ICMP-Ping-Check"),
        windows: true,
    },
];

/// Phase-3 display order. Async jobs appear here at the position where their
/// result is awaited.
pub const DRAIN_ORDER: [JobId; 8] = [
    JobId::Comm,
    JobId::Unlock,
    JobId::Security,
    JobId::Email,
    JobId::Backtrace,
    JobId::Nt3,
    JobId::Ping,
    JobId::Speed,
];

impl JobId {
    pub fn all() -> impl Iterator<Item = JobId> {
        CATALOG.iter().map(|s| s.id)
    }

    pub fn spec(self) -> &'static JobSpec {
        // CATALOG is declared in discriminant order.
        &CATALOG[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn kind(self) -> JobKind {
        self.spec().kind
    }

    pub fn from_name(name: &str) -> Option<JobId> {
        let name = name.trim();
        CATALOG
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.id)
    }

    /// Progress label shown while the job runs.
    pub fn label(self, lang: Language) -> &'static str {
        let (zh, en) = self.spec().label;
        lang.pick(zh, en)
    }

    /// Section title printed above the job's transcript block.
    pub fn title(self, lang: Language) -> &'static str {
        let (zh, en) = self.spec().title;
        lang.pick(zh, en)
    }

    /// Route tracing jobs are unavailable on Windows.
    pub fn supported_here(self) -> bool {
        self.spec().windows || !cfg!(windows)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a job may consult while it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: JobId,
    pub language: Language,
    pub params: Arc<JobParams>,
    pub connectivity: Option<Connectivity>,
    pub companion: Option<PathBuf>,
    pub cancel: CancelToken,
}

/// A blocking benchmark unit.
///
/// Synchronous jobs may write to the process standard output (through
/// [`crate::capture::emit`] or a child process inheriting it) and may also
/// return text; both reach the transcript. Async-eligible jobs run outside any
/// capture session and must report only through the returned text.
pub trait Job: Send + Sync {
    fn run(&self, ctx: &JobContext) -> String;

    /// Whether the job needs the companion benchmark binary located first.
    fn needs_companion(&self) -> bool {
        false
    }
}

impl<F> Job for F
where
    F: Fn(&JobContext) -> String + Send + Sync,
{
    fn run(&self, ctx: &JobContext) -> String {
        self(ctx)
    }
}

/// Implementations keyed by catalog id.
#[derive(Clone, Default)]
pub struct JobBook {
    jobs: HashMap<JobId, Arc<dyn Job>>,
}

impl JobBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every catalog entry backed by the companion benchmark binary.
    pub fn companion() -> Self {
        JobId::all().fold(Self::new(), |book, id| book.with(id, CompanionJob::new(id)))
    }

    pub fn with(mut self, id: JobId, job: impl Job + 'static) -> Self {
        self.jobs.insert(id, Arc::new(job));
        self
    }

    pub fn get(&self, id: JobId) -> Option<Arc<dyn Job>> {
        self.jobs.get(&id).cloned()
    }

    pub fn needs_companion<'a>(&self, ids: impl IntoIterator<Item = &'a JobId>) -> bool {
        ids.into_iter()
            .filter_map(|id| self.jobs.get(id))
            .any(|job| job.needs_companion())
    }
}
