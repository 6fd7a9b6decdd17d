//! Companion binary resolution.
//!
//! Finds the benchmark executable that companion-backed jobs run, recording
//! every path it tried so a miss can be reported with a full trace.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the companion binary explicitly.
pub const COMPANION_ENV: &str = "ECS_SUITE_COMPANION";

#[cfg(windows)]
const BINARY_NAMES: &[&str] = &["goecs.exe", "ecs.exe"];
#[cfg(not(windows))]
const BINARY_NAMES: &[&str] = &["goecs", "ecs"];

/// A resolved companion executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Companion {
    pub path: PathBuf,
    /// Whether the file is a temporary artifact owned by this process.
    pub temporary: bool,
}

impl Companion {
    pub fn installed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: true,
        }
    }
}

/// Paths inspected during a failed lookup.
#[derive(Debug, Clone, Default)]
pub struct SearchTrace(pub Vec<PathBuf>);

impl fmt::Display for SearchTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.0 {
            write!(f, "\n  {}", p.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("benchmark binary not found; checked:{0}")]
    NotFound(SearchTrace),
}

pub trait Locate: Send + Sync {
    fn locate(&self) -> Result<Companion, LocateError>;

    /// Release anything [`locate`](Self::locate) created. Installed binaries are left alone.
    fn cleanup(&self, companion: &Companion) {
        if companion.temporary {
            if let Err(e) = std::fs::remove_file(&companion.path) {
                tracing::warn!(path = %companion.path.display(), error = %e, "companion cleanup failed");
            }
        }
    }
}

/// Searches, in order: an explicit path, [`COMPANION_ENV`], the directory of
/// the running executable, the user's executable directory, then `PATH`.
#[derive(Debug, Clone, Default)]
pub struct CompanionLocator {
    explicit: Option<PathBuf>,
    search_path: bool,
}

impl CompanionLocator {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            search_path: true,
        }
    }

    /// Only consult the given path.
    pub fn explicit_only(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit: Some(path.into()),
            search_path: false,
        }
    }

    fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Some(p) = &self.explicit {
            out.push(p.clone());
        }
        if !self.search_path {
            return out;
        }
        if let Some(p) = std::env::var_os(COMPANION_ENV) {
            out.push(PathBuf::from(p));
        }
        let mut search_dirs: Vec<PathBuf> = Vec::new();
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
        {
            search_dirs.push(dir);
        }
        if let Some(dir) = dirs::executable_dir() {
            search_dirs.push(dir);
        }
        if let Some(path) = std::env::var_os("PATH") {
            search_dirs.extend(std::env::split_paths(&path));
        }
        for dir in search_dirs {
            out.extend(BINARY_NAMES.iter().map(|name| dir.join(name)));
        }
        out
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl Locate for CompanionLocator {
    fn locate(&self) -> Result<Companion, LocateError> {
        let mut checked = Vec::new();
        for candidate in self.candidates() {
            if is_executable(&candidate) {
                tracing::debug!(path = %candidate.display(), "companion located");
                return Ok(Companion::installed(candidate));
            }
            checked.push(candidate);
        }
        Err(LocateError::NotFound(SearchTrace(checked)))
    }
}
