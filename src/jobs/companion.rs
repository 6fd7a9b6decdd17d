//! Jobs backed by the companion benchmark binary.
//!
//! Each job runs the binary once with only its own test switched on.

use super::{Job, JobContext, JobId, JobKind};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct CompanionJob {
    id: JobId,
}

impl CompanionJob {
    pub fn new(id: JobId) -> Self {
        Self { id }
    }
}

fn switch(id: JobId) -> &'static str {
    match id {
        JobId::Basic => "basic",
        JobId::Cpu => "cpu",
        JobId::Memory => "memory",
        JobId::Disk => "disk",
        JobId::Comm => "comm",
        JobId::Unlock => "ut",
        JobId::Security => "security",
        JobId::Email => "email",
        JobId::Backtrace => "backtrace",
        JobId::Nt3 => "nt3",
        JobId::Speed => "speed",
        JobId::Ping => "ping",
    }
}

/// Command line selecting exactly one test on the companion binary.
pub(crate) fn companion_args(id: JobId, ctx: &JobContext) -> Vec<String> {
    let p = &ctx.params;
    let mut args = vec![
        "-menu=false".to_string(),
        "-l".to_string(),
        ctx.language.code().to_string(),
    ];
    args.extend(JobId::all().map(|other| format!("-{}={}", switch(other), other == id)));
    match id {
        JobId::Cpu => {
            args.extend(["-cpum".into(), p.cpu_method.clone()]);
            args.extend(["-cput".into(), p.thread_mode.clone()]);
        }
        JobId::Memory => args.extend(["-memorym".into(), p.memory_method.clone()]),
        JobId::Disk => {
            args.extend(["-diskm".into(), p.disk_method.clone()]);
            if let Some(path) = p.disk_path.as_deref().filter(|s| !s.trim().is_empty()) {
                args.extend(["-diskp".into(), path.to_string()]);
            }
            args.push(format!("-diskmc={}", p.disk_multi));
        }
        JobId::Nt3 => {
            args.extend(["-nt3loc".into(), p.nt3_location.clone()]);
            args.extend(["-nt3t".into(), p.nt3_type.clone()]);
        }
        JobId::Speed => args.extend(["-spnum".into(), p.sp_num.to_string()]),
        _ => {}
    }
    args
}

impl CompanionJob {
    /// Inherit stdout so the active capture session records the child directly.
    fn run_inline(&self, cmd: &mut Command) -> String {
        match cmd.stdin(Stdio::null()).status() {
            Ok(status) if status.success() => String::new(),
            Ok(status) => format!("Error: {} test exited with {status}\n", self.id),
            Err(e) => format!("Error: failed to start {} test: {e}\n", self.id),
        }
    }

    /// Collect stdout as text, killing the child if the run is cancelled.
    fn run_collected(&self, cmd: &mut Command, ctx: &JobContext) -> String {
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match child {
            Ok(c) => c,
            Err(e) => return format!("Error: failed to start {} test: {e}\n", self.id),
        };
        let reader = child.stdout.take().map(|mut out| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });

        let status = wait_or_cancel(&mut child, ctx);
        let text = reader
            .and_then(|h| h.join().ok())
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default();
        match status {
            Some(s) if !s.success() => {
                format!("{text}Error: {} test exited with {s}\n", self.id)
            }
            _ => text,
        }
    }
}

fn wait_or_cancel(child: &mut Child, ctx: &JobContext) -> Option<std::process::ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        if ctx.cancel.is_cancelled() {
            tracing::debug!(job = %ctx.id, "killing cancelled companion process");
            let _ = child.kill();
            return child.wait().ok();
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

impl Job for CompanionJob {
    fn run(&self, ctx: &JobContext) -> String {
        let Some(path) = ctx.companion.as_ref() else {
            return format!("Error: benchmark binary unavailable for {} test\n", self.id);
        };
        let mut cmd = Command::new(path);
        cmd.args(companion_args(self.id, ctx));
        tracing::debug!(job = %self.id, binary = %path.display(), "running companion");
        match self.id.kind() {
            JobKind::NetworkAsync => self.run_collected(&mut cmd, ctx),
            JobKind::LocalSync | JobKind::NetworkSync => self.run_inline(&mut cmd),
        }
    }

    fn needs_companion(&self) -> bool {
        true
    }
}
