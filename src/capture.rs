//! Process-wide output capture.
//!
//! A capture session points file descriptors 1 and 2 at two pipes for the
//! duration of one closure, drains both pipes on helper threads, and hands back
//! what was written to standard output. Standard error is drained and dropped.
//!
//! Redirection is process-global, so sessions on different threads are
//! serialized by an internal lock and the original descriptors are always
//! restored, including when the closure panics. A session opened from inside
//! another one on the same thread stacks on top of it: the inner session sees
//! only its own output and the outer one resumes afterwards.

use std::cell::Cell;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Text returned by [`capture_text`] when a session could not be opened.
pub const CAPTURE_FAILED: &str = "Error creating output capture pipe\n";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to create {stream} pipe: {source}")]
    Pipe {
        stream: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to redirect {stream}: {source}")]
    Redirect {
        stream: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("output capture is not supported on this platform")]
    Unsupported,
}

/// Bytes collected by one session.
#[derive(Debug, Default)]
pub struct Captured {
    pub stdout: String,
    /// Number of bytes written to standard error (content is discarded).
    pub stderr_bytes: usize,
}

static SESSION: Mutex<()> = Mutex::new(());

thread_local! {
    /// Sessions open on this thread. Non-zero means this thread holds `SESSION`.
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Take the session lock unless this thread already holds it.
fn lock_session() -> Option<MutexGuard<'static, ()>> {
    if DEPTH.with(Cell::get) > 0 {
        return None;
    }
    // A panicking job poisons the lock but the descriptors were restored by then.
    Some(SESSION.lock().unwrap_or_else(|e| e.into_inner()))
}

struct Nested;

impl Nested {
    fn enter() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        Nested
    }
}

impl Drop for Nested {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Write text straight to the process standard output descriptor.
///
/// Jobs use this instead of `print!` so their output always reaches fd 1,
/// which is where an active capture session is listening.
pub fn emit(text: &str) {
    let mut out = io::stdout().lock();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

/// Run `f` with standard output and error redirected, returning what it wrote.
pub fn capture<R>(f: impl FnOnce() -> R) -> Result<(Captured, R), CaptureError> {
    let _lock = lock_session();
    let _depth = Nested::enter();
    imp::capture_locked(f)
}

/// Capture `f`'s standard output as text, or a fixed sentinel if the session
/// could not be opened. The closure does not run in the failure case.
pub fn capture_text(f: impl FnOnce()) -> String {
    match capture(f) {
        Ok((captured, ())) => captured.stdout,
        Err(e) => {
            tracing::warn!(error = %e, "output capture unavailable");
            CAPTURE_FAILED.to_string()
        }
    }
}

/// Handles on the console as it was before any capture session.
pub mod console {
    use std::fs::File;
    use std::io;

    /// The original standard output, usable while a session is active.
    pub fn stdout() -> io::Result<File> {
        super::imp::original(1)
    }

    /// The original standard error, usable while a session is active.
    pub fn stderr() -> io::Result<File> {
        super::imp::original(2)
    }

    /// Take the console duplicates now. Call before the first capture session.
    pub fn init() -> io::Result<()> {
        let _lock = super::lock_session();
        super::imp::originals().map(|_| ())
    }
}

#[cfg(unix)]
mod imp {
    use super::{CaptureError, Captured};
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::sync::OnceLock;
    use std::thread::JoinHandle;

    static ORIGINALS: OnceLock<(OwnedFd, OwnedFd)> = OnceLock::new();

    fn dup(fd: RawFd) -> io::Result<OwnedFd> {
        let new_fd = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
        if new_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
    }

    /// Must be called with the session lock held and no session open, so fd 1/2
    /// are the real console. Inside a session the duplicates already exist.
    pub(super) fn originals() -> io::Result<&'static (OwnedFd, OwnedFd)> {
        if let Some(fds) = ORIGINALS.get() {
            return Ok(fds);
        }
        let fds = (dup(1)?, dup(2)?);
        Ok(ORIGINALS.get_or_init(|| fds))
    }

    pub(super) fn original(fd: RawFd) -> io::Result<File> {
        let fds = match ORIGINALS.get() {
            Some(fds) => fds,
            None => {
                let _lock = super::lock_session();
                originals()?
            }
        };
        let source = if fd == 1 { &fds.0 } else { &fds.1 };
        Ok(File::from(source.try_clone()?))
    }

    fn pipe(stream: &'static str) -> Result<(OwnedFd, OwnedFd), CaptureError> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(CaptureError::Pipe {
                stream,
                source: io::Error::last_os_error(),
            });
        }
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        // Keep the pipe ends out of child processes; children only see fd 1/2.
        for fd in [&read, &write] {
            unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
        }
        Ok((read, write))
    }

    /// Points `target` at another descriptor until dropped.
    struct Redirect {
        target: RawFd,
        saved: OwnedFd,
    }

    impl Redirect {
        fn install(
            stream: &'static str,
            target: RawFd,
            to: &OwnedFd,
        ) -> Result<Self, CaptureError> {
            let redirect_err = move |source| CaptureError::Redirect { stream, source };
            let saved = dup(target).map_err(redirect_err)?;
            if unsafe { libc::dup2(to.as_raw_fd(), target) } < 0 {
                return Err(redirect_err(io::Error::last_os_error()));
            }
            Ok(Self { target, saved })
        }
    }

    impl Drop for Redirect {
        fn drop(&mut self) {
            unsafe { libc::dup2(self.saved.as_raw_fd(), self.target) };
        }
    }

    fn spawn_drain(read: OwnedFd) -> JoinHandle<Vec<u8>> {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = File::from(read).read_to_end(&mut buf);
            buf
        })
    }

    /// Live redirection state. Teardown restores fd 1/2 and closes every write
    /// end before joining the drains, which is what lets them reach end-of-stream.
    struct Session {
        redirects: Vec<Redirect>,
        writers: Vec<OwnedFd>,
        drains: Vec<JoinHandle<Vec<u8>>>,
    }

    impl Session {
        fn release_writers(&mut self) {
            flush_std();
            self.redirects.clear();
            self.writers.clear();
        }

        fn finish(mut self) -> Captured {
            self.release_writers();
            let mut bufs = std::mem::take(&mut self.drains)
                .into_iter()
                .map(|h| h.join().unwrap_or_default());
            let stdout = bufs.next().unwrap_or_default();
            let stderr = bufs.next().unwrap_or_default();
            Captured {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr_bytes: stderr.len(),
            }
        }
    }

    impl Drop for Session {
        fn drop(&mut self) {
            if self.drains.is_empty() {
                return;
            }
            self.release_writers();
            for handle in self.drains.drain(..) {
                let _ = handle.join();
            }
        }
    }

    fn flush_std() {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }

    pub(super) fn capture_locked<R>(
        f: impl FnOnce() -> R,
    ) -> Result<(Captured, R), CaptureError> {
        originals().map_err(|source| CaptureError::Redirect {
            stream: "console",
            source,
        })?;
        flush_std();

        let (out_r, out_w) = pipe("stdout")?;
        let (err_r, err_w) = pipe("stderr")?;

        // Drains start before the redirect so no early write can fill a pipe.
        let mut session = Session {
            redirects: Vec::with_capacity(2),
            writers: vec![out_w, err_w],
            drains: vec![spawn_drain(out_r), spawn_drain(err_r)],
        };
        let stdout_redirect = Redirect::install("stdout", 1, &session.writers[0])?;
        session.redirects.push(stdout_redirect);
        let stderr_redirect = Redirect::install("stderr", 2, &session.writers[1])?;
        session.redirects.push(stderr_redirect);
        // fd 1/2 now hold the only other references to the write ends.
        session.writers.clear();

        let value = f();
        Ok((session.finish(), value))
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{CaptureError, Captured};
    use std::fs::File;
    use std::io;

    pub(super) fn originals() -> io::Result<()> {
        Ok(())
    }

    pub(super) fn original(_fd: i32) -> io::Result<File> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "console duplication requires unix",
        ))
    }

    pub(super) fn capture_locked<R>(
        _f: impl FnOnce() -> R,
    ) -> Result<(Captured, R), CaptureError> {
        Err(CaptureError::Unsupported)
    }
}
