//! Presentation surface shared by the controller and the orchestrator.
//!
//! Every update goes out as a [`RunEvent`]; appended text is also kept as the
//! run transcript. Once the controller seals the transcript (user stop), later
//! appends and progress updates from the abandoned run are dropped.

use crate::model::{InfoEvent, NoticeKind, RunEvent};
use crate::progress::Progress;
use crate::transcript::strip_ansi;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Default)]
struct Transcript {
    text: String,
    sealed: bool,
}

#[derive(Debug, Clone)]
pub struct Presenter {
    tx: UnboundedSender<RunEvent>,
    transcript: Arc<Mutex<Transcript>>,
}

impl Presenter {
    pub fn new(tx: UnboundedSender<RunEvent>) -> Self {
        Self {
            tx,
            transcript: Arc::new(Mutex::new(Transcript::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, ev: RunEvent) {
        let _ = self.tx.send(ev);
    }

    /// Append captured text with color escapes removed. Returns false when the
    /// transcript is sealed and the text was dropped.
    pub fn append_text(&self, text: &str) -> bool {
        let clean = strip_ansi(text);
        let mut t = self.lock();
        if t.sealed {
            return false;
        }
        if clean.is_empty() {
            return true;
        }
        t.text.push_str(&clean);
        // Sent under the lock so event order matches transcript order.
        self.send(RunEvent::AppendText(clean));
        true
    }

    pub fn set_progress(&self, progress: Progress) {
        let t = self.lock();
        if t.sealed {
            return;
        }
        self.send(RunEvent::Progress {
            fraction: progress.fraction,
            label: progress.label,
        });
    }

    pub fn set_status(&self, label: impl Into<String>) {
        self.send(RunEvent::Status(label.into()));
    }

    pub fn notify(&self, kind: NoticeKind, message: impl Into<String>) {
        self.send(RunEvent::Notify {
            kind,
            message: message.into(),
        });
    }

    pub fn info(&self, info: InfoEvent) {
        self.send(RunEvent::Info(info));
    }

    pub(crate) fn emit(&self, ev: RunEvent) {
        self.send(ev);
    }

    /// Append a final marker and refuse all further text.
    pub fn seal_with(&self, marker: &str) {
        let mut t = self.lock();
        if t.sealed {
            return;
        }
        t.text.push_str(marker);
        t.sealed = true;
        self.send(RunEvent::AppendText(marker.to_string()));
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Start a fresh transcript for a new run.
    pub fn reset(&self) {
        *self.lock() = Transcript::default();
    }

    pub fn transcript(&self) -> String {
        self.lock().text.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn appended_text_is_cleaned_and_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let p = Presenter::new(tx);
        assert!(p.append_text("\x1b[31mred\x1b[0m\n"));
        assert_eq!(p.transcript(), "red\n");
        match rx.try_recv().unwrap() {
            RunEvent::AppendText(t) => assert_eq!(t, "red\n"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sealed_transcript_rejects_text_and_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let p = Presenter::new(tx);
        p.append_text("a");
        p.seal_with("|stop");
        assert!(!p.append_text("b"));
        p.set_progress(Progress {
            fraction: 1.0,
            label: "late".into(),
        });
        assert_eq!(p.transcript(), "a|stop");

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert_eq!(events.len(), 2);

        p.reset();
        assert!(p.append_text("c"));
        assert_eq!(p.transcript(), "c");
    }
}
