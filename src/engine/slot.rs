use tokio::sync::oneshot;

/// Create a single-write, single-read result slot for one background job.
pub fn async_slot<T>() -> (SlotWriter<T>, AsyncSlot<T>) {
    let (tx, rx) = oneshot::channel();
    (SlotWriter(tx), AsyncSlot(rx))
}

/// Write side, held by the background task.
#[derive(Debug)]
pub struct SlotWriter<T>(oneshot::Sender<T>);

impl<T> SlotWriter<T> {
    /// Store the result. Returns false, discarding the value, when the reader
    /// has already given up on it.
    pub fn fill(self, value: T) -> bool {
        self.0.send(value).is_ok()
    }
}

/// Read side, held by the orchestrator until the job's display position.
#[derive(Debug)]
pub struct AsyncSlot<T>(oneshot::Receiver<T>);

impl<T> AsyncSlot<T> {
    /// Wait for the value. `None` means the writer went away without filling it.
    pub async fn wait(self) -> Option<T> {
        self.0.await.ok()
    }
}
