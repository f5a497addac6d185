use anyhow::Context;
use std::sync::mpsc;
use std::thread::JoinHandle;

/// A device stream parked on its own thread until stopped.
///
/// cpal streams are not `Send` on every platform, so each one is built, kept
/// alive and dropped on a dedicated thread.
pub struct StreamThread {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Runs `build` on a new thread, keeps the stream it returns alive until
    /// stopped, and hands the rest of its result back to the caller.
    pub fn spawn<S, T, F>(name: &str, build: F) -> anyhow::Result<(Self, T)>
    where
        S: 'static,
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<(S, T)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<T>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let label = name.to_string();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok((stream, handoff)) => {
                    if ready_tx.send(Ok(handoff)).is_err() {
                        return;
                    }
                    // Returns on stop or when the owner is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("{} stopped", label);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .with_context(|| format!("Failed to spawn {} thread", name))?;

        let handoff = ready_rx
            .recv()
            .with_context(|| format!("{} thread exited during setup", name))??;

        Ok((
            Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            },
            handoff,
        ))
    }

    /// Tells the thread to drop its stream without waiting for it. The first
    /// call hands back the thread for the caller to join where blocking is
    /// acceptable.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.thread.take()
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        // Detached; the thread exits on its own once signalled.
        let _ = self.stop();
    }
}
