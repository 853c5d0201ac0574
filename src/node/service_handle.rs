use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type StopHook = Box<dyn FnOnce() + Send>;

/// Holds the running protocol tasks and the shutdown channel.
/// Call `shutdown()` to stop the protocol and wait for its tasks.
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
    stop_hooks: Vec<StopHook>,
    join_handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl ServiceHandle {
    /// Create a new ServiceHandle and return it together with a Receiver clonable by tasks.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = ServiceHandle { shutdown_tx: tx, stop_hooks: Vec::new(), join_handles: Vec::new() };
        (handle, rx)
    }

    /// Attach a background task handle (so we wait on it on shutdown).
    pub fn attach(&mut self, h: JoinHandle<anyhow::Result<()>>) {
        self.join_handles.push(h);
    }

    /// Run `hook` when shutdown starts, before waiting on tasks. Used for
    /// tasks that do not watch the shutdown channel, like the round loop.
    pub fn on_shutdown<F: FnOnce() + Send + 'static>(&mut self, hook: F) {
        self.stop_hooks.push(Box::new(hook));
    }

    /// Signal shutdown to all tasks and await them sequentially.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        for hook in self.stop_hooks {
            hook();
        }

        for h in self.join_handles {
            match h.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("service task returned error: {:?}", e),
                Err(e) => tracing::error!("task join error: {:?}", e),
            }
        }
        Ok(())
    }

    /// Tasks still attached and not yet finished.
    pub fn running_tasks(&self) -> usize {
        self.join_handles.iter().filter(|h| !h.is_finished()).count()
    }
}
