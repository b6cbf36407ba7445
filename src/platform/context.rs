//! Serial execution contexts for hardware callbacks
//!
//! Each context owns one named thread that runs posted jobs in FIFO
//! order. Device-open and session-configure callbacks run on one context,
//! per-image notifications on another, so a slow configure never holds up
//! frame delivery.

use crate::errors::CameraError;
use crossbeam_channel::{unbounded, Sender};
use std::sync::Arc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a dedicated callback thread. Cloning shares the thread; it
/// exits once every handle has been dropped and its queue has drained.
#[derive(Clone)]
pub struct CallbackContext {
    name: Arc<str>,
    sender: Sender<Job>,
}

impl CallbackContext {
    /// Start a new context backed by its own thread.
    pub fn spawn(name: &str) -> Result<Self, CameraError> {
        let (sender, receiver) = unbounded::<Job>();
        let thread_name = format!("crabcapture-{}", name);

        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                for job in receiver {
                    job();
                }
                log::debug!("{} drained and stopped", thread_name);
            })
            .map_err(|e| CameraError::Backend(format!("spawn {} failed: {}", name, e)))?;

        Ok(Self {
            name: Arc::from(name),
            sender,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job. Returns false if the context thread is gone.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(job)).is_ok()
    }

    /// Queue a job and wait for it to run. Everything posted earlier has
    /// executed by the time this resolves.
    pub async fn run<F, R>(&self, job: F) -> Result<R, CameraError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let posted = self.post(move || {
            let _ = tx.send(job());
        });
        if !posted {
            return Err(CameraError::ContextClosed(self.name.to_string()));
        }
        rx.await
            .map_err(|_| CameraError::ContextClosed(self.name.to_string()))
    }
}

impl std::fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackContext")
            .field("name", &self.name)
            .finish()
    }
}
