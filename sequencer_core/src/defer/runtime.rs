use std::panic::{self, AssertUnwindSafe};

use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, error};

use crate::error::SequencerError;

use super::{Deferrer, Job};

/// Defers jobs onto a single driver task on a tokio runtime.
///
/// Jobs run one at a time, in the order they were deferred, so everything funneled through one
/// deferrer shares a single logical thread of control even on a multi-threaded runtime.
#[derive(Debug, Clone)]
pub struct TokioDeferrer {
    jobs: mpsc::UnboundedSender<Job>,
}

impl TokioDeferrer {
    pub fn new(handle: &Handle) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        handle.spawn(async move {
            while let Some(job) = queue.recv().await {
                // a panicking callback must not take the driver, and every sequencer on it, down
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("deferred job panicked, continuing with the next one");
                }
            }
            debug!("deferred job driver stopped");
        });

        Self { jobs }
    }

    /// Spawns the driver on the runtime the caller is running in.
    pub fn current() -> Result<Self, SequencerError> {
        let handle = Handle::try_current().map_err(|e| SequencerError::NoRuntime(e.to_string()))?;
        Ok(Self::new(&handle))
    }
}

impl Deferrer for TokioDeferrer {
    fn defer(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            error!("deferred job driver has shut down, dropping job");
        }
    }
}
