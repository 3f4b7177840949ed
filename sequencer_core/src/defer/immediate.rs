use super::{Deferrer, Job};

/// Runs every job inline, on the caller's stack.
///
/// Only meant for tests: it makes a whole sequence run to completion inside `start`, which the
/// real primitive never does. Every pass of the drain loop and every completion nests inside the
/// previous one, so stack depth grows with the number of queued units; keep queues short.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDeferrer;

impl Deferrer for ImmediateDeferrer {
    fn defer(&self, job: Job) {
        job();
    }
}
