use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tracing::error;

use crate::error::SequencerError;

pub type ErrorListener = Arc<dyn Fn(&SequencerError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Observers for errors raised by units. Emitting with nobody subscribed only logs.
#[derive(Default)]
pub struct ErrorChannel {
    listeners: Mutex<Vec<(ListenerId, ErrorListener)>>,
    next_id: AtomicU64,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&SequencerError) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    pub fn emit(&self, err: &SequencerError) {
        error!(error = %err, "unit failed");

        // listeners may subscribe or unsubscribe from inside the callback
        let listeners: Vec<ErrorListener> =
            self.lock().iter().map(|(_, listener)| Arc::clone(listener)).collect();

        // a panicking listener is logged and skipped so the unit still settles
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(err))).is_err() {
                error!(error = %err, "error listener panicked");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, ErrorListener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
