use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::SequencerConfig,
    defer::{Deferrer, TokioDeferrer},
    error::SequencerError,
    observer::{ErrorChannel, ListenerId},
    queue::{QueuedUnit, UnitQueue},
    unit::{Continuation, ExecutionMode, NameGenerator, Outcome, Step, Unit},
};

pub type Results = HashMap<String, Value>;

type OnDone = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Done,
}

struct State {
    queue: UnitQueue,
    // pushed but not yet settled
    pending: usize,
    results: Results,
    on_done: Option<OnDone>,
    phase: Phase,
    // a synchronous unit is in flight
    blocked: bool,
    names: NameGenerator,
}

struct Inner {
    id: Uuid,
    parent: Option<Uuid>,
    config: SequencerConfig,
    deferrer: Arc<dyn Deferrer>,
    errors: ErrorChannel,
    state: Mutex<State>,
}

/// Drains a FIFO queue of [`Unit`]s and fires a terminal callback once every unit has settled.
///
/// Synchronous units hold the queue until they settle; asynchronous units are dispatched back to
/// back and may settle in any order. Every step of the drain loop and every completion goes
/// through the [`Deferrer`], so callers never see the sequencer's callbacks on their own stack
/// (unless the deferrer itself runs jobs inline).
///
/// There is no cancellation and no timeout: a unit that never settles its continuation keeps the
/// sequencer, and any group it belongs to, running forever.
#[derive(Clone)]
pub struct Sequencer {
    inner: Arc<Inner>,
}

impl Sequencer {
    pub fn new(deferrer: Arc<dyn Deferrer>) -> Self {
        Self::with_config(SequencerConfig::default(), deferrer)
    }

    pub fn with_config(config: SequencerConfig, deferrer: Arc<dyn Deferrer>) -> Self {
        Self::build(config, deferrer, None)
    }

    /// A sequencer driven by the tokio runtime the caller is running in.
    pub fn tokio(config: SequencerConfig) -> Result<Self, SequencerError> {
        let deferrer = TokioDeferrer::current()?;
        Ok(Self::with_config(config, Arc::new(deferrer)))
    }

    fn build(config: SequencerConfig, deferrer: Arc<dyn Deferrer>, parent: Option<Uuid>) -> Self {
        let names = NameGenerator::new(config.name_prefix.clone());
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                parent,
                config,
                deferrer,
                errors: ErrorChannel::new(),
                state: Mutex::new(State {
                    queue: UnitQueue::default(),
                    pending: 0,
                    results: Results::new(),
                    on_done: None,
                    phase: Phase::Idle,
                    blocked: false,
                    names,
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The sequencer this one was grouped into, if any.
    pub fn parent(&self) -> Option<Uuid> {
        self.inner.parent
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    /// Names of the units still waiting to be dispatched, front first.
    pub fn queued(&self) -> Vec<String> {
        self.lock().queue.names()
    }

    /// Snapshot of the named results settled so far.
    pub fn result(&self) -> Results {
        self.lock().results.clone()
    }

    pub fn subscribe_errors(&self, listener: impl Fn(&SequencerError) + Send + Sync + 'static) -> ListenerId {
        self.inner.errors.subscribe(listener)
    }

    pub fn unsubscribe_errors(&self, id: ListenerId) -> bool {
        self.inner.errors.unsubscribe(id)
    }

    pub fn errors(&self) -> &ErrorChannel {
        &self.inner.errors
    }

    /// Appends a unit. Units without a name get one from this sequencer's generator.
    ///
    /// A unit (or a clone of it) that is already queued or still in flight is rejected, so each
    /// push runs the work at most once.
    pub fn push(&self, unit: Unit) -> Result<&Self, SequencerError> {
        let wake = {
            let mut state = self.lock();
            if state.phase == Phase::Done {
                return Err(SequencerError::Finished(self.inner.id.to_string()));
            }
            if !unit.claim() {
                return Err(SequencerError::UnsupportedOperand(format!(
                    "unit `{}` is already queued or running",
                    unit.name().unwrap_or("<unnamed>")
                )));
            }

            let (id, generated) = state.names.next();
            let name = unit.name().map(str::to_owned).unwrap_or(generated);
            debug!(sequencer = %self.inner.id, unit = %name, id, mode = %unit.mode(), "unit queued");

            state.queue.push_back(QueuedUnit { id, name, unit });
            state.pending += 1;

            // the drain loop goes idle once the queue is empty, so a push while running has to
            // restart it unless a synchronous unit will do that when it settles
            state.phase == Phase::Running && !state.blocked
        };

        if wake {
            self.schedule_pass();
        }
        Ok(self)
    }

    /// Wraps raw work into a unit and appends it. `mode` falls back to the configured default.
    pub fn push_fn<F>(&self, work: F, name: Option<&str>, mode: Option<ExecutionMode>) -> Result<&Self, SequencerError>
    where
        F: Fn(Continuation) -> anyhow::Result<Step> + Send + Sync + 'static,
    {
        let mut builder = Unit::builder()
            .work(work)
            .mode(mode.unwrap_or(self.inner.config.default_mode));
        if let Some(name) = name {
            builder = builder.name(name);
        }
        self.push(builder.build()?)
    }

    pub fn sync<F>(&self, work: F, name: Option<&str>) -> Result<&Self, SequencerError>
    where
        F: Fn(Continuation) -> anyhow::Result<Step> + Send + Sync + 'static,
    {
        self.push_fn(work, name, Some(ExecutionMode::Synchronous))
    }

    pub fn asynchronous<F>(&self, work: F, name: Option<&str>) -> Result<&Self, SequencerError>
    where
        F: Fn(Continuation) -> anyhow::Result<Step> + Send + Sync + 'static,
    {
        self.push_fn(work, name, Some(ExecutionMode::Asynchronous))
    }

    /// Creates a nested sequencer and queues one synchronous unit here that runs it to completion.
    ///
    /// Everything pushed onto the returned sequencer, including its asynchronous fan-out, settles
    /// before anything queued behind the group on this sequencer is dispatched. The nested
    /// sequencer keeps its own queue, results and error channel.
    pub fn group(&self, name: Option<&str>) -> Result<Sequencer, SequencerError> {
        let child = Self::build(
            self.inner.config.clone(),
            Arc::clone(&self.inner.deferrer),
            Some(self.inner.id),
        );

        let nested = child.clone();
        let mut bridge = Unit::builder()
            .mode(ExecutionMode::Synchronous)
            .work(move |next| {
                nested.start(move || next.complete())?;
                Ok(Step::Suspend)
            });
        if let Some(name) = name {
            bridge = bridge.name(name);
        }
        self.push(bridge.build()?)?;

        debug!(sequencer = %self.inner.id, group = %child.id(), "group created");
        Ok(child)
    }

    /// Starts draining the queue. `on_done` fires once, after every unit has settled, and never on
    /// the caller's stack.
    pub fn start(&self, on_done: impl FnOnce() + Send + 'static) -> Result<&Self, SequencerError> {
        let mut state = self.lock();
        if state.phase != Phase::Idle {
            return Err(SequencerError::AlreadyStarted(self.inner.id.to_string()));
        }

        if state.queue.is_empty() {
            state.phase = Phase::Done;
            drop(state);

            info!(sequencer = %self.inner.id, "nothing queued, finishing on the next turn");
            self.inner.deferrer.defer(Box::new(on_done));
            return Ok(self);
        }

        state.pending = state.queue.len();
        state.on_done = Some(Box::new(on_done));
        state.phase = Phase::Running;
        let pending = state.pending;
        drop(state);

        info!(sequencer = %self.inner.id, parent = ?self.inner.parent, pending, "sequencer started");
        self.schedule_pass();
        Ok(self)
    }

    /// Starts without a terminal callback.
    pub fn start_detached(&self) -> Result<&Self, SequencerError> {
        self.start(|| {})
    }

    /// Starts the sequencer and waits for it to finish, returning the final results.
    pub async fn run(&self) -> Result<Results, SequencerError> {
        let (tx, rx) = oneshot::channel();
        self.start(move || {
            let _ = tx.send(());
        })?;

        rx.await
            .map_err(|_| SequencerError::Abandoned(self.inner.id.to_string()))?;
        Ok(self.result())
    }

    fn schedule_pass(&self) {
        let this = self.clone();
        self.inner.deferrer.defer(Box::new(move || this.process()));
    }

    // one pass of the drain loop: dispatch at most one unit
    fn process(&self) {
        let next = {
            let mut state = self.lock();
            if state.phase != Phase::Running || state.blocked {
                return;
            }
            let Some(next) = state.queue.pop_front() else {
                // settling is driven by the pending count, not by the queue running dry
                return;
            };
            if next.unit.mode().is_blocking() {
                state.blocked = true;
            }
            next
        };

        let QueuedUnit { id, name, unit } = next;
        let mode = unit.mode();
        let this = self.clone();
        let settled = name.clone();

        unit.run(&name, move |outcome| {
            let deferrer = Arc::clone(&this.inner.deferrer);
            deferrer.defer(Box::new(move || this.on_unit_done(id, settled, mode, outcome)));
        });

        if !mode.is_blocking() {
            self.schedule_pass();
        }
    }

    fn on_unit_done(&self, id: u64, name: String, mode: ExecutionMode, outcome: Outcome) {
        let value = match outcome {
            Ok(value) => value,
            Err(source) => {
                self.inner
                    .errors
                    .emit(&SequencerError::Execution { unit: name.clone(), source });
                None
            }
        };

        let (on_done, wake) = {
            let mut state = self.lock();
            if let Some(value) = value {
                state.results.insert(name.clone(), value);
            }
            if mode.is_blocking() {
                state.blocked = false;
            }

            match state.pending.checked_sub(1) {
                Some(pending) => state.pending = pending,
                None => warn!(sequencer = %self.inner.id, unit = %name, "unit settled with nothing pending"),
            }
            debug!(sequencer = %self.inner.id, unit = %name, id, pending = state.pending, "unit settled");

            if state.pending == 0 && state.phase == Phase::Running {
                state.phase = Phase::Done;
                (state.on_done.take(), false)
            } else {
                (None, mode.is_blocking())
            }
        };

        if let Some(on_done) = on_done {
            info!(sequencer = %self.inner.id, "sequencer finished");
            on_done();
        } else if wake {
            self.schedule_pass();
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Sequencer")
            .field("id", &self.inner.id)
            .field("parent", &self.inner.parent)
            .field("phase", &state.phase)
            .field("pending", &state.pending)
            .field("queued", &state.queue.len())
            .finish()
    }
}
