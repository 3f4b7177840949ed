use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SequencerError;

/// What a unit reports when it settles: an optional named result, or the error its work raised.
pub type Outcome = Result<Option<Value>, anyhow::Error>;

/// The body of a unit. It receives the unit's [`Continuation`] and tells the sequencer whether it
/// finished inline or kept the continuation to settle later.
pub type Work = Arc<dyn Fn(Continuation) -> anyhow::Result<Step> + Send + Sync>;

type Settle = Box<dyn FnOnce(Outcome) + Send>;

/// Whether a unit blocks the queue until it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Nothing behind this unit is dequeued until it settles.
    #[serde(alias = "sync")]
    Synchronous,
    /// The unit is dispatched and the queue keeps draining while it runs.
    #[default]
    #[serde(alias = "async")]
    Asynchronous,
}

impl ExecutionMode {
    pub fn is_blocking(self) -> bool {
        matches!(self, ExecutionMode::Synchronous)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Synchronous => write!(f, "sync"),
            ExecutionMode::Asynchronous => write!(f, "async"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = SequencerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(ExecutionMode::Synchronous),
            "async" | "asynchronous" => Ok(ExecutionMode::Asynchronous),
            other => Err(SequencerError::Config(format!("unknown execution mode `{}`", other))),
        }
    }
}

/// Returned by a work body.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The work is finished; settle the unit now, storing the value if there is one.
    Complete(Option<Value>),
    /// The work kept its continuation and will settle it later.
    Suspend,
}

impl Step {
    pub fn done() -> Self {
        Step::Complete(None)
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Step::Complete(Some(value.into()))
    }
}

/// Once-only completion handle handed to a unit's work.
///
/// The first call to [`complete`](Continuation::complete), [`complete_with`](Continuation::complete_with)
/// or [`fail`](Continuation::fail) settles the unit. Anything after that is logged and dropped.
/// A continuation that is dropped without being settled leaves its sequencer waiting forever;
/// there is no timeout.
pub struct Continuation {
    unit: String,
    slot: Arc<Mutex<Option<Settle>>>,
}

impl Continuation {
    pub(crate) fn new(unit: impl Into<String>, settle: impl FnOnce(Outcome) + Send + 'static) -> Self {
        Self {
            unit: unit.into(),
            slot: Arc::new(Mutex::new(Some(Box::new(settle)))),
        }
    }

    // second handle on the same slot, kept by the unit while the work owns the first one
    fn handle(&self) -> Self {
        Self {
            unit: self.unit.clone(),
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    pub fn complete(self) {
        self.settle(Ok(None));
    }

    pub fn complete_with(self, value: impl Into<Value>) {
        self.settle(Ok(Some(value.into())));
    }

    pub fn fail(self, error: impl Into<anyhow::Error>) {
        self.settle(Err(error.into()));
    }

    pub fn settle(self, outcome: Outcome) {
        let settle = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();

        match settle {
            Some(settle) => settle(outcome),
            None => match outcome {
                Err(e) => warn!(unit = %self.unit, error = %e, "unit already settled, dropping late error"),
                Ok(_) => warn!(unit = %self.unit, "unit already settled, ignoring"),
            },
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("unit", &self.unit)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// One piece of work plus how it is scheduled.
///
/// Clones share the work and the running flag, so the same unit can be queued on several
/// sequencers, one pass at a time. A unit is claimed from the moment it is pushed until it
/// settles, and a claimed unit cannot be pushed again. A unit left on a sequencer that is never
/// started stays claimed.
#[derive(Clone)]
pub struct Unit {
    work: Work,
    name: Option<String>,
    mode: ExecutionMode,
    running: Arc<AtomicBool>,
    claimed: Arc<AtomicBool>,
}

impl Unit {
    /// An unnamed asynchronous unit.
    pub fn new<F>(work: F) -> Self
    where
        F: Fn(Continuation) -> anyhow::Result<Step> + Send + Sync + 'static,
    {
        Self::from_parts(Arc::new(work), None, ExecutionMode::default())
    }

    pub fn named<F>(work: F, name: impl Into<String>, mode: ExecutionMode) -> Self
    where
        F: Fn(Continuation) -> anyhow::Result<Step> + Send + Sync + 'static,
    {
        Self::from_parts(Arc::new(work), Some(name.into()), mode)
    }

    pub fn builder() -> UnitBuilder {
        UnitBuilder::default()
    }

    fn from_parts(work: Work, name: Option<String>, mode: ExecutionMode) -> Self {
        Self {
            work,
            // an empty name means "generate one"
            name: name.filter(|n| !n.is_empty()),
            mode,
            running: Arc::new(AtomicBool::new(false)),
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queued on a sequencer or in flight.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    // false if the unit is already queued or running somewhere
    pub(crate) fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Invokes the work once. `settle` is called exactly once, when the unit completes, whether
    /// the work returned [`Step::Complete`], settled its continuation, returned an error or panicked.
    pub(crate) fn run(&self, name: &str, settle: impl FnOnce(Outcome) + Send + 'static) {
        debug!(unit = %name, mode = %self.mode, "dispatching unit");
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let claimed = Arc::clone(&self.claimed);
        let continuation = Continuation::new(name, move |outcome| {
            running.store(false, Ordering::SeqCst);
            claimed.store(false, Ordering::SeqCst);
            settle(outcome);
        });
        let handle = continuation.handle();

        let work = Arc::clone(&self.work);
        match panic::catch_unwind(AssertUnwindSafe(move || work(continuation))) {
            Ok(Ok(Step::Complete(value))) => handle.settle(Ok(value)),
            Ok(Ok(Step::Suspend)) => {}
            Ok(Err(e)) => handle.settle(Err(e)),
            Err(payload) => handle.settle(Err(anyhow::anyhow!(
                "work panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .field("claimed", &self.is_claimed())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Default)]
pub struct UnitBuilder {
    work: Option<Work>,
    name: Option<String>,
    mode: Option<ExecutionMode>,
}

impl UnitBuilder {
    pub fn work<F>(mut self, work: F) -> Self
    where
        F: Fn(Continuation) -> anyhow::Result<Step> + Send + Sync + 'static,
    {
        self.work = Some(Arc::new(work));
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn build(self) -> Result<Unit, SequencerError> {
        let work = self.work.ok_or_else(|| {
            SequencerError::InvalidWork(format!(
                "cannot create unit `{}` without a work body",
                self.name.as_deref().unwrap_or("<unnamed>")
            ))
        })?;

        Ok(Unit::from_parts(work, self.name, self.mode.unwrap_or_default()))
    }
}

/// Hands out unit ids and the default names derived from them. Each sequencer owns one.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    prefix: String,
    next: u64,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), next: 0 }
    }

    /// Returns the next id together with the name a unit would get if it has none.
    pub fn next(&mut self) -> (u64, String) {
        let id = self.next;
        self.next += 1;
        (id, format!("{}{}", self.prefix, id))
    }
}
