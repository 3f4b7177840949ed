// a cooperative sequencer: a FIFO of sync/async units, named results, nested groups and an error channel
pub mod config;
pub mod defer;
pub mod error;
pub mod observer;
mod queue;
pub mod sequencer;
pub mod unit;

pub use config::SequencerConfig;
pub use defer::{Deferrer, ImmediateDeferrer, Job, TokioDeferrer};
pub use error::SequencerError;
pub use observer::{ErrorChannel, ListenerId};
pub use sequencer::{Phase, Results, Sequencer};
pub use unit::{Continuation, ExecutionMode, NameGenerator, Outcome, Step, Unit, UnitBuilder, Work};
