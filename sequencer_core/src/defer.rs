//! The deferred-scheduling primitive: "run this later than the current call stack, exactly once".

pub mod immediate;
pub mod runtime;

pub use immediate::ImmediateDeferrer;
pub use runtime::TokioDeferrer;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Deferrer: Send + Sync {
    fn defer(&self, job: Job);
}
