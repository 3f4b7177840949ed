use thiserror::Error;

#[derive(Debug, Error)]
pub enum SequencerError {
    // programmer errors, returned at the call site
    #[error("Invalid work: {0}")]
    InvalidWork(String),

    #[error("Unsupported operand: {0}")]
    UnsupportedOperand(String),

    #[error("Sequencer {0} has already been started")]
    AlreadyStarted(String),

    #[error("Sequencer {0} has already finished")]
    Finished(String),

    // raised by a unit's work body, only ever delivered on the error channel
    #[error("Unit `{unit}` failed: {source}")]
    Execution {
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Sequencer {0} was dropped before it finished")]
    Abandoned(String),
}

impl SequencerError {
    /// Name of the unit that failed, for execution errors.
    pub fn unit(&self) -> Option<&str> {
        match self {
            SequencerError::Execution { unit, .. } => Some(unit),
            _ => None,
        }
    }
}
