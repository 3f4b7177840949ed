use dotenv::dotenv;
use serde::Deserialize;

use crate::{error::SequencerError, unit::ExecutionMode};

pub const NAME_PREFIX_VAR: &str = "SEQUENCER_NAME_PREFIX";
pub const DEFAULT_MODE_VAR: &str = "SEQUENCER_DEFAULT_MODE";

const DEFAULT_NAME_PREFIX: &str = "task_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Prefix of the names generated for units pushed without one.
    pub name_prefix: String,
    /// Mode used when raw work is pushed without an explicit mode.
    pub default_mode: ExecutionMode,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            default_mode: ExecutionMode::Asynchronous,
        }
    }
}

impl SequencerConfig {
    /// Reads the config from the environment, loading a `.env` file first if there is one.
    pub fn from_env() -> Result<Self, SequencerError> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SequencerError> {
        let mut config = Self::default();

        if let Some(prefix) = lookup(NAME_PREFIX_VAR) {
            config.name_prefix = prefix;
        }

        if let Some(mode) = lookup(DEFAULT_MODE_VAR) {
            config.default_mode = mode
                .parse()
                .map_err(|_| SequencerError::Config(format!("{} must be `sync` or `async`, got `{}`", DEFAULT_MODE_VAR, mode)))?;
        }

        Ok(config)
    }
}
