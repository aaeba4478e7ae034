use thiserror::Error;

pub type SplitlaneResult<T> = Result<T, SplitlaneError>;

#[derive(Error, Debug)]
pub enum SplitlaneError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage quota exceeded: {used} of {limit} entries in use")]
    QuotaExceeded { used: usize, limit: usize },

    #[error("Malformed declaration: {0}")]
    InvalidDeclaration(String),

    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    #[error("Unknown variant '{variant_id}' in experiment '{experiment_id}'")]
    UnknownVariant {
        experiment_id: String,
        variant_id: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for SplitlaneError {
    fn from(err: config::ConfigError) -> Self {
        SplitlaneError::Config(err.to_string())
    }
}
