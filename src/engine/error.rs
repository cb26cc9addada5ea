use thiserror::Error;

#[derive(Error, Debug)]
pub enum FastError {
    #[error("{0}")]
    Config(String),

    #[error("Failed to discover test endpoints: {0}")]
    Discovery(String),

    #[error("Failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("Measurement failed: {0}")]
    Measurement(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}
