use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// The submitted fact violates the ingestion contract.
    #[error("malformed fact: {0}")]
    MalformedFact(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Availability index call failed. Returned by `AvailabilityIndex`
    /// implementations.
    #[error("index error: {0}")]
    Index(String),

    /// Catch-all for journal backend failures.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
