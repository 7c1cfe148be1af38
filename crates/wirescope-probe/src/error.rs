//! Error types for the probe.

/// Failures while running a batch and writing its results.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// No statement text was given.
    #[error("no SQL given; pass the statement batch as arguments")]
    EmptyBatch,

    /// Session, statement or reader failure.
    #[error("database error: {0}")]
    Database(#[from] wirescope::Error),

    /// A row could not be encoded as JSON.
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Writing to the output failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}
