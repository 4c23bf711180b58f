use thiserror::Error;

/// Per-message failure classification. The variant decides the fate of the
/// delivery: malformed payloads are rejected without requeue so they cannot
/// loop forever, everything else is requeued for another attempt.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("processing failed: {0}")]
    Transient(anyhow::Error),
}

impl ProcessingError {
    pub fn requeue(&self) -> bool {
        matches!(self, ProcessingError::Transient(_))
    }
}
