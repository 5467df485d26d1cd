//! Cooperative cancellation for generation runs.
//!
//! Generation never suspends, so the token is only polled at coarse
//! checkpoints (validation, template load, each placeholder, serialization,
//! and between post-processor steps).

use crate::error::DocBindError;

#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: tokio_util::sync::CancellationToken,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// After this is called every clone observes `is_cancelled() == true`.
    pub fn cancel(&self) {
        self.inner.cancel()
    }

    /// Checkpoint helper: `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), DocBindError> {
        if self.is_cancelled() {
            tracing::debug!("cancellation observed at checkpoint");
            return Err(DocBindError::Cancelled);
        }
        Ok(())
    }
}

impl From<tokio_util::sync::CancellationToken> for Cancellation {
    fn from(token: tokio_util::sync::CancellationToken) -> Self {
        Self { inner: token }
    }
}
