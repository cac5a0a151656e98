use thiserror::Error;

/// Domain errors for the capsule lifecycle.
///
/// `Conflict` is reserved: `mark_opened` is a conditional update, so racing
/// open calls converge on one result instead of surfacing a conflict.
#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("actor is not a member of this group")]
    Permission,

    #[error("capsule is still locked, ready in {remaining}")]
    NotReady { remaining: chrono::Duration },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("conflicting mutation")]
    Conflict,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl CapsuleError {
    /// Safe-to-retry failures: the caller can repeat the call unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
