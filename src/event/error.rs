//! Event notifier error types

/// Failure reported by an [`EventObject`](super::EventObject)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifierError {
    /// The event could not be signaled
    #[error("event signal failed: {0}")]
    SignalFailed(String),
    /// The event could not be destroyed
    #[error("event destroy failed: {0}")]
    DestroyFailed(String),
    /// The event was already destroyed
    #[error("event already destroyed")]
    AlreadyDestroyed,
}
