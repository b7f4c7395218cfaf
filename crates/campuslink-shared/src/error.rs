use thiserror::Error;

/// Failures reported by the relationship engine.
///
/// Every variant except `Unavailable` is a local validation failure: the
/// operation was rejected and no state changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A self-targeting or otherwise malformed action.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Cannot send a connection request to yourself")]
    SelfRequest,

    #[error("There is already a pending request between these users")]
    AlreadyPending,

    #[error("Users are already connected")]
    AlreadyConnected,

    /// A block exists between the two users in at least one direction.
    #[error("Action not allowed between these users")]
    Blocked,

    #[error("Not found: {0}")]
    NotFound(String),

    /// The acting user is not allowed to perform this action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A collaborator (storage, directory) failed.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
