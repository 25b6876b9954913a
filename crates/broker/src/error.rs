//! Broker and repository error types.

/// Errors raised by the attribute broker's registration surface.
///
/// Every error on the atomic library-load path leaves the broker state
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("library already loaded: {0}")]
    LibraryAlreadyLoaded(String),

    #[error("unknown library: {0}")]
    UnknownLibrary(String),

    #[error("policy information point already registered: {0}")]
    PipNameCollision(String),

    #[error("unknown policy information point: {0}")]
    UnknownPip(String),

    /// Two finders would claim the same attribute signature.
    #[error("attribute signature collision: {0}")]
    SignatureCollision(String),

    #[error("invalid policy information point specification: {0}")]
    InvalidSpecification(String),
}

/// Errors raised by the attribute repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
}
