//! Error types for the session/URL data model.

use thiserror::Error;

/// Errors raised by [`crate::session::Session`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Every id in `[0, 2^53 - 1]` is currently in use by this session.
    /// Fatal only to the request that triggered it; the session stays open.
    #[error("interaction id space exhausted for this session")]
    InteractionSpaceExhausted,

    /// An id already present in the pending table was registered again.
    #[error("interaction id {id} already registered")]
    DuplicateInteractionId {
        /// The colliding id.
        id: u64,
    },
}
