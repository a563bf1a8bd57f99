//! Per-connection session state: identity, compression capability, and the
//! pending-interaction table.
//!
//! This is a pure data structure — no I/O, no `Environment` storage — in the
//! same spirit as the teacher's `Connection<I>`: the core task mutates it
//! directly and any time-dependent behavior (keepalive, pruning) is driven
//! from outside by passing in the current time.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::SessionError;

/// Upper bound on interaction ids: `2^53 - 1`, the largest integer a JSON
/// double can represent exactly (mirrors `Control`'s `Index`/`Interaction`
/// bound so both sides of the wire agree on the usable range).
pub const MAX_INTERACTION_ID: u64 = (1u64 << 53) - 1;

/// The outcome delivered to a blocked public-side HTTP handler once its
/// interaction resolves one way or another.
#[derive(Debug, Clone)]
pub enum PublicOutcome {
    /// The client replied; serve this response.
    Replied {
        /// HTTP status code.
        status: u16,
        /// `Content-Type` header value, if the body is non-empty.
        content_type: Option<String>,
        /// Decoded response body.
        body: Bytes,
    },
    /// The owning session closed before replying, or the interaction was
    /// never found in the first place.
    NotFound,
    /// The client's reply failed to drain and the session was torn down.
    InternalError,
}

/// One in-flight public request awaiting a client reply.
///
/// The receiving half is held by the public-side HTTP handler task, which
/// `.await`s it to produce the eventual HTTP response. Completing the sender
/// (by any means — reply, session close, or drop) resolves that await
/// exactly once, matching the "exactly one completion" invariant.
pub type PendingRequest = oneshot::Sender<PublicOutcome>;

/// Per-connection session state.
#[derive(Debug)]
pub struct Session {
    /// Opaque identity string (40-60 alphanumeric chars), stable across
    /// reconnects that present a valid prior identity cookie.
    identity: String,
    /// Whether this session negotiated permessage-deflate on handshake.
    compression_supported: bool,
    /// Next candidate interaction id; wraps at `MAX_INTERACTION_ID`.
    next_interaction: u64,
    /// In-flight interactions awaiting a client reply.
    pending: HashMap<u64, PendingRequest>,
}

impl Session {
    /// Create a new session for the given resolved identity.
    #[must_use]
    pub fn new(identity: String, compression_supported: bool) -> Self {
        Self { identity, compression_supported, next_interaction: 0, pending: HashMap::new() }
    }

    /// The session's identity string.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether this session negotiated permessage-deflate.
    #[must_use]
    pub fn compression_supported(&self) -> bool {
        self.compression_supported
    }

    /// Number of interactions currently awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Allocate a currently-unused interaction id.
    ///
    /// Increments an internal counter, wrapping at [`MAX_INTERACTION_ID`]
    /// back to zero, skipping ids already in the pending table. Returns
    /// [`SessionError::InteractionSpaceExhausted`] only when every id in the
    /// space is in use — a condition that leaves the session open but fails
    /// the one request that triggered it.
    pub fn next_interaction_id(&mut self) -> Result<u64, SessionError> {
        let start = self.next_interaction;
        loop {
            let candidate = self.next_interaction;
            self.next_interaction =
                if candidate >= MAX_INTERACTION_ID { 0 } else { candidate + 1 };

            if !self.pending.contains_key(&candidate) {
                return Ok(candidate);
            }
            if self.next_interaction == start {
                return Err(SessionError::InteractionSpaceExhausted);
            }
        }
    }

    /// Register a pending request under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DuplicateInteractionId`] if `id` is already
    /// registered — callers should only pass ids obtained from
    /// [`Session::next_interaction_id`], which never returns one in use.
    pub fn add_interaction(&mut self, id: u64, pending: PendingRequest) -> Result<(), SessionError> {
        if self.pending.contains_key(&id) {
            return Err(SessionError::DuplicateInteractionId { id });
        }
        self.pending.insert(id, pending);
        Ok(())
    }

    /// Remove and return the pending request for `id`, if present.
    ///
    /// Idempotent: removing an absent id is not an error, it simply returns
    /// `None` (the caller treats this as "interaction doesn't exist or was
    /// already processed").
    pub fn remove_interaction(&mut self, id: u64) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn has_interaction(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    /// Complete every queued interaction with [`PublicOutcome::NotFound`] and
    /// empty the table. Called exactly once, when the session is torn down.
    pub fn cancel_all_interactions(&mut self) {
        for (_, sender) in self.pending.drain() {
            let _ = sender.send(PublicOutcome::NotFound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_sequential_ids() {
        let mut session = Session::new("abc".to_string(), false);
        assert_eq!(session.next_interaction_id().unwrap(), 0);
        assert_eq!(session.next_interaction_id().unwrap(), 1);
    }

    #[test]
    fn skips_ids_still_pending() {
        let mut session = Session::new("abc".to_string(), false);
        let (tx, _rx) = oneshot::channel();
        let id0 = session.next_interaction_id().unwrap();
        session.add_interaction(id0, tx).unwrap();
        let id1 = session.next_interaction_id().unwrap();
        assert_ne!(id0, id1);
        assert!(!session.has_interaction(id1));
    }

    #[test]
    fn duplicate_interaction_id_is_rejected() {
        let mut session = Session::new("abc".to_string(), false);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        session.add_interaction(5, tx1).unwrap();
        assert!(matches!(
            session.add_interaction(5, tx2),
            Err(SessionError::DuplicateInteractionId { id: 5 })
        ));
    }

    #[test]
    fn remove_interaction_is_idempotent() {
        let mut session = Session::new("abc".to_string(), false);
        assert!(session.remove_interaction(42).is_none());
        let (tx, _rx) = oneshot::channel();
        session.add_interaction(42, tx).unwrap();
        assert!(session.remove_interaction(42).is_some());
        assert!(session.remove_interaction(42).is_none());
    }

    #[tokio::test]
    async fn cancel_all_interactions_resolves_not_found() {
        let mut session = Session::new("abc".to_string(), false);
        let (tx, rx) = oneshot::channel();
        session.add_interaction(1, tx).unwrap();
        session.cancel_all_interactions();
        assert!(matches!(rx.await.unwrap(), PublicOutcome::NotFound));
        assert_eq!(session.pending_count(), 0);
    }
}
