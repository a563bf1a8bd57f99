//! Session and interaction data model for veilgate's dispatch engine.
//!
//! This crate holds the pieces that are pure data/state, independent of any
//! particular transport or actor wiring: the per-connection [`Session`], its
//! pending-interaction table, and the [`Environment`] abstraction used to
//! keep time- and randomness-dependent logic testable. The URL registry,
//! dispatch engine proper, and all I/O live in `veilgate-server`.

pub mod env;
pub mod error;
pub mod session;

pub use env::Environment;
pub use error::SessionError;
pub use session::{PendingRequest, PublicOutcome, Session, MAX_INTERACTION_ID};
