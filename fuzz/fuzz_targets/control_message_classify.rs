//! Fuzz target for `control::classify`.
//!
//! Feeds arbitrary bytes as a decoded TEXT frame's JSON payload, the way a
//! hostile controlling client could shape a control message or interaction
//! reply, to find:
//! - Parser crashes or panics walking the `serde_json::Value` by hand
//! - Integer parsing that silently wraps or accepts out-of-range `Index`/
//!   `Interaction` values instead of rejecting them
//! - Any input that produces something other than one of the five
//!   documented `ControlOutcome` variants
//!
//! Classification should NEVER panic. Every input resolves to a structured
//! `ControlOutcome`, with malformed or unrecognized shapes routed to a
//! `GlobalError`/`RequestError`/`InteractionError`, never a crash.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilgate_proto::control;

fuzz_target!(|data: &[u8]| {
    let _ = control::classify(data);
});
