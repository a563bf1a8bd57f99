//! Fuzz target for the full ingress pipeline: wire bytes → decoded `Frame` →
//! (for TEXT frames) classified `ControlOutcome`.
//!
//! Exercises the two stages together the way a real connection task does in
//! `veilgate-server::connection::run`, so a bug that only manifests from the
//! *combination* (e.g. a decompressed payload that classify then mishandles)
//! surfaces here even if each stage is fine fuzzed alone.
//!
//! # Invariants
//!
//! - Neither stage panics on any input.
//! - A decoded TEXT frame's payload always classifies to some
//!   `ControlOutcome`; it is never silently dropped.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;
use veilgate_proto::{control, FrameCodec, Opcode};

fuzz_target!(|data: &[u8]| {
    let mut codec = FrameCodec::new(true);
    let mut buf = BytesMut::from(data);

    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        if frame.opcode == Opcode::Text {
            let _ = control::classify(&frame.payload);
        }
    }
});
