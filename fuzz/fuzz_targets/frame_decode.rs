//! Fuzz target for `FrameCodec::decode`.
//!
//! Feeds arbitrary bytes through the RFC-6455-style frame decoder to find:
//! - Parser crashes or panics
//! - Integer overflows/underflows in the extended-length and mask arithmetic
//! - Buffer over-reads when a frame is claimed but not fully buffered
//! - Malformed headers (reserved bits, bad opcodes, oversized control frames)
//!   that bypass validation
//!
//! The decoder should NEVER panic. All invalid input is rejected with a
//! `FrameError`, and a not-yet-complete frame returns `Ok(None)` rather than
//! erroring.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;
use veilgate_proto::FrameCodec;

fuzz_target!(|data: &[u8]| {
    for compression_negotiated in [false, true] {
        let mut codec = FrameCodec::new(compression_negotiated);
        let mut buf = BytesMut::from(data);
        // Drain every frame the buffer yields; a malicious peer can pack
        // several frames (or a truncated tail) into one read.
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(_frame)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }
});
