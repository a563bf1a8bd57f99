//! RFC-6455-style frame codec with permessage-deflate.
//!
//! Unlike a fixed-width binary header, this protocol's framing is
//! variable-length and stateful: the decoder must track an in-progress
//! fragmented message (and its compressed-flag) across multiple calls. The
//! [`FrameCodec`] is therefore one instance per session, not a stateless
//! function pair.
//!
//! # Invariants
//!
//! - Frames emitted by [`Decoder::decode`] are always fully assembled and,
//!   if compressed, already inflated — callers never see a raw CONTINUATION.
//! - Frames produced by [`Encoder::encode`] are never masked (server → client
//!   direction never masks, per RFC 6455).
//! - Per-message and per-read-buffer sizes are capped at [`MAX_MESSAGE_SIZE`].

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

/// Per-message and per-read-buffer size cap (10 MiB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Payload size at or above which the encoder compresses a TEXT message if
/// the session negotiated compression.
pub const COMPRESS_THRESHOLD: usize = 1000;

/// The deflate trailer appended before inflating a compressed message.
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Opcode of a fully-assembled decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// A text message (assembled from TEXT + any CONTINUATIONs, inflated if compressed).
    Text,
    /// A keepalive probe.
    Ping,
    /// A keepalive probe reply.
    Pong,
}

/// A fully-assembled decoded frame, or the frame to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame's opcode.
    pub opcode: Opcode,
    /// The frame's payload (inflated, for a decoded compressed TEXT message).
    pub payload: Bytes,
}

impl Frame {
    /// Construct a TEXT frame.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self { opcode: Opcode::Text, payload: payload.into() }
    }

    /// Construct a PING frame.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self { opcode: Opcode::Ping, payload: payload.into() }
    }

    /// Construct a PONG frame.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self { opcode: Opcode::Pong, payload: payload.into() }
    }
}

/// Raw wire-level opcode, before message assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    Continuation,
    Text,
    Ping,
    Pong,
}

impl RawKind {
    fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }
}

struct WireFrame {
    kind: RawKind,
    is_final: bool,
    compressed: bool,
    payload: Bytes,
}

/// A message being assembled across one or more CONTINUATION frames.
struct PartialMessage {
    compressed: bool,
    buffer: BytesMut,
}

/// Stateful decoder/encoder for one session's framed duplex connection.
pub struct FrameCodec {
    compression_negotiated: bool,
    partial: Option<PartialMessage>,
}

impl FrameCodec {
    /// Create a codec for a session that did or did not negotiate
    /// per-message-deflate during the upgrade handshake.
    #[must_use]
    pub fn new(compression_negotiated: bool) -> Self {
        Self { compression_negotiated, partial: None }
    }

    /// Parse one wire-level frame from `src`, advancing it past the frame on
    /// success. Returns `Ok(None)` if `src` does not yet hold a complete frame.
    fn try_parse_wire_frame(src: &mut BytesMut) -> Result<Option<WireFrame>, FrameError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let byte0 = src[0];
        let byte1 = src[1];

        if byte0 & 0x30 != 0 {
            return Err(FrameError::ReservedBitsSet);
        }

        let is_final = byte0 & 0x80 != 0;
        let compressed = byte0 & 0x40 != 0;
        let kind = RawKind::from_nibble(byte0 & 0x0F)
            .ok_or(FrameError::IllegalOpcode { opcode: byte0 & 0x0F })?;

        if byte1 & 0x80 == 0 {
            return Err(FrameError::UnmaskedFrame);
        }

        let len7 = byte1 & 0x7F;
        let mut offset = 2usize;
        let payload_len: u64 = if len7 == 126 {
            if src.len() < offset + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([src[offset], src[offset + 1]]);
            offset += 2;
            u64::from(len)
        } else if len7 == 127 {
            if src.len() < offset + 8 {
                return Ok(None);
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&src[offset..offset + 8]);
            offset += 8;
            u64::from_be_bytes(buf)
        } else {
            u64::from(len7)
        };

        let is_control = matches!(kind, RawKind::Ping | RawKind::Pong);
        if is_control && (len7 >= 126 || !is_final) {
            return Err(FrameError::InvalidControlFrame);
        }

        if payload_len as usize > MAX_MESSAGE_SIZE {
            return Err(FrameError::MessageTooLarge {
                size: payload_len as usize,
                max: MAX_MESSAGE_SIZE,
            });
        }

        if src.len() < offset + 4 {
            return Ok(None);
        }
        let mask = [src[offset], src[offset + 1], src[offset + 2], src[offset + 3]];
        offset += 4;

        let total = offset + payload_len as usize;
        if src.len() < total {
            return Ok(None);
        }

        let mut payload = BytesMut::from(&src[offset..total]);
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }

        src.advance(total);

        Ok(Some(WireFrame { kind, is_final, compressed, payload: payload.freeze() }))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            if src.len() > MAX_MESSAGE_SIZE {
                return Err(FrameError::InputBufferTooLarge { size: src.len(), max: MAX_MESSAGE_SIZE });
            }

            let Some(wire) = Self::try_parse_wire_frame(src)? else {
                return Ok(None);
            };

            if wire.compressed && wire.kind != RawKind::Text {
                return Err(FrameError::IllegalCompressedBit);
            }

            match wire.kind {
                RawKind::Ping => return Ok(Some(Frame { opcode: Opcode::Ping, payload: wire.payload })),
                RawKind::Pong => return Ok(Some(Frame { opcode: Opcode::Pong, payload: wire.payload })),
                RawKind::Text => {
                    if self.partial.is_some() {
                        return Err(FrameError::UnexpectedNewMessage);
                    }
                    if wire.compressed && !self.compression_negotiated {
                        return Err(FrameError::CompressionNotNegotiated);
                    }
                    if wire.is_final {
                        let payload =
                            if wire.compressed { inflate(&wire.payload)? } else { wire.payload };
                        return Ok(Some(Frame { opcode: Opcode::Text, payload }));
                    }
                    let mut buffer = BytesMut::with_capacity(wire.payload.len());
                    buffer.extend_from_slice(&wire.payload);
                    self.partial = Some(PartialMessage { compressed: wire.compressed, buffer });
                }
                RawKind::Continuation => {
                    let Some(partial) = self.partial.as_mut() else {
                        return Err(FrameError::UnexpectedContinuation);
                    };
                    partial.buffer.extend_from_slice(&wire.payload);
                    if partial.buffer.len() > MAX_MESSAGE_SIZE {
                        return Err(FrameError::MessageTooLarge {
                            size: partial.buffer.len(),
                            max: MAX_MESSAGE_SIZE,
                        });
                    }
                    if wire.is_final {
                        // INVARIANT: self.partial is Some, checked above.
                        #[allow(clippy::expect_used)]
                        let partial =
                            self.partial.take().expect("invariant: partial message present");
                        let raw = partial.buffer.freeze();
                        let payload = if partial.compressed { inflate(&raw)? } else { raw };
                        return Ok(Some(Frame { opcode: Opcode::Text, payload }));
                    }
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let opcode_nibble = match frame.opcode {
            Opcode::Text => 0x1,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        };

        let should_compress = frame.opcode == Opcode::Text
            && self.compression_negotiated
            && frame.payload.len() >= COMPRESS_THRESHOLD;

        let payload =
            if should_compress { deflate(&frame.payload) } else { frame.payload.clone() };

        let byte0 = 0x80 | opcode_nibble | if should_compress { 0x40 } else { 0 };
        dst.put_u8(byte0);

        let len = payload.len();
        if len < 126 {
            #[allow(clippy::cast_possible_truncation)]
            dst.put_u8(len as u8);
        } else if len <= 0xFFFF {
            dst.put_u8(126);
            #[allow(clippy::cast_possible_truncation)]
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(127);
            dst.put_u64(len as u64);
        }

        dst.put_slice(&payload);
        Ok(())
    }
}

/// Inflate a raw-deflate compressed message, appending the fixed trailer per
/// permessage-deflate before handing it to the decompressor.
fn inflate(data: &[u8]) -> Result<Bytes, FrameError> {
    let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
    input.extend_from_slice(data);
    input.extend_from_slice(&DEFLATE_TRAILER);

    let mut decoder = DeflateDecoder::new(&input[..]);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|_| FrameError::DecompressionFailed)?;

    if out.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::MessageTooLarge { size: out.len(), max: MAX_MESSAGE_SIZE });
    }

    Ok(Bytes::from(out))
}

/// Raw-deflate compress a payload, appending the single flush byte the
/// encoder contract requires in place of a BFINAL=1 terminator.
#[allow(clippy::expect_used)]
fn deflate(data: &[u8]) -> Bytes {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("writes to an in-memory Vec never fail");
    let mut out = encoder.finish().expect("finishing an in-memory encoder never fails");
    out.push(0x00);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn roundtrip(frame: Frame, compression_negotiated: bool) -> Frame {
        let mut codec = FrameCodec::new(compression_negotiated);
        let mut encoded = BytesMut::new();
        codec.encode(frame, &mut encoded).expect("encode should succeed");

        // Re-derive header length so we only mask the payload portion, then
        // rewrite byte 1 to carry the mandatory client->server mask bit.
        let header_len = header_len(&encoded);
        let mask = [0xAAu8, 0xBB, 0xCC, 0xDD];

        let mut masked = BytesMut::new();
        masked.extend_from_slice(&encoded[..header_len]);
        masked[1] |= 0x80;
        masked.extend_from_slice(&mask);
        for (i, byte) in encoded[header_len..].iter().enumerate() {
            masked.put_u8(byte ^ mask[i % 4]);
        }

        let mut buf = masked;
        let mut decode_codec = FrameCodec::new(compression_negotiated);
        decode_codec.decode(&mut buf).expect("decode should succeed").expect("frame complete")
    }

    fn header_len(encoded: &BytesMut) -> usize {
        let len7 = encoded[1] & 0x7F;
        match len7 {
            126 => 4,
            127 => 10,
            _ => 2,
        }
    }

    proptest! {
        #[test]
        fn text_frame_round_trip(payload in any::<Vec<u8>>()) {
            let frame = Frame::text(payload.clone());
            let result = roundtrip(frame, false);
            prop_assert_eq!(result.opcode, Opcode::Text);
            prop_assert_eq!(result.payload.as_ref(), payload.as_slice());
        }

        #[test]
        fn ping_pong_round_trip(payload in prop::collection::vec(any::<u8>(), 0..125)) {
            let ping = roundtrip(Frame::ping(payload.clone()), false);
            prop_assert_eq!(ping.opcode, Opcode::Ping);
            prop_assert_eq!(ping.payload.as_ref(), payload.as_slice());

            let pong = roundtrip(Frame::pong(payload.clone()), false);
            prop_assert_eq!(pong.opcode, Opcode::Pong);
            prop_assert_eq!(pong.payload.as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn compressed_text_round_trips_when_negotiated() {
        let payload = vec![b'x'; 2000];
        let frame = Frame::text(payload.clone());
        let result = roundtrip(frame, true);
        assert_eq!(result.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn rejects_unmasked_frame() {
        let mut codec = FrameCodec::new(false);
        let mut buf = BytesMut::from(&[0x81u8, 0x00][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::UnmaskedFrame)));
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut codec = FrameCodec::new(false);
        let mut buf = BytesMut::from(&[0x81u8 | 0x20, 0x80, 0, 0, 0, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::ReservedBitsSet)));
    }

    #[test]
    fn rejects_compressed_flag_without_negotiation() {
        let mut codec = FrameCodec::new(false);
        // FIN=1, RSV1=1 (compressed), opcode=TEXT, masked, zero length.
        let mut buf = BytesMut::from(&[0x81u8 | 0x40, 0x80, 0, 0, 0, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::CompressionNotNegotiated)));
    }

    #[test]
    fn rejects_continuation_without_preceding_text() {
        let mut codec = FrameCodec::new(false);
        // FIN=1, opcode=CONTINUATION, masked, zero length.
        let mut buf = BytesMut::from(&[0x80u8, 0x80, 0, 0, 0, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::UnexpectedContinuation)));
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut codec = FrameCodec::new(false);
        let mut buf = BytesMut::from(&[0x81u8][..]);
        assert_eq!(codec.decode(&mut buf).expect("should not error"), None);
    }
}
