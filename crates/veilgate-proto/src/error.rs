//! Protocol/framing violation tier.
//!
//! Every variant here is fatal to the connection: the transport is closed,
//! pending interactions are cancelled, and nothing is ever surfaced to the
//! peer as a message (see the error handling design, tier 1).

/// A violation of the frame protocol's structural rules.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A reserved bit other than the compressed-flag bit was set.
    #[error("reserved bits set in frame header")]
    ReservedBitsSet,

    /// The low four bits of byte 0 did not match a known opcode.
    #[error("illegal opcode {opcode:#x}")]
    IllegalOpcode {
        /// The offending opcode nibble.
        opcode: u8,
    },

    /// A frame arrived without the client→server mask bit set.
    #[error("unmasked frame from client")]
    UnmaskedFrame,

    /// A control frame (PING/PONG) carried an extended length or was not final.
    #[error("control frame must be final and carry at most 125 bytes")]
    InvalidControlFrame,

    /// The compressed flag was set on a frame other than the first frame of a
    /// new TEXT message.
    #[error("compressed flag set on a frame other than the first frame of a text message")]
    IllegalCompressedBit,

    /// The compressed flag was set but the session never negotiated
    /// per-message compression.
    #[error("compressed flag set without negotiated compression")]
    CompressionNotNegotiated,

    /// A CONTINUATION frame arrived with no message in progress.
    #[error("continuation frame without a preceding text frame")]
    UnexpectedContinuation,

    /// A new TEXT frame arrived while a fragmented message was still open.
    #[error("new text frame started while a message is already in progress")]
    UnexpectedNewMessage,

    /// The assembled message (or a single frame's payload) exceeded the cap.
    #[error("message size {size} exceeds limit {max}")]
    MessageTooLarge {
        /// Observed size in bytes.
        size: usize,
        /// Configured cap in bytes.
        max: usize,
    },

    /// The decoder's input buffer grew past the per-connection cap before a
    /// full frame could be assembled.
    #[error("input buffer size {size} exceeds limit {max}")]
    InputBufferTooLarge {
        /// Observed size in bytes.
        size: usize,
        /// Configured cap in bytes.
        max: usize,
    },

    /// Raw-deflate decompression of a compressed message failed.
    #[error("permessage-deflate decompression failed")]
    DecompressionFailed,
}
