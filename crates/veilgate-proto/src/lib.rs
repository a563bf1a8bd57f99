//! Wire-level protocol for veilgate: frame codec, control-message shapes,
//! and the WebSocket-style upgrade handshake.
//!
//! This crate has no knowledge of sessions, registries or dispatch — it only
//! knows how to turn bytes into [`Frame`]s and back, and how to classify a
//! decoded text frame's JSON payload into a [`control::ControlOutcome`].

pub mod control;
pub mod error;
pub mod frame;
pub mod handshake;

pub use control::{
    ControlError, ControlOutcome, ControlResponse, GlobalErrorResponse, InteractionErrorResponse,
    InteractionReplyBody, InteractionStatus, InteractionStatusValue, InvocationMessage,
    RequestVerb, ResponseValue,
};
pub use error::FrameError;
pub use frame::{Frame, FrameCodec, Opcode};
