//! Per-session connection task: owns one upgraded local transport, reading
//! decoded frames and routing them to the [`CoreHandle`], and writing
//! whatever the core (or a local PING/PONG echo) puts on its outbound
//! channel.
//!
//! Split into a read half and a write half driven by [`tokio::select!`]
//! inside one task, the same shape the teacher's `handle_stream` gives a
//! single connection — one task per connection, no per-connection locking,
//! cooperating with the rest of the system only through message passing.

use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use veilgate_proto::{Frame, FrameCodec, Opcode};

use crate::core::CoreHandle;

/// Drive one upgraded connection to completion: read frames until the
/// transport closes or a protocol violation occurs, forward TEXT frames to
/// the core, echo PING/PONG locally, and flush whatever the core sends back.
///
/// Runs until the transport ends, at which point the core is notified so the
/// session's pending interactions resolve as not-found and its table entry
/// is freed.
pub async fn run(
    upgraded: Upgraded,
    compression_negotiated: bool,
    identity: String,
    core: CoreHandle,
    outbound: mpsc::UnboundedSender<Frame>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
) {
    let io = TokioIo::new(upgraded);
    let mut framed = Framed::new(io, FrameCodec::new(compression_negotiated));

    loop {
        tokio::select! {
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(frame)) => handle_incoming(frame, &identity, &core, &outbound),
                    Some(Err(err)) => {
                        tracing::debug!(%identity, %err, "frame decode error, closing session");
                        break;
                    },
                    None => break,
                }
            },
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if framed.send(frame).await.is_err() {
                            break;
                        }
                    },
                    None => break,
                }
            },
        }
    }

    core.session_closed(identity);
}

fn handle_incoming(frame: Frame, identity: &str, core: &CoreHandle, outbound: &mpsc::UnboundedSender<Frame>) {
    match frame.opcode {
        Opcode::Text => core.control_message(identity.to_string(), frame.payload),
        Opcode::Ping => {
            let _ = outbound.send(Frame::pong(frame.payload));
        },
        Opcode::Pong => {
            // Keepalive sweep pings expect no reply beyond the transport
            // staying open; nothing to do here.
        },
    }
}

/// Build a fresh outbound channel pair for a connection, returning the
/// sender half to register with the core at handshake time and the receiver
/// half for [`run`] to drain.
#[must_use]
pub fn outbound_channel() -> (mpsc::UnboundedSender<Frame>, mpsc::UnboundedReceiver<Frame>) {
    mpsc::unbounded_channel()
}
