//! Overlay Bootstrap (C7): waits for the embedded overlay daemon's circuit,
//! requests an onion service bound to the internal HTTP port, and learns
//! the published hostname.
//!
//! Driven by a line-oriented `Framed<TcpStream, LinesCodec>` — the idiomatic
//! analogue of the original's newline-terminated control protocol — rather
//! than a hand-rolled buffer scanner, following the same "parse structure
//! with a library, keep the state machine an explicit enum" split used for
//! the frame codec (`veilgate_proto::frame`) and the session handshake.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Explicit bootstrap state, mirroring the teacher's pattern of modeling a
/// protocol exchange as an enum rather than a sequence of ad-hoc booleans
/// (`ConnectionState` in `lockframe-core/src/connection.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Sent `AUTHENTICATE`, awaiting acknowledgement.
    Authenticating,
    /// Polling `GETINFO status/circuit-established` until it reports 1.
    WaitingForCircuit,
    /// Sent `ADD_ONION`, awaiting the assigned hostname.
    CreatingOnion,
    /// Bootstrap complete; hostname known.
    Ready,
}

/// Any step of the bootstrap sequence failing is fatal to the process.
#[derive(Debug)]
pub enum BootstrapError {
    /// The control socket connection itself failed.
    Io(std::io::Error),
    /// A line failed to decode (exceeded the codec's line length cap, or
    /// was not valid UTF-8).
    LineCodec(LinesCodecError),
    /// The control socket closed before the bootstrap sequence completed.
    UnexpectedClose { state: BootstrapState },
    /// The daemon rejected `AUTHENTICATE`.
    AuthenticationFailed { response: String },
    /// `ADD_ONION` did not return a parseable `250-ServiceID=` line.
    OnionCreationFailed { response: String },
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "control socket I/O error: {err}"),
            Self::LineCodec(err) => write!(f, "control socket line decode error: {err}"),
            Self::UnexpectedClose { state } => {
                write!(f, "control socket closed during {state:?}")
            },
            Self::AuthenticationFailed { response } => {
                write!(f, "overlay daemon rejected authentication: {response}")
            },
            Self::OnionCreationFailed { response } => {
                write!(f, "overlay daemon rejected onion service creation: {response}")
            },
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::LineCodec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<LinesCodecError> for BootstrapError {
    fn from(err: LinesCodecError) -> Self {
        Self::LineCodec(err)
    }
}

/// Interval between `GETINFO status/circuit-established` polls.
const CIRCUIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a successful bootstrap: the onion hostname the public endpoint
/// is now reachable at.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// The `<hostname>.onion` assigned by the overlay daemon (without the
    /// `.onion` suffix, matching how it is embedded into published URLs).
    pub onion_host: String,
}

/// Run the bootstrap state machine against an already-connected control
/// socket, given the internal HTTP port to publish.
pub async fn bootstrap(
    control_socket: TcpStream,
    internal_port: u16,
) -> Result<BootstrapOutcome, BootstrapError> {
    let mut lines = Framed::new(control_socket, LinesCodec::new());
    let mut state = BootstrapState::Authenticating;

    lines.send("authenticate \"\"".to_string()).await?;
    let response = next_line(&mut lines, state).await?;
    if !response.starts_with("250") {
        return Err(BootstrapError::AuthenticationFailed { response });
    }

    state = BootstrapState::WaitingForCircuit;
    loop {
        lines.send("getinfo status/circuit-established".to_string()).await?;
        let response = next_line(&mut lines, state).await?;
        if response.starts_with("250-status/circuit-established=1") {
            break;
        }
        sleep(CIRCUIT_POLL_INTERVAL).await;
    }

    state = BootstrapState::CreatingOnion;
    lines
        .send(format!("ADD_ONION NEW:BEST Flags=DiscardPK Port=80,{internal_port}"))
        .await?;
    let response = next_line(&mut lines, state).await?;
    let onion_host = parse_service_id(&response)
        .ok_or_else(|| BootstrapError::OnionCreationFailed { response: response.clone() })?;

    Ok(BootstrapOutcome { onion_host })
}

async fn next_line(
    lines: &mut Framed<TcpStream, LinesCodec>,
    state: BootstrapState,
) -> Result<String, BootstrapError> {
    match lines.next().await {
        Some(line) => Ok(line?),
        None => Err(BootstrapError::UnexpectedClose { state }),
    }
}

/// Parse `250-ServiceID=<hostname>` out of a control-socket response line.
fn parse_service_id(line: &str) -> Option<String> {
    line.strip_prefix("250-ServiceID=").map(str::trim).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_id_line() {
        assert_eq!(
            parse_service_id("250-ServiceID=abc123xyz"),
            Some("abc123xyz".to_string())
        );
    }

    #[test]
    fn rejects_unrelated_line() {
        assert_eq!(parse_service_id("250 OK"), None);
    }

    #[test]
    fn bootstrap_error_display() {
        let err = BootstrapError::AuthenticationFailed { response: "515 Bad auth".to_string() };
        assert_eq!(err.to_string(), "overlay daemon rejected authentication: 515 Bad auth");
    }
}
