//! Gateway Core actor (C4 Dispatch Engine + C5 Control Channel Adapter).
//!
//! This is the single-owner mutation point for the Session table and URL
//! Registry the concurrency model (§5) requires: every other task talks to
//! it by sending a [`CoreCommand`] over an unbounded channel and, where a
//! reply is needed, awaiting a `oneshot`. The actor loop itself never
//! `.await`s anything but the next command, so every command is handled to
//! completion before the next one starts — the single-event-loop discipline
//! of the original, realized as one task instead of one thread.
//!
//! Grounded on the teacher's `ServerDriver::process_event` (one method per
//! event variant, `HashMap`-keyed session state, no internal locking) but
//! generalized from a synchronous `process_event` returning actions to an
//! async actor, since this system's "actions" (writing a frame to a specific
//! session, completing a blocked public HTTP request) are inherently
//! concurrent with the core loop rather than collected and replayed by a
//! caller.

use std::collections::HashMap;

use base64::Engine as _;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use veilgate_core::{Environment, PendingRequest, PublicOutcome, Session};
use veilgate_proto::{
    control, ControlError, ControlOutcome, ControlResponse, Frame, GlobalErrorResponse,
    InteractionErrorResponse, InteractionStatus, InteractionStatusValue, InvocationMessage,
    RequestVerb, ResponseValue,
};

use crate::registry::UrlRegistry;

/// Identity alphabet: `a-z A-Z 0-9` (§6).
const IDENTITY_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const IDENTITY_MIN_LEN: usize = 40;
const IDENTITY_MAX_LEN: usize = 60;

/// Commands accepted by the gateway core actor. Each maps to one component
/// of §4: handshake resolves identity (C2), `ControlMessage` drives C4/C5,
/// `PublicRequest` is the other half of C4, `SessionClosed` tears a session
/// down, and `Sweep` drives the keepalive/prune cycle (C6).
pub enum CoreCommand {
    /// A session's handshake completed on the transport side; resolve its
    /// final identity and register it.
    Handshake {
        /// Identity recovered from a valid prior cookie, if any.
        candidate_identity: Option<String>,
        /// Whether the upgrade negotiated permessage-deflate.
        compression_supported: bool,
        /// Channel the per-connection task reads outbound frames from.
        outbound: mpsc::UnboundedSender<Frame>,
        /// Resolves to the final identity (possibly regenerated on collision).
        reply: oneshot::Sender<String>,
    },
    /// A decoded TEXT frame's payload, to be classified and acted on.
    ControlMessage {
        /// The sending session's identity.
        identity: String,
        /// Raw JSON payload.
        payload: Bytes,
    },
    /// A public request matched a registered URL and needs dispatching.
    PublicRequest {
        /// Path token (between the leading `/` and the next `/`).
        token: String,
        /// Path remainder after the token, including its leading `/`.
        api: String,
        /// Request content type (already defaulted to `text/html` upstream).
        content_type: String,
        /// Buffered request body.
        body: Bytes,
        /// Resolves immediately: either the URL was unresolvable, or the
        /// interaction was registered and will resolve via its own receiver.
        reply: oneshot::Sender<DispatchResult>,
    },
    /// The public HTTP handler finished writing (or failed to write) the
    /// response for a previously-dispatched interaction. Triggers the
    /// `Succeeded`/`Failed` notification back over the control channel,
    /// which must follow — never precede — the response actually draining.
    InteractionCompleted {
        /// The owning session's identity.
        identity: String,
        /// The interaction this completes.
        interaction: u64,
        /// Whether the response was written successfully.
        succeeded: bool,
    },
    /// The per-connection task observed its transport end (close, protocol
    /// violation, or handshake abort before a session was ever registered).
    SessionClosed {
        /// The identity to tear down, if one was ever assigned.
        identity: String,
    },
    /// Periodic keepalive sweep + identity-registry prune (§4.6, §9).
    Sweep {
        /// Current wall-clock time, for prune comparisons.
        now_secs: u64,
    },
}

/// Immediate (synchronous) outcome of dispatching a public request.
pub enum DispatchResult {
    /// No session owns the requested URL, or it owns it but is disconnected.
    NotFound,
    /// The interaction was registered; `outcome` resolves once the client
    /// replies, the session closes, or the interaction space is exhausted.
    Dispatched {
        /// The owning session's identity, to report completion against.
        identity: String,
        /// The allocated interaction id.
        interaction: u64,
        /// Resolves to the eventual [`PublicOutcome`].
        outcome: oneshot::Receiver<PublicOutcome>,
    },
}

struct SessionEntry {
    session: Session,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// The actor's owned state: live sessions and the URL registry. Never
/// shared — only ever touched from [`run`].
struct GatewayCore<E: Environment> {
    sessions: HashMap<String, SessionEntry>,
    registry: UrlRegistry,
    env: E,
}

/// Cheaply-cloneable handle to a running gateway core actor.
#[derive(Clone)]
pub struct CoreHandle {
    tx: mpsc::UnboundedSender<CoreCommand>,
}

impl CoreHandle {
    /// Resolve a session's identity and register it, given the candidate
    /// cookie value (if any) and the channel its connection task will read
    /// outbound frames from.
    pub async fn handshake(
        &self,
        candidate_identity: Option<String>,
        compression_supported: bool,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> String {
        let (reply, rx) = oneshot::channel();
        let cmd = CoreCommand::Handshake { candidate_identity, compression_supported, outbound, reply };
        if self.tx.send(cmd).is_err() {
            // Core actor gone: fall back to an identity that will never
            // collide with a live session, since there are none.
            return String::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Hand a decoded control-channel TEXT frame to the core for processing.
    pub fn control_message(&self, identity: String, payload: Bytes) {
        let _ = self.tx.send(CoreCommand::ControlMessage { identity, payload });
    }

    /// Dispatch a public request, returning the immediate [`DispatchResult`].
    /// On `Dispatched`, the caller awaits `outcome` itself and must report
    /// back via [`CoreHandle::interaction_completed`] once the response has
    /// been written (or failed to write) — never before.
    pub async fn public_request(
        &self,
        token: String,
        api: String,
        content_type: String,
        body: Bytes,
    ) -> DispatchResult {
        let (reply, rx) = oneshot::channel();
        let cmd = CoreCommand::PublicRequest { token, api, content_type, body, reply };
        if self.tx.send(cmd).is_err() {
            return DispatchResult::NotFound;
        }
        rx.await.unwrap_or(DispatchResult::NotFound)
    }

    /// Report that the public response for `interaction` has been written
    /// (`succeeded`) or failed to write, so the core can send the
    /// `Succeeded`/`Failed` control-channel notification in the right order.
    pub fn interaction_completed(&self, identity: String, interaction: u64, succeeded: bool) {
        let _ = self.tx.send(CoreCommand::InteractionCompleted { identity, interaction, succeeded });
    }

    /// Notify the core that a session's transport ended.
    pub fn session_closed(&self, identity: String) {
        let _ = self.tx.send(CoreCommand::SessionClosed { identity });
    }

    /// Trigger one keepalive sweep + identity prune pass.
    pub fn sweep(&self, now_secs: u64) {
        let _ = self.tx.send(CoreCommand::Sweep { now_secs });
    }
}

/// Spawn the gateway core actor task, returning a handle to it.
pub fn spawn<E: Environment>(env: E, onion_host: String) -> CoreHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let core = GatewayCore { sessions: HashMap::new(), registry: UrlRegistry::new(onion_host), env };
    tokio::spawn(run(core, rx));
    CoreHandle { tx }
}

async fn run<E: Environment>(mut core: GatewayCore<E>, mut rx: mpsc::UnboundedReceiver<CoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        core.handle(cmd);
    }
    tracing::debug!("gateway core actor shutting down: command channel closed");
}

impl<E: Environment> GatewayCore<E> {
    fn handle(&mut self, cmd: CoreCommand) {
        match cmd {
            CoreCommand::Handshake { candidate_identity, compression_supported, outbound, reply } => {
                let identity = self.handshake(candidate_identity, compression_supported, outbound);
                let _ = reply.send(identity);
            },
            CoreCommand::ControlMessage { identity, payload } => {
                self.control_message(&identity, &payload);
            },
            CoreCommand::PublicRequest { token, api, content_type, body, reply } => {
                self.public_request(token, api, content_type, body, reply);
            },
            CoreCommand::InteractionCompleted { identity, interaction, succeeded } => {
                self.send_interaction_status(&identity, interaction, succeeded);
            },
            CoreCommand::SessionClosed { identity } => {
                self.teardown_session(&identity);
            },
            CoreCommand::Sweep { now_secs } => {
                self.sweep(now_secs);
            },
        }
    }

    fn handshake(
        &mut self,
        candidate_identity: Option<String>,
        compression_supported: bool,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> String {
        let reclaimable = candidate_identity.filter(|candidate| {
            is_identity_alphanumeric(candidate) && self.registry.has_identity(candidate)
        });

        let mut identity = reclaimable.unwrap_or_else(|| generate_identity(&self.env));
        while self.sessions.contains_key(&identity) {
            identity = generate_identity(&self.env);
        }

        let now = self.env.wall_clock_secs();
        self.registry.touch(&identity, now);
        self.sessions.insert(
            identity.clone(),
            SessionEntry { session: Session::new(identity.clone(), compression_supported), outbound },
        );
        tracing::debug!(identity = %identity, "session handshake complete");
        identity
    }

    fn teardown_session(&mut self, identity: &str) {
        if let Some(mut entry) = self.sessions.remove(identity) {
            entry.session.cancel_all_interactions();
            tracing::debug!(identity = %identity, "session torn down");
        }
    }

    /// Send `frame` to `identity`'s outbound channel. Tears the session down
    /// if the channel is already closed (its connection task has ended) —
    /// the actor-model stand-in for "any write failure immediately tears
    /// down that session" (§4.6).
    fn send_frame(&mut self, identity: &str, frame: Frame) -> bool {
        let delivered = self.sessions.get(identity).is_some_and(|e| e.outbound.send(frame).is_ok());
        if !delivered {
            self.teardown_session(identity);
        }
        delivered
    }

    fn send_json(&mut self, identity: &str, value: &impl serde::Serialize) {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.send_frame(identity, Frame::text(bytes));
            },
            Err(err) => tracing::error!(%err, "failed to serialize control response"),
        }
    }

    fn control_message(&mut self, identity: &str, payload: &[u8]) {
        if !self.sessions.contains_key(identity) {
            return;
        }

        match control::classify(payload) {
            ControlOutcome::Request { index, verb } => self.handle_request(identity, index, verb),
            ControlOutcome::RequestError { index, error } => {
                self.send_json(identity, &ControlResponse::Failure { index, error: error.to_string() });
            },
            ControlOutcome::InteractionReply { interaction, body } => {
                self.handle_interaction_reply(identity, interaction, body);
            },
            ControlOutcome::InteractionError { interaction, error } => {
                self.send_interaction_error(identity, interaction, error);
            },
            ControlOutcome::GlobalError(error) => {
                let response = GlobalErrorResponse { error: error.to_string() };
                self.send_json(identity, &response);
            },
        }
    }

    fn handle_request(&mut self, identity: &str, index: u64, verb: RequestVerb) {
        let response = match verb {
            RequestVerb::CreateUrl => {
                let url = self.registry.create(identity, &self.env);
                ControlResponse::Success { index, response: ResponseValue::Url(url) }
            },
            RequestVerb::ChangeUrl { url } => match self.registry.change(identity, &url, &self.env) {
                Ok(new_url) => ControlResponse::Success { index, response: ResponseValue::Url(new_url) },
                Err(_) => ControlResponse::Failure {
                    index: Some(index),
                    error: ControlError::UrlNotOwned.to_string(),
                },
            },
            RequestVerb::DeleteUrl { url } => match self.registry.delete(identity, &url) {
                Ok(()) => ControlResponse::Success { index, response: ResponseValue::Owned(true) },
                Err(_) => ControlResponse::Failure {
                    index: Some(index),
                    error: ControlError::UrlNotOwned.to_string(),
                },
            },
            RequestVerb::OwnUrl { url } => {
                let owned = self.registry.owns(identity, &url);
                ControlResponse::Success { index, response: ResponseValue::Owned(owned) }
            },
        };
        self.send_json(identity, &response);
    }

    fn send_interaction_error(&mut self, identity: &str, interaction: Option<u64>, error: ControlError) {
        let response = InteractionErrorResponse { interaction, error: error.to_string() };
        self.send_json(identity, &response);
    }

    fn send_interaction_status(&mut self, identity: &str, interaction: u64, succeeded: bool) {
        let status =
            if succeeded { InteractionStatusValue::Succeeded } else { InteractionStatusValue::Failed };
        let response = InteractionStatus { interaction, status };
        self.send_json(identity, &response);
    }

    /// Handle a client's reply to a previously-dispatched invocation.
    ///
    /// Only resolves the blocked public-side receiver; it does NOT send the
    /// `Succeeded`/`Failed` notification itself. That happens later, once
    /// the public HTTP handler reports back through
    /// [`CoreHandle::interaction_completed`] that the response actually
    /// drained — sending it here would race ahead of the write it's meant
    /// to confirm.
    fn handle_interaction_reply(
        &mut self,
        identity: &str,
        interaction: u64,
        body: control::InteractionReplyBody,
    ) {
        let Some(entry) = self.sessions.get_mut(identity) else { return };
        let Some(pending) = entry.session.remove_interaction(interaction) else {
            self.send_interaction_error(identity, Some(interaction), ControlError::InteractionNotFound);
            return;
        };

        if body.data.is_empty() {
            // Empty Data is the URL-not-found sentinel (§4.4): the public
            // request resolves as 404 and the session never hears about it
            // again, since nothing was actually written to a public peer.
            let _ = pending.send(PublicOutcome::NotFound);
            return;
        }

        let decoded = base64::engine::general_purpose::STANDARD.decode(&body.data);
        let Ok(decoded_bytes) = decoded else {
            let _ = pending.send(PublicOutcome::InternalError);
            self.send_interaction_error(identity, Some(interaction), ControlError::InvalidDataParameter);
            return;
        };

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let status = body.status.map_or(200, |s| s as u16);
        let content_type = (!decoded_bytes.is_empty())
            .then(|| body.content_type.unwrap_or_else(|| "text/html".to_string()));

        let outcome = PublicOutcome::Replied { status, content_type, body: Bytes::from(decoded_bytes) };

        // If the public peer already vanished, the receiver is gone and
        // nobody will ever report completion back; that's fine, there is no
        // drain to confirm.
        let _ = pending.send(outcome);
    }

    fn public_request(
        &mut self,
        token: String,
        api: String,
        content_type: String,
        body: Bytes,
        reply: oneshot::Sender<DispatchResult>,
    ) {
        let url = self.registry.full_url(&token);
        let Some(identity) = self.registry.lookup(&url).map(str::to_string) else {
            let _ = reply.send(DispatchResult::NotFound);
            return;
        };
        let Some(entry) = self.sessions.get_mut(&identity) else {
            let _ = reply.send(DispatchResult::NotFound);
            return;
        };

        let interaction = match entry.session.next_interaction_id() {
            Ok(id) => id,
            Err(_) => {
                let _ = reply.send(DispatchResult::NotFound);
                return;
            },
        };

        let invocation = InvocationMessage {
            interaction,
            url,
            api,
            content_type,
            data: base64::engine::general_purpose::STANDARD.encode(&body),
        };

        let Ok(json) = serde_json::to_vec(&invocation) else {
            let _ = reply.send(DispatchResult::NotFound);
            return;
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        if entry.session.add_interaction(interaction, outcome_tx).is_err() {
            tracing::error!(%identity, interaction, "interaction id collision dispatching public request");
            let _ = reply.send(DispatchResult::NotFound);
            return;
        }

        let _ = reply.send(DispatchResult::Dispatched {
            identity: identity.clone(),
            interaction,
            outcome: outcome_rx,
        });
        self.send_frame(&identity, Frame::text(json));
    }

    fn sweep(&mut self, now_secs: u64) {
        let identities: Vec<String> = self.sessions.keys().cloned().collect();
        for identity in identities {
            self.send_frame(&identity, Frame::ping(Bytes::new()));
        }

        for identity in self.registry.prune_stale(now_secs) {
            tracing::debug!(identity = %identity, "pruned stale identity registry entry");
        }
    }
}

fn is_identity_alphanumeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Generate a fresh identity string: `IDENTITY_MIN_LEN..=IDENTITY_MAX_LEN`
/// characters drawn from [`IDENTITY_ALPHABET`] by rejection sampling, the
/// same technique [`UrlRegistry`]'s token generator uses so both stay
/// unbiased under a 4-bit-aligned alphabet of non-power-of-two size.
fn generate_identity(env: &impl Environment) -> String {
    let mut len_byte = [0u8; 1];
    env.random_bytes(&mut len_byte);
    let span = (IDENTITY_MAX_LEN - IDENTITY_MIN_LEN + 1) as u8;
    let len = IDENTITY_MIN_LEN + (len_byte[0] % span) as usize;

    let bucket_count = 256 / IDENTITY_ALPHABET.len();
    let mut identity = String::with_capacity(len);
    let mut byte = [0u8; 1];
    while identity.len() < len {
        env.random_bytes(&mut byte);
        if (byte[0] as usize) >= bucket_count * IDENTITY_ALPHABET.len() {
            continue;
        }
        identity.push(IDENTITY_ALPHABET[byte[0] as usize % IDENTITY_ALPHABET.len()] as char);
    }
    identity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestEnv;

    fn spawned() -> CoreHandle {
        spawn(TestEnv::new(), "xyz".to_string())
    }

    #[tokio::test]
    async fn handshake_generates_fresh_identity_without_cookie() {
        let core = spawned();
        let (tx, _rx) = mpsc::unbounded_channel();
        let identity = core.handshake(None, false, tx).await;
        assert!(identity.len() >= IDENTITY_MIN_LEN && identity.len() <= IDENTITY_MAX_LEN);
    }

    #[tokio::test]
    async fn create_url_round_trips_through_control_message() {
        let core = spawned();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let identity = core.handshake(None, false, tx).await;

        core.control_message(identity.clone(), Bytes::from_static(br#"{"Index":1,"Request":"Create URL"}"#));
        // Give the actor a tick to process (unbounded channel, single consumer).
        tokio::task::yield_now().await;

        let frame = rx.recv().await.expect("expected a response frame");
        let text = String::from_utf8(frame.payload.to_vec()).unwrap();
        assert!(text.contains(r#""Index":1"#));
        assert!(text.contains("http://xyz.onion/"));
    }

    #[tokio::test]
    async fn public_request_to_unknown_url_resolves_not_found() {
        let core = spawned();
        let result = core
            .public_request("zzzz".to_string(), "/".to_string(), "text/html".to_string(), Bytes::new())
            .await;
        assert!(matches!(result, DispatchResult::NotFound));
    }

    #[tokio::test]
    async fn session_close_cancels_pending_interaction_as_not_found() {
        let core = spawned();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let identity = core.handshake(None, false, tx).await;

        core.control_message(identity.clone(), Bytes::from_static(br#"{"Index":1,"Request":"Create URL"}"#));
        let frame = rx.recv().await.expect("create url response");
        let parsed: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        let url = parsed["Response"].as_str().expect("url string").to_string();
        let token = url.rsplit('/').next().unwrap().to_string();

        let result = core
            .public_request(token, "/".to_string(), "text/html".to_string(), Bytes::new())
            .await;
        let DispatchResult::Dispatched { outcome, .. } = result else {
            panic!("expected a dispatched interaction");
        };
        // Drain the invocation frame the dispatch just sent.
        let _ = rx.recv().await;

        core.session_closed(identity);
        let resolved = outcome.await.unwrap();
        assert!(matches!(resolved, PublicOutcome::NotFound));
    }
}
