//! Stateless pieces of the upgrade handshake: the RFC-6455 accept-key
//! derivation, per-message-deflate extension negotiation, and the
//! identity-cookie wire format.
//!
//! Identity resolution itself (recognizing a cookie against the live
//! registry, generating a fresh identity, checking uniqueness) needs access
//! to server-side state this crate does not hold, so it lives in
//! `veilgate-core`/`veilgate-server`. This module only knows how to turn an
//! already-resolved identity into the cookie string the spec requires, and
//! how to answer "did the client ask for compression".

use base64::Engine as _;
use sha1::{Digest, Sha1};

/// The magic GUID appended to the client's `Sec-WebSocket-Key` before
/// hashing, per RFC 6455 §1.3.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The `Sec-WebSocket-Extensions` value this server offers in response when
/// the client offered `permessage-deflate`. Context takeover is disabled on
/// both sides so the codec never needs to retain a deflate window across
/// messages.
pub const PERMESSAGE_DEFLATE_RESPONSE: &str =
    "permessage-deflate; server_no_context_takeover; client_no_context_takeover";

/// Name prefix every identity cookie must carry, per the host-bound cookie
/// prefix rule (`__Host-` cookies are rejected by browsers unless `Secure`,
/// `Path=/`, and no `Domain` attribute are all present).
pub const IDENTITY_COOKIE_NAME: &str = "__Host-Listener_ID";

/// `Max-Age` of the identity cookie in seconds: 4 × 52 × 7 × 24 × 3600.
pub const IDENTITY_COOKIE_MAX_AGE: u64 = 4 * 52 * 7 * 24 * 3600;

/// Compute the `Sec-WebSocket-Accept` header value for a given client-supplied
/// `Sec-WebSocket-Key`.
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Whether the client's `Sec-WebSocket-Extensions` header offered
/// `permessage-deflate`.
#[must_use]
pub fn offers_permessage_deflate(extensions_header: Option<&str>) -> bool {
    extensions_header.is_some_and(|value| {
        value.split(',').any(|offer| offer.trim().starts_with("permessage-deflate"))
    })
}

/// Whether the `Connection` header names `upgrade` (case-insensitively,
/// possibly among other comma-separated tokens) and `Upgrade` names
/// `websocket`.
#[must_use]
pub fn is_upgrade_request(connection_header: Option<&str>, upgrade_header: Option<&str>) -> bool {
    let names_upgrade = connection_header
        .is_some_and(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")));
    let is_websocket = upgrade_header.is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    names_upgrade && is_websocket
}

/// Render the `Set-Cookie` header value for a resolved session identity.
#[must_use]
pub fn identity_cookie(identity: &str) -> String {
    format!(
        "{IDENTITY_COOKIE_NAME}={identity}; Max-Age={IDENTITY_COOKIE_MAX_AGE}; HttpOnly; \
         Secure; SameSite=None; Path=/; Priority=High; Partitioned"
    )
}

/// Extract the identity value from a `Cookie` header, if the recognized
/// cookie name is present.
#[must_use]
pub fn extract_identity_cookie(cookie_header: Option<&str>) -> Option<String> {
    let header = cookie_header?;
    header.split(';').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name.trim() == IDENTITY_COOKIE_NAME).then(|| value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // The canonical example from RFC 6455 §1.3.
        assert_eq!(compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn detects_permessage_deflate_offer() {
        assert!(offers_permessage_deflate(Some("permessage-deflate; client_max_window_bits")));
        assert!(offers_permessage_deflate(Some("foo, permessage-deflate")));
        assert!(!offers_permessage_deflate(Some("foo")));
        assert!(!offers_permessage_deflate(None));
    }

    #[test]
    fn recognizes_upgrade_request() {
        assert!(is_upgrade_request(Some("keep-alive, Upgrade"), Some("websocket")));
        assert!(!is_upgrade_request(Some("keep-alive"), Some("websocket")));
        assert!(!is_upgrade_request(Some("Upgrade"), Some("h2c")));
    }

    #[test]
    fn cookie_round_trips_identity() {
        let cookie = identity_cookie("abc123");
        assert!(cookie.starts_with("__Host-Listener_ID=abc123;"));
        let header = format!("other=1; {cookie}");
        assert_eq!(extract_identity_cookie(Some(&header)).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_cookie_returns_none() {
        assert_eq!(extract_identity_cookie(Some("other=1")), None);
        assert_eq!(extract_identity_cookie(None), None);
    }
}
