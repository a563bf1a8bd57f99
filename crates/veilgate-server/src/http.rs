//! HTTP Surface (C8): the local upgrade-capable endpoint and the
//! onion-facing internal endpoint, both `axum::Router`s served over
//! `hyper`/`hyper-util`.
//!
//! The upgrade route bypasses axum's `WebSocketUpgrade` extractor in favor
//! of raw `hyper::upgrade::on`, the way §4.2's handshake contract (custom
//! accept-key, extension negotiation, identity cookie) needs to stay under
//! direct control rather than behind a higher-level abstraction tuned for
//! plain WebSocket use.

use std::io::Write as _;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tower::Service as _;
use tower_http::cors::{Any, CorsLayer};
use veilgate_proto::handshake;

use crate::connection;
use crate::core::{CoreHandle, DispatchResult};
use crate::error::GatewayError;

/// Per-message/body size cap shared by both surfaces (§5 resource policy).
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
/// Response bodies at or above this size are gzip-compressed when the
/// client advertised support (§4.4).
const GZIP_THRESHOLD: usize = 1000;

#[derive(Clone)]
struct LocalState {
    core: CoreHandle,
    active_connections: Arc<AtomicUsize>,
    max_connections: usize,
}

#[derive(Clone)]
struct InternalState {
    core: CoreHandle,
}

/// Serve the local upgrade-capable endpoint on `listener`, enforcing
/// `max_connections` across all currently-open sessions. When `tls` is
/// `Some`, every accepted connection is wrapped before reaching the router
/// (§4.8); otherwise the listener is served in plaintext.
pub async fn serve_local(
    listener: TcpListener,
    core: CoreHandle,
    max_connections: usize,
    tls: Option<Arc<rustls::ServerConfig>>,
) -> std::io::Result<()> {
    let state = LocalState { core, active_connections: Arc::new(AtomicUsize::new(0)), max_connections };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);
    let router = Router::new().route("/", get(upgrade_handler)).layer(cors).with_state(state);

    match tls {
        Some(config) => serve_tls(listener, router, TlsAcceptor::from(config)).await,
        None => axum::serve(listener, router.into_make_service()).await,
    }
}

/// Load a `rustls::ServerConfig` from a PEM certificate chain and private
/// key, the way the teacher's `load_tls_config` does for its QUIC endpoint
/// (`lockframe-server/src/transport.rs`) — minus the QUIC-specific ALPN and
/// self-signed fallback, since TLS here is simply absent or present.
pub fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<rustls::ServerConfig, GatewayError> {
    let cert_pem = std::fs::read(cert_path)?;
    let key_pem = std::fs::read(key_path)?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| GatewayError::TlsConfig(format!("failed to parse certificate chain: {err}")))?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|err| GatewayError::TlsConfig(format!("failed to parse private key: {err}")))?
        .ok_or_else(|| GatewayError::TlsConfig("no private key found".to_string()))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| GatewayError::TlsConfig(err.to_string()))
}

/// Accept loop for the TLS-wrapped local endpoint: each connection is
/// handshaken individually and handed to the router through
/// `hyper_util`'s auto (HTTP/1 or HTTP/2) connection builder, since
/// `axum::serve` itself only drives plaintext listeners.
async fn serve_tls(listener: TcpListener, router: Router<()>, acceptor: TlsAcceptor) -> std::io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%err, "TLS handshake failed");
                    return;
                },
            };
            let io = TokioIo::new(tls_stream);
            let hyper_service =
                hyper::service::service_fn(move |req| router.clone().call(req));
            if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(io, hyper_service)
                .await
            {
                tracing::debug!(%err, "connection closed with error");
            }
        });
    }
}

/// Serve the onion-facing internal endpoint on `listener`.
pub async fn serve_internal(listener: TcpListener, core: CoreHandle) -> std::io::Result<()> {
    let state = InternalState { core };
    let router = Router::new().fallback(internal_fallback).with_state(state);
    axum::serve(listener, router.into_make_service()).await
}

fn internal_options_response() -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("POST, OPTIONS"));
    response
}

async fn internal_fallback(State(state): State<InternalState>, req: Request) -> Response {
    match req.method().clone() {
        Method::OPTIONS => internal_options_response(),
        Method::POST => dispatch_public_request(state, req).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Handle the public-facing upgrade request: validate headers, resolve or
/// generate an identity, negotiate compression, and hand the upgraded
/// transport off to [`connection::run`].
async fn upgrade_handler(State(state): State<LocalState>, headers: HeaderMap, mut req: Request) -> Response {
    let connection_header = header_str(&headers, header::CONNECTION);
    let upgrade_header = header_str(&headers, header::UPGRADE);
    if !handshake::is_upgrade_request(connection_header, upgrade_header) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(client_key) = header_str(&headers, header::SEC_WEBSOCKET_KEY) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if state.active_connections.load(Ordering::SeqCst) >= state.max_connections {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let accept_key = handshake::compute_accept_key(client_key);
    let extensions_header = header_str(&headers, header::SEC_WEBSOCKET_EXTENSIONS);
    let compression_negotiated = handshake::offers_permessage_deflate(extensions_header);
    let cookie_header = header_str(&headers, header::COOKIE);
    let candidate_identity = handshake::extract_identity_cookie(cookie_header);

    let on_upgrade = hyper::upgrade::on(&mut req);

    let (outbound_tx, outbound_rx) = connection::outbound_channel();
    let identity = state.core.handshake(candidate_identity, compression_negotiated, outbound_tx.clone()).await;

    state.active_connections.fetch_add(1, Ordering::SeqCst);
    let core = state.core.clone();
    let active_connections = Arc::clone(&state.active_connections);
    let identity_for_task = identity.clone();
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                connection::run(upgraded, compression_negotiated, identity_for_task, core, outbound_tx, outbound_rx)
                    .await;
            },
            Err(err) => {
                tracing::warn!(%err, "upgrade future failed");
                core.session_closed(identity_for_task);
            },
        }
        active_connections.fetch_sub(1, Ordering::SeqCst);
    });

    let mut response = StatusCode::SWITCHING_PROTOCOLS.into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    response_headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(value) = HeaderValue::from_str(&accept_key) {
        response_headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    }
    if compression_negotiated {
        response_headers.insert(
            header::SEC_WEBSOCKET_EXTENSIONS,
            HeaderValue::from_static(handshake::PERMESSAGE_DEFLATE_RESPONSE),
        );
    }
    if let Ok(value) = HeaderValue::from_str(&handshake::identity_cookie(&identity)) {
        response_headers.insert(header::SET_COOKIE, value);
    }
    response
}

async fn dispatch_public_request(state: InternalState, req: Request) -> Response {
    let (token, api) = split_path(req.uri().path());
    if token.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let content_type = header_str(req.headers(), header::CONTENT_TYPE)
        .unwrap_or("text/html")
        .to_string();
    let wants_gzip = header_str(req.headers(), header::ACCEPT_ENCODING)
        .is_some_and(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("gzip")));

    let body = req.into_body();
    let bytes = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let result = state.core.public_request(token, api, content_type, bytes).await;
    match result {
        DispatchResult::NotFound => StatusCode::NOT_FOUND.into_response(),
        DispatchResult::Dispatched { identity, interaction, outcome } => {
            let public_outcome = outcome.await.unwrap_or(veilgate_core::PublicOutcome::NotFound);
            let (response, notify) = render_outcome(public_outcome, wants_gzip);
            if let Some(succeeded) = notify {
                state.core.interaction_completed(identity, interaction, succeeded);
            }
            response
        },
    }
}

/// Split a request path at the first `/` after the leading one, per §4.4.
fn split_path(path: &str) -> (String, String) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.find('/') {
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx..].to_string()),
        None => (trimmed.to_string(), "/".to_string()),
    }
}

/// Render a resolved [`veilgate_core::PublicOutcome`] into the public HTTP
/// response, alongside whether the control channel still owes the session a
/// `Succeeded`/`Failed` completion notification for this interaction.
///
/// `InternalError` carries `None`: the core already sent a structured
/// `{"Interaction":K,"Error":"..."}` frame for it (invalid base64 in the
/// client's reply), so sending a completion notification as well would give
/// the client two control messages for one interaction (§4.4 allows exactly
/// one).
fn render_outcome(outcome: veilgate_core::PublicOutcome, wants_gzip: bool) -> (Response, Option<bool>) {
    match outcome {
        veilgate_core::PublicOutcome::Replied { status, content_type, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            let (body, gzipped) = if wants_gzip && body.len() >= GZIP_THRESHOLD {
                gzip(&body).map_or((body, false), |compressed| (Bytes::from(compressed), true))
            } else {
                (body, false)
            };

            let mut response = Response::builder().status(status);
            if let Some(content_type) = content_type {
                response = response.header(header::CONTENT_TYPE, content_type);
            }
            if gzipped {
                response = response.header(header::CONTENT_ENCODING, "gzip");
                response = response.header(header::VARY, "Accept-Encoding");
            }
            let response = response.body(Body::from(body)).unwrap_or_else(|_| {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            });
            (response, Some(true))
        },
        veilgate_core::PublicOutcome::NotFound => (StatusCode::NOT_FOUND.into_response(), Some(true)),
        veilgate_core::PublicOutcome::InternalError => {
            (StatusCode::INTERNAL_SERVER_ERROR.into_response(), None)
        },
    }
}

fn gzip(body: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).ok()?;
    encoder.finish().ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// Bind a TCP listener, mapping bind failures into [`crate::error::GatewayError`].
pub async fn bind(address: &str, port: u16) -> Result<TcpListener, crate::error::GatewayError> {
    let addr = format!("{address}:{port}");
    TcpListener::bind(&addr).await.map_err(|source| crate::error::GatewayError::BindFailed {
        address: addr,
        source,
    })
}

/// Local address a bound listener ended up on (useful when the configured
/// port is `0` and the OS assigns an ephemeral one, as the internal endpoint
/// does per §4.7 step 3).
pub fn local_addr(listener: &TcpListener) -> std::io::Result<SocketAddr> {
    listener.local_addr()
}
