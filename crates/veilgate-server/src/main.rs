//! `veilgate` binary: CLI parsing, logging init, overlay bootstrap, and
//! wiring of the dispatch core, keepalive sweeper, and HTTP surfaces.
//!
//! # Usage
//!
//! ```bash
//! veilgate --address 0.0.0.0 --port 9061
//! veilgate --address 0.0.0.0 --port 9061 --cert cert.pem --key key.pem
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpStream;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use veilgate_server::GatewayError;

/// Default control-socket address of the embedded overlay daemon. Not
/// exposed as a CLI flag per `--control-socket`'s own default; overridable
/// there when the daemon listens elsewhere.
const DEFAULT_CONTROL_SOCKET: &str = "127.0.0.1:9151";

/// Reverse-tunnel onion gateway.
#[derive(Parser, Debug)]
#[command(name = "veilgate")]
#[command(about = "Reverse-tunnel onion-routing gateway")]
#[command(version)]
struct Args {
    /// Address the local upgrade endpoint binds to.
    #[arg(long, default_value = "localhost")]
    address: String,

    /// Port the local upgrade endpoint binds to.
    #[arg(long, default_value = "9061")]
    port: u16,

    /// Path to a TLS certificate (PEM format). Requires `--key`.
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Path to a TLS private key (PEM format). Requires `--cert`.
    #[arg(long)]
    key: Option<PathBuf>,

    /// Maximum concurrent sessions before new upgrades are rejected with 503.
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error). Overridable via `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Address of the embedded overlay daemon's control socket.
    #[arg(long, default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // rustls 0.23 requires a process-wide default crypto provider; installing
    // it here (rather than relying on a single-backend feature flag) keeps
    // this explicit regardless of which TLS backend Cargo resolves.
    let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.cert.is_some() != args.key.is_some() {
        tracing::error!("--cert and --key must both be given, or neither");
        return Err(Box::new(GatewayError::IncompleteTlsConfig));
    }
    let tls = match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => Some(Arc::new(veilgate_server::http::load_tls_config(cert, key)?)),
        _ => None,
    };

    tracing::info!("veilgate starting");

    let internal_listener = veilgate_server::http::bind("127.0.0.1", 0).await?;
    let internal_port = veilgate_server::http::local_addr(&internal_listener)?.port();
    tracing::info!(port = internal_port, "internal endpoint bound to ephemeral port");

    tracing::info!(control_socket = %args.control_socket, "connecting to overlay control socket");
    let control_socket = TcpStream::connect(&args.control_socket).await.map_err(GatewayError::from)?;
    let outcome = veilgate_server::bootstrap::bootstrap(control_socket, internal_port)
        .await
        .map_err(GatewayError::from)?;
    tracing::info!(onion_host = %outcome.onion_host, "overlay bootstrap complete");

    let local_listener = veilgate_server::http::bind(&args.address, args.port).await?;
    tracing::info!(address = %args.address, port = args.port, "local endpoint bound");

    let env = veilgate_server::SystemEnv::default();
    let core = veilgate_server::spawn(env.clone(), outcome.onion_host);

    tokio::spawn(veilgate_server::keepalive::run(core.clone(), env));
    tokio::spawn(veilgate_server::http::serve_internal(internal_listener, core.clone()));

    veilgate_server::http::serve_local(local_listener, core, args.max_connections, tls).await?;

    Ok(())
}
