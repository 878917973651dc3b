//! USSD payment gateway server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p opflow-ussd --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p opflow-ussd
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p opflow-ussd
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `config.toml`)
//! - `HOST` — Override bind address (default: `0.0.0.0`)
//! - `PORT` — Override port (default: `3000`)
//! - `RUST_LOG` — Log level filter (default: `info`)
//! - Secrets referenced by `$VAR` in the config file

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use tokio_util::sync::CancellationToken;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use opflow::api::PaymentOps;
use opflow::pipeline::PaymentPipeline;
use opflow::wallet::normalize_identifier;
use opflow_http::{AuthenticatedClient, ClientConfig};

use opflow_ussd::config::GatewayConfig;
use opflow_ussd::handlers::{Gateway, gateway_router};
use opflow_ussd::notify::{NoopNotifier, NotificationSink, SmsNotifier};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing with RUST_LOG env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Gateway failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        wallet = %config.wallet.address,
        sms = config.sms.is_some(),
        "Loaded configuration"
    );

    let identity = normalize_identifier(&config.wallet.address)?;
    let private_key_pem = config.wallet.load_private_key()?;
    let client = AuthenticatedClient::bind(ClientConfig::new(
        identity,
        &config.wallet.key_id,
        private_key_pem,
    ))?;

    let ops: Arc<dyn PaymentOps> = Arc::new(client);
    let pipeline = PaymentPipeline::new(ops, config.payments.outgoing_access_token.clone())
        .with_poll_policy(config.poll.to_policy())
        .with_incoming_payment_ttl(Duration::from_secs(
            config.payments.incoming_payment_ttl_secs,
        ));

    let notifier: Arc<dyn NotificationSink> = match config.sms.clone() {
        Some(sms) => Arc::new(SmsNotifier::new(sms)),
        None => {
            tracing::warn!("No SMS provider configured; notifications are disabled");
            Arc::new(NoopNotifier)
        }
    };

    let shutdown = CancellationToken::new();
    let state = Arc::new(Gateway {
        pipeline,
        notifier,
        sender_wallet: config.wallet.address.clone(),
        shutdown: shutdown.clone(),
    });

    // Build Axum router
    let app = gateway_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("USSD gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // In-flight runs observe this between steps and poll iterations.
            shutdown.cancel();
        })
        .await?;

    tracing::info!("Gateway shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
