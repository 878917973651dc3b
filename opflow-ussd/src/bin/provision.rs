//! Provisions the long-lived outgoing-payment access token.
//!
//! Outgoing-payment authorization is asymmetric to the per-run grants the
//! pipeline negotiates: it needs human consent, so it is obtained once ahead
//! of time and handed to the gateway via configuration. This tool runs that
//! interactive negotiation: it prints the authorization redirect, polls the
//! continuation endpoint until the grant finalizes, and prints the token.
//!
//! ```bash
//! opflow-provision \
//!     --wallet '$pay.example/alice' \
//!     --key-id a7b0...-key \
//!     --private-key keys/wallet.pem \
//!     --debit-limit 100000
//! ```

#![allow(clippy::print_stdout)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use opflow::amount::Amount;
use opflow::api::PaymentOps;
use opflow::grant::{AccessAction, AccessScope, AccessType, FinalizedGrant, Grant};
use opflow::negotiator::{GrantNegotiator, Interaction, PollPolicy};
use opflow::wallet::{WalletAddressResolver, normalize_identifier};
use opflow_http::{AuthenticatedClient, ClientConfig};

/// Obtain a long-lived outgoing-payment access token for a wallet.
#[derive(Debug, Parser)]
#[command(name = "opflow-provision", version)]
struct Args {
    /// Wallet identifier of the paying account (payment pointer or URL).
    #[arg(long, env = "OPFLOW_WALLET_ADDRESS")]
    wallet: String,

    /// Key identifier registered with the wallet provider.
    #[arg(long, env = "OPFLOW_KEY_ID")]
    key_id: String,

    /// Path to the PKCS#8 PEM private key.
    #[arg(long, env = "OPFLOW_PRIVATE_KEY_PATH")]
    private_key: PathBuf,

    /// Debit ceiling for the token, in base units of the wallet's asset.
    #[arg(long, default_value_t = 100_000)]
    debit_limit: u128,

    /// Seconds between continuation polls.
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Maximum continuation polls before giving up.
    #[arg(long, default_value_t = 60)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Provisioning failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let identity = normalize_identifier(&args.wallet)?;
    let private_key_pem = std::fs::read_to_string(&args.private_key)?;
    let client = AuthenticatedClient::bind(ClientConfig::new(
        identity,
        &args.key_id,
        private_key_pem,
    ))?;
    let ops: Arc<dyn PaymentOps> = Arc::new(client);

    let wallet = WalletAddressResolver::new(Arc::clone(&ops))
        .resolve(&args.wallet)
        .await?;
    tracing::info!(wallet = %wallet.resource_id, asset = %wallet.asset_code, "resolved wallet");

    let scope = AccessScope::new(
        AccessType::OutgoingPayment,
        vec![AccessAction::Create, AccessAction::Read, AccessAction::List],
    )
    .for_account(wallet.resource_id.clone())
    .with_debit_limit(Amount::new(
        args.debit_limit,
        wallet.asset_code.clone(),
        wallet.asset_scale,
    ));

    let negotiator = GrantNegotiator::new(ops).with_policy(PollPolicy {
        min_interval: Duration::from_secs(args.poll_interval),
        max_attempts: args.max_attempts,
        overall_deadline: Duration::from_secs(
            args.poll_interval * u64::from(args.max_attempts) + 60,
        ),
    });

    match negotiator
        .request_grant(&wallet.auth_server, scope, Interaction::Redirect)
        .await?
    {
        Grant::Finalized(grant) => print_token(&grant),
        Grant::Pending(pending) => {
            match &pending.interact {
                Some(interact) => {
                    println!("Authorize this grant in your browser:");
                    println!("{}", interact.redirect);
                }
                None => tracing::warn!("pending grant carried no interaction redirect"),
            }

            tracing::info!("waiting for authorization...");
            let grant = negotiator
                .continue_to_finalized(pending, &CancellationToken::new())
                .await?;
            print_token(&grant);
        }
    }

    Ok(())
}

fn print_token(grant: &FinalizedGrant) {
    println!("Access token:");
    println!("{}", grant.access_token);
    if let Some(expires_in) = grant.expires_in {
        println!("Expires in: {}s", expires_in.as_secs());
    }
    if let Some(manage) = &grant.manage {
        println!("Manage URI: {manage}");
    }
}
