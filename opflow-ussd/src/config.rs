//! Gateway configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 3000
//!
//! [wallet]
//! address = "$pay.example/alice"
//! key_id = "a7b0...-key"
//! private_key_path = "keys/wallet.pem"
//!
//! [payments]
//! outgoing_access_token = "${OPFLOW_OUTGOING_TOKEN}"
//!
//! [sms]
//! api_key = "$SMS_API_KEY"
//! username = "sandbox"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `config.toml`)
//! - `HOST` — Override server bind address
//! - `PORT` — Override server port
//! - Secrets referenced by `$VAR` in the config file

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use opflow::negotiator::PollPolicy;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `3000`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// The paying wallet identity.
    pub wallet: WalletConfig,

    /// Payment pipeline settings.
    pub payments: PaymentsConfig,

    /// SMS notification settings; notifications are disabled when absent.
    #[serde(default)]
    pub sms: Option<SmsConfig>,

    /// Grant continuation poll bounds.
    #[serde(default)]
    pub poll: PollConfig,
}

/// The wallet identity the gateway signs and pays as.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Wallet identifier; may carry the payment-pointer sigil.
    pub address: String,

    /// Key identifier registered with the wallet provider.
    pub key_id: String,

    /// Path to the PKCS#8 PEM private key file.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    /// Inline PKCS#8 PEM private key; wins over `private_key_path`.
    /// Supports `$VAR` / `${VAR}` environment expansion.
    #[serde(default)]
    pub private_key_pem: Option<String>,
}

impl WalletConfig {
    /// Returns the private key PEM, reading the key file when no inline key
    /// is configured.
    ///
    /// # Errors
    ///
    /// Returns an error when neither source is configured or the file cannot
    /// be read.
    pub fn load_private_key(&self) -> Result<String, Box<dyn std::error::Error>> {
        if let Some(pem) = &self.private_key_pem {
            return Ok(pem.clone());
        }
        if let Some(path) = &self.private_key_path {
            return Ok(std::fs::read_to_string(path)?);
        }
        Err("wallet config needs private_key_pem or private_key_path".into())
    }
}

/// Payment pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Pre-provisioned long-lived token scoped for outgoing-payment creation.
    /// Obtain one with the `opflow-provision` binary.
    pub outgoing_access_token: String,

    /// Lifetime of created incoming payments, in seconds (default: 1800).
    #[serde(default = "default_incoming_ttl")]
    pub incoming_payment_ttl_secs: u64,
}

/// SMS notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    /// Messaging API endpoint.
    #[serde(default = "default_sms_endpoint")]
    pub endpoint: Url,

    /// API key sent in the `apiKey` header.
    /// Supports `$VAR` / `${VAR}` environment expansion.
    pub api_key: String,

    /// Account username at the SMS provider.
    pub username: String,

    /// Registered sender id, when the provider requires one.
    #[serde(default)]
    pub sender_id: Option<String>,

    /// Dial prefix substituted for a leading `0` in subscriber numbers.
    #[serde(default = "default_dial_prefix")]
    pub dial_prefix: String,
}

/// Grant continuation poll bounds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PollConfig {
    /// Floor on the wait between continuation calls, in seconds.
    #[serde(default = "default_poll_interval")]
    pub min_interval_secs: u64,

    /// Maximum number of continuation calls.
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,

    /// Maximum wall-clock time for a whole poll, in seconds.
    #[serde(default = "default_poll_deadline")]
    pub overall_deadline_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_poll_interval(),
            max_attempts: default_poll_attempts(),
            overall_deadline_secs: default_poll_deadline(),
        }
    }
}

impl PollConfig {
    /// Converts into the pipeline's poll policy.
    #[must_use]
    pub const fn to_policy(self) -> PollPolicy {
        PollPolicy {
            min_interval: Duration::from_secs(self.min_interval_secs),
            max_attempts: self.max_attempts,
            overall_deadline: Duration::from_secs(self.overall_deadline_secs),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    3000
}

fn default_incoming_ttl() -> u64 {
    30 * 60
}

fn default_sms_endpoint() -> Url {
    Url::parse("https://api.africastalking.com/version1/messaging")
        .expect("valid default SMS endpoint")
}

fn default_dial_prefix() -> String {
    "+27".to_owned()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_attempts() -> u32 {
    12
}

fn default_poll_deadline() -> u64 {
    600
}

impl GatewayConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// After loading, all string values with `$VAR` / `${VAR}` references
    /// are expanded from the process environment. `HOST` and `PORT` env vars
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(Path::new(path))?;
        let mut config = Self::parse(&content)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }

    /// Parses TOML content after environment variable expansion.
    ///
    /// # Errors
    ///
    /// Returns an error if the expanded content is not valid configuration.
    pub fn parse(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let expanded = expand_env_vars(content);
        Ok(toml::from_str(&expanded)?)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is, so payment-pointer sigils in wallet
/// identifiers (`"$pay.example/alice"`) survive expansion unless an
/// environment variable named `pay` exists.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next(); // consume '{'
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                // Leave unresolved variable as-is
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
