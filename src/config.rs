//! Configuration management for the caster.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `NTRIP_` prefix
//! - Sensible defaults for all optional settings
//!
//! Running the binary without a subcommand is the same as `serve`.
//!
//! # Environment Variables
//!
//! - `NTRIP_HOST` - Server bind address (default: 0.0.0.0)
//! - `NTRIP_PORT` - Plain HTTP port (default: 2101)
//! - `NTRIP_TLS_PORT` - TLS port (optional, needs cert and key)
//! - `NTRIP_TLS_CERT` - PEM certificate chain
//! - `NTRIP_TLS_KEY` - PEM private key
//! - `NTRIP_TIMEOUT` - Per-operation timeout in seconds (default: 5)
//! - `NTRIP_CONDUIT_CAPACITY` - Buffered chunks per connection (default: 64)
//! - `NTRIP_AUTH` - Authorization mode: none, basic, signed (default: none)
//! - `NTRIP_USERS` - Comma-separated `user:password` pairs for basic auth
//! - `NTRIP_AUTH_SECRET` - HMAC secret for signed URLs

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::auth::{AllowAll, Authorizer, BasicAuth, SignedUrlAuth};
use crate::relay::DEFAULT_CONDUIT_CAPACITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default NTRIP port.
pub const DEFAULT_PORT: u16 = 2101;

/// Default per-operation timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default signed URL lifetime in seconds.
pub const DEFAULT_SIGN_TTL: u64 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// NTRIP caster - relays GNSS correction streams from sources to clients.
#[derive(Parser, Debug, Clone)]
#[command(name = "ntrip-caster")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// Resolve the command to run, defaulting to `serve`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the caster (default)
    Serve(ServeConfig),

    /// Generate a signed mountpoint URL for `--auth signed`
    Sign(SignConfig),
}

/// How the caster decides whether a request may proceed.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Accept every request
    #[default]
    None,
    /// HTTP Basic credentials checked against `--users`
    Basic,
    /// HMAC-signed URLs keyed by `--auth-secret`
    Signed,
}

// =============================================================================
// Serve Configuration
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the listeners to.
    #[arg(long, default_value = DEFAULT_HOST, env = "NTRIP_HOST")]
    pub host: String,

    /// Plain HTTP port.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "NTRIP_PORT")]
    pub port: u16,

    /// TLS port. Requires --tls-cert and --tls-key.
    #[arg(long, env = "NTRIP_TLS_PORT")]
    pub tls_port: Option<u16>,

    /// PEM certificate chain for the TLS listener.
    #[arg(long, env = "NTRIP_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the TLS listener.
    #[arg(long, env = "NTRIP_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Per-operation timeout in seconds (source reads, subscriber writes,
    /// TLS handshakes).
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "NTRIP_TIMEOUT")]
    pub timeout: u64,

    /// Chunks buffered per connection before writers wait.
    #[arg(long, default_value_t = DEFAULT_CONDUIT_CAPACITY, env = "NTRIP_CONDUIT_CAPACITY")]
    pub conduit_capacity: usize,

    /// Authorization mode.
    #[arg(long, value_enum, default_value_t = AuthMode::None, env = "NTRIP_AUTH")]
    pub auth: AuthMode,

    /// Basic auth users as comma-separated `user:password` pairs.
    #[arg(long, env = "NTRIP_USERS", value_delimiter = ',')]
    pub users: Vec<String>,

    /// Secret key for HMAC-SHA256 signed URLs.
    #[arg(long, env = "NTRIP_AUTH_SECRET")]
    pub auth_secret: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout == 0 {
            return Err("--timeout must be greater than 0".to_string());
        }

        if self.conduit_capacity == 0 {
            return Err("--conduit-capacity must be greater than 0".to_string());
        }

        let tls_parts = [
            self.tls_port.is_some(),
            self.tls_cert.is_some(),
            self.tls_key.is_some(),
        ];
        if tls_parts.iter().any(|&set| set) && !tls_parts.iter().all(|&set| set) {
            return Err(
                "TLS needs --tls-port, --tls-cert and --tls-key together \
                 (or NTRIP_TLS_PORT, NTRIP_TLS_CERT, NTRIP_TLS_KEY)"
                    .to_string(),
            );
        }

        if self.tls_port.is_some() && self.tls_port == Some(self.port) {
            return Err("--tls-port must differ from --port".to_string());
        }

        match self.auth {
            AuthMode::None => {}
            AuthMode::Basic => {
                if self.users.is_empty() {
                    return Err(
                        "--auth basic needs at least one --users user:password entry".to_string(),
                    );
                }
                BasicAuth::from_entries(&self.users).map(|_| ())?;
            }
            AuthMode::Signed => {
                if self.auth_secret.as_deref().map_or(true, str::is_empty) {
                    return Err(
                        "--auth signed needs a secret. Set --auth-secret or NTRIP_AUTH_SECRET"
                            .to_string(),
                    );
                }
            }
        }

        Ok(())
    }

    /// Plain HTTP bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// TLS bind address as "host:port", if TLS is configured.
    pub fn tls_bind_address(&self) -> Option<String> {
        self.tls_port.map(|port| format!("{}:{}", self.host, port))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Build the authorizer selected by `--auth` (call validate() first).
    pub fn build_authorizer(&self) -> Result<Box<dyn Authorizer>, String> {
        match self.auth {
            AuthMode::None => Ok(Box::new(AllowAll)),
            AuthMode::Basic => Ok(Box::new(BasicAuth::from_entries(&self.users)?)),
            AuthMode::Signed => {
                let secret = self
                    .auth_secret
                    .as_deref()
                    .ok_or_else(|| "--auth signed needs --auth-secret".to_string())?;
                Ok(Box::new(SignedUrlAuth::new(secret)))
            }
        }
    }
}

// =============================================================================
// Sign Configuration
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct SignConfig {
    /// Secret key shared with the caster's --auth-secret.
    #[arg(long, env = "NTRIP_AUTH_SECRET")]
    pub secret: String,

    /// Mountpoint path to sign, e.g. /RTCM3.
    #[arg(long)]
    pub path: String,

    /// Signature lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_SIGN_TTL)]
    pub ttl: u64,

    /// Base URL of the caster, e.g. http://caster.example.com:2101
    #[arg(long)]
    pub base_url: Option<String>,

    /// Extra query parameters to include in the signature (`key=value`).
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = SignOutputFormat::Url)]
    pub format: SignOutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutputFormat {
    /// Only the hex signature
    Signature,
    /// JSON object with signature, expiry and URL
    Json,
    /// Signed path or URL
    Url,
}

impl SignConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("--secret must not be empty".to_string());
        }
        if !self.path.starts_with('/') {
            return Err(format!("--path must start with '/': {}", self.path));
        }
        if self.ttl == 0 {
            return Err("--ttl must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Parse `--param key=value` entries.
    pub fn parse_params(&self) -> Result<Vec<(String, String)>, String> {
        self.params
            .iter()
            .map(|param| match param.split_once('=') {
                Some((key, _)) if key.is_empty() => {
                    Err(format!("parameter has an empty key: {}", param))
                }
                Some(("sig" | "exp", _)) => {
                    Err(format!("parameter name is reserved: {}", param))
                }
                Some((key, value)) => Ok((key.to_string(), value.to_string())),
                None => Err(format!("parameter must be key=value: {}", param)),
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
