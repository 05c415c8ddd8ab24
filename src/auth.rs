//! Pluggable authorization for publish and subscribe requests.
//!
//! The caster consults a single [`Authorizer`] once per inbound request, before
//! any mountpoint is created or joined. Any error rejects the request with
//! `401 Unauthorized` and leaves caster state untouched.
//!
//! Three policies are provided:
//!
//! - [`AllowAll`] accepts everything (development, closed networks)
//! - [`BasicAuth`] checks HTTP Basic credentials against a user table, the
//!   scheme NTRIP clients send by default
//! - [`SignedUrlAuth`] checks an HMAC-SHA256 signature bound to the mountpoint
//!   path and an expiry timestamp
//!
//! # Signed URL scheme
//!
//! ```text
//! signature = HMAC-SHA256(secret_key, "{path}?{canonical_query}")
//! ```
//!
//! The canonical query is every query parameter except `sig`, sorted by key then
//! value, and must contain `exp`:
//!
//! ```text
//! /RTCM3?exp=1735689600&sig=abc123...
//! ```
//!
//! # Example
//!
//! ```rust
//! use ntrip_caster::auth::SignedUrlAuth;
//! use std::time::Duration;
//!
//! let auth = SignedUrlAuth::new("my-secret-key");
//! let (signature, expiry) = auth.sign("/RTCM3", Duration::from_secs(3600));
//! assert!(auth.verify("/RTCM3", &signature, expiry, &[]).is_ok());
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use http::header::AUTHORIZATION;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::form_urlencoded;

use crate::relay::Connection;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Errors
// =============================================================================

/// Reasons a policy rejects a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    /// Authorization header present but not valid Basic credentials
    #[error("Malformed credentials")]
    MalformedCredentials,

    #[error("Invalid credentials for user '{username}'")]
    InvalidCredentials { username: String },

    #[error("Missing signature parameter")]
    MissingSignature,

    #[error("Missing expiry parameter")]
    MissingExpiry,

    #[error("Signature expired at {expired_at} (current time: {current_time})")]
    Expired { expired_at: u64, current_time: u64 },

    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature is not valid hex, or appears more than once
    #[error("Invalid signature format")]
    InvalidSignatureFormat,

    #[error("Invalid expiry format")]
    InvalidExpiryFormat,

    /// Rejected by a custom policy
    #[error("Access denied: {0}")]
    Denied(String),
}

impl AuthError {
    /// Short machine-readable identifier used in error responses.
    pub fn error_type(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MalformedCredentials => "malformed_credentials",
            AuthError::InvalidCredentials { .. } => "invalid_credentials",
            AuthError::MissingSignature => "missing_signature",
            AuthError::MissingExpiry => "missing_expiry",
            AuthError::Expired { .. } => "signature_expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidSignatureFormat => "invalid_signature_format",
            AuthError::InvalidExpiryFormat => "invalid_expiry_format",
            AuthError::Denied(_) => "access_denied",
        }
    }

    /// Whether the rejection looks like tampering or guessing rather than a
    /// client that simply has no or stale credentials.
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials { .. } | AuthError::InvalidSignature
        )
    }
}

// =============================================================================
// Authorizer
// =============================================================================

/// Authorization policy consulted before any protocol action.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Accept or reject the request behind `conn`.
    async fn authorize(&self, conn: &Connection) -> Result<(), AuthError>;
}

#[async_trait]
impl<A: Authorizer + ?Sized> Authorizer for Arc<A> {
    async fn authorize(&self, conn: &Connection) -> Result<(), AuthError> {
        (**self).authorize(conn).await
    }
}

#[async_trait]
impl<A: Authorizer + ?Sized> Authorizer for Box<A> {
    async fn authorize(&self, conn: &Connection) -> Result<(), AuthError> {
        (**self).authorize(conn).await
    }
}

/// Policy that accepts every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _conn: &Connection) -> Result<(), AuthError> {
        Ok(())
    }
}

// =============================================================================
// Basic Authentication
// =============================================================================

/// HTTP Basic authentication against a fixed user table.
#[derive(Clone, Default)]
pub struct BasicAuth {
    users: HashMap<String, String>,
}

impl BasicAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Build a user table from `user:password` entries.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut auth = Self::new();
        for entry in entries {
            let entry = entry.as_ref();
            match entry.split_once(':') {
                Some((user, password)) if !user.is_empty() => {
                    auth.users.insert(user.to_string(), password.to_string());
                }
                _ => return Err(format!("invalid user entry '{}', expected user:password", entry)),
            }
        }
        Ok(auth)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Check a username and password pair.
    pub fn verify(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let expected = self.users.get(username).map(String::as_str).unwrap_or("");
        let matches: bool = expected.as_bytes().ct_eq(password.as_bytes()).into();

        if matches && self.users.contains_key(username) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials {
                username: username.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut users: Vec<&String> = self.users.keys().collect();
        users.sort();
        f.debug_struct("BasicAuth").field("users", &users).finish()
    }
}

/// Extract `(username, password)` from a `Basic` authorization header value.
pub fn parse_basic_credentials(header: &str) -> Result<(String, String), AuthError> {
    let (scheme, encoded) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedCredentials)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::MalformedCredentials);
    }

    let decoded = BASE64
        .decode(encoded.trim())
        .map_err(|_| AuthError::MalformedCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MalformedCredentials)?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthError::MalformedCredentials)?;
    Ok((username.to_string(), password.to_string()))
}

#[async_trait]
impl Authorizer for BasicAuth {
    async fn authorize(&self, conn: &Connection) -> Result<(), AuthError> {
        let header = conn
            .request()
            .headers()
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingCredentials)?
            .to_str()
            .map_err(|_| AuthError::MalformedCredentials)?;

        let (username, password) = parse_basic_credentials(header)?;
        self.verify(&username, &password)
    }
}

// =============================================================================
// Signed URL Authentication
// =============================================================================

/// Signed URL authorizer using HMAC-SHA256.
#[derive(Clone)]
pub struct SignedUrlAuth {
    secret_key: Vec<u8>,
}

impl SignedUrlAuth {
    /// Create a new authorizer with the given secret key.
    ///
    /// The key should be at least 32 bytes.
    pub fn new(secret_key: impl AsRef<[u8]>) -> Self {
        Self {
            secret_key: secret_key.as_ref().to_vec(),
        }
    }

    /// Sign a mountpoint path valid for `ttl`.
    ///
    /// Returns the hex-encoded signature and the expiry timestamp (Unix seconds).
    pub fn sign(&self, path: &str, ttl: Duration) -> (String, u64) {
        self.sign_with_params(path, ttl, &[])
    }

    /// Sign a path with extra query parameters.
    ///
    /// `params` should exclude `exp` and `sig`; those are added automatically.
    pub fn sign_with_params(
        &self,
        path: &str,
        ttl: Duration,
        params: &[(&str, &str)],
    ) -> (String, u64) {
        let expiry = unix_now().saturating_add(ttl.as_secs());
        (self.compute_signature(path, expiry, params), expiry)
    }

    /// Sign a path with a fixed expiry timestamp.
    pub fn sign_with_expiry(&self, path: &str, expiry: u64) -> String {
        self.compute_signature(path, expiry, &[])
    }

    /// Verify a signature for a path, expiry, and extra parameters.
    pub fn verify(
        &self,
        path: &str,
        signature: &str,
        expiry: u64,
        params: &[(&str, &str)],
    ) -> Result<(), AuthError> {
        let current_time = unix_now();
        if current_time > expiry {
            return Err(AuthError::Expired {
                expired_at: expiry,
                current_time,
            });
        }

        let provided = hex::decode(signature).map_err(|_| AuthError::InvalidSignatureFormat)?;
        let expected = self.compute_mac(path, expiry, params);

        if provided.ct_eq(&expected).into() {
            Ok(())
        } else {
            Err(AuthError::InvalidSignature)
        }
    }

    /// Verify the `sig` and `exp` parameters of a raw query string against `path`.
    pub fn verify_query(&self, path: &str, query: &str) -> Result<(), AuthError> {
        let mut signature: Option<String> = None;
        let mut expiry: Option<u64> = None;
        let mut extra_params: Vec<(String, String)> = Vec::new();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if key == "sig" {
                if signature.replace(value.into_owned()).is_some() {
                    return Err(AuthError::InvalidSignatureFormat);
                }
            } else if key == "exp" {
                let parsed = value
                    .parse::<u64>()
                    .map_err(|_| AuthError::InvalidExpiryFormat)?;
                if expiry.replace(parsed).is_some() {
                    return Err(AuthError::InvalidExpiryFormat);
                }
            } else {
                extra_params.push((key.into_owned(), value.into_owned()));
            }
        }

        let signature = signature.ok_or(AuthError::MissingSignature)?;
        let expiry = expiry.ok_or(AuthError::MissingExpiry)?;

        let extra_params: Vec<(&str, &str)> = extra_params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        self.verify(path, &signature, expiry, &extra_params)
    }

    /// Build a complete signed URL, e.g. for handing to an NTRIP client.
    pub fn generate_signed_url(
        &self,
        base_url: &str,
        path: &str,
        ttl: Duration,
        extra_params: &[(&str, &str)],
    ) -> String {
        let expiry = unix_now().saturating_add(ttl.as_secs());
        self.signed_url_with_expiry(base_url, path, expiry, extra_params)
    }

    /// Build a signed URL with a fixed expiry. An empty `base_url` yields
    /// just `path?query`.
    pub fn signed_url_with_expiry(
        &self,
        base_url: &str,
        path: &str,
        expiry: u64,
        extra_params: &[(&str, &str)],
    ) -> String {
        let signature = self.compute_signature(path, expiry, extra_params);

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in extra_params {
            serializer.append_pair(key, value);
        }
        serializer.append_pair("exp", &expiry.to_string());
        serializer.append_pair("sig", &signature);

        format!(
            "{}{}?{}",
            base_url.trim_end_matches('/'),
            path,
            serializer.finish()
        )
    }

    fn compute_signature(&self, path: &str, expiry: u64, params: &[(&str, &str)]) -> String {
        hex::encode(self.compute_mac(path, expiry, params))
    }

    fn compute_mac(&self, path: &str, expiry: u64, params: &[(&str, &str)]) -> Vec<u8> {
        let message = signature_base(path, expiry, params);

        let mut mac =
            HmacSha256::new_from_slice(&self.secret_key).expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

#[async_trait]
impl Authorizer for SignedUrlAuth {
    async fn authorize(&self, conn: &Connection) -> Result<(), AuthError> {
        let request = conn.request();
        self.verify_query(request.path(), request.query().unwrap_or(""))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn signature_base(path: &str, expiry: u64, params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    pairs.push(("exp".to_string(), expiry.to_string()));
    pairs.sort();

    let canonical = pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, canonical)
}
