//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use hearth_shared::constants::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_HTTP_PORT, DEFAULT_INVITE_COOLDOWN_HOURS,
    DEFAULT_REFRESH_TOKEN_TTL_SECS,
};
use hearth_shared::token::{TokenPolicy, TokenService};

/// Ten years; keeps token expiry arithmetic far from overflow.
const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;
const MAX_INVITE_COOLDOWN_HOURS: i64 = 10 * 365 * 24;
const MAX_KEEPALIVE_SECS: u64 = 60 * 60;

/// Where the token signing key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenSecret {
    /// Raw 32-byte Ed25519 seed (64 hex chars).
    Seed([u8; 32]),
    /// Any other string, stretched with BLAKE3.
    Passphrase(String),
    /// Nothing configured: a random key per process.
    Ephemeral,
}

impl std::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seed(_) => f.write_str("Seed(..)"),
            Self::Passphrase(_) => f.write_str("Passphrase(..)"),
            Self::Ephemeral => f.write_str("Ephemeral"),
        }
    }
}

impl TokenSecret {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::Ephemeral;
        }
        match parse_hex_seed(raw) {
            Ok(seed) => Self::Seed(seed),
            Err(_) => Self::Passphrase(raw.to_string()),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:4444`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory (`None` here).
    pub database_path: Option<PathBuf>,

    /// Env: `TOKEN_SECRET`
    pub token_secret: TokenSecret,

    /// Env: `ACCESS_TOKEN_TTL_SECS`
    pub access_token_ttl_secs: i64,

    /// Env: `REFRESH_TOKEN_TTL_SECS`
    pub refresh_token_ttl_secs: i64,

    /// Set the `Secure` flag on token cookies.
    /// Env: `COOKIE_SECURE` (true/false)
    /// Default: `false`
    pub cookie_secure: bool,

    /// Single browser origin allowed to call the API with credentials.
    /// Env: `CORS_ORIGIN`
    pub cors_origin: String,

    /// How long a declined invite blocks a new one between the same pair.
    /// Env: `INVITE_COOLDOWN_HOURS`
    pub invite_cooldown_hours: i64,

    /// WebSocket ping interval.
    /// Env: `KEEPALIVE_SECS`
    pub keepalive_secs: u64,

    /// Per-IP token bucket on `/api/auth/*`.
    /// Env: `AUTH_RATE_PER_SEC`, `AUTH_RATE_BURST`
    pub auth_rate_per_sec: f64,
    pub auth_rate_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            token_secret: TokenSecret::Ephemeral,
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_secs: DEFAULT_REFRESH_TOKEN_TTL_SECS,
            cookie_secure: false,
            cors_origin: "http://localhost:4200".to_string(),
            invite_cooldown_hours: DEFAULT_INVITE_COOLDOWN_HOURS,
            keepalive_secs: 30,
            auth_rate_per_sec: 1.0,
            auth_rate_burst: 10.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary
    /// source, so tests never touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(secret) = lookup("TOKEN_SECRET") {
            config.token_secret = TokenSecret::parse(&secret);
        }

        parse_into(&lookup, "ACCESS_TOKEN_TTL_SECS", &mut config.access_token_ttl_secs);
        parse_into(&lookup, "REFRESH_TOKEN_TTL_SECS", &mut config.refresh_token_ttl_secs);

        if let Some(val) = lookup("COOKIE_SECURE") {
            config.cookie_secure = val == "true" || val == "1";
        }

        if let Some(origin) = lookup("CORS_ORIGIN") {
            config.cors_origin = origin;
        }

        parse_into(&lookup, "INVITE_COOLDOWN_HOURS", &mut config.invite_cooldown_hours);
        parse_into(&lookup, "KEEPALIVE_SECS", &mut config.keepalive_secs);
        parse_into(&lookup, "AUTH_RATE_PER_SEC", &mut config.auth_rate_per_sec);
        parse_into(&lookup, "AUTH_RATE_BURST", &mut config.auth_rate_burst);

        let defaults = Self::default();
        ensure_range(
            "ACCESS_TOKEN_TTL_SECS",
            &mut config.access_token_ttl_secs,
            1..=MAX_TOKEN_TTL_SECS,
            defaults.access_token_ttl_secs,
        );
        ensure_range(
            "REFRESH_TOKEN_TTL_SECS",
            &mut config.refresh_token_ttl_secs,
            1..=MAX_TOKEN_TTL_SECS,
            defaults.refresh_token_ttl_secs,
        );
        ensure_range(
            "INVITE_COOLDOWN_HOURS",
            &mut config.invite_cooldown_hours,
            0..=MAX_INVITE_COOLDOWN_HOURS,
            defaults.invite_cooldown_hours,
        );
        ensure_range(
            "KEEPALIVE_SECS",
            &mut config.keepalive_secs,
            1..=MAX_KEEPALIVE_SECS,
            defaults.keepalive_secs,
        );
        if !(config.auth_rate_per_sec.is_finite() && config.auth_rate_per_sec > 0.0) {
            tracing::warn!(
                value = config.auth_rate_per_sec,
                "AUTH_RATE_PER_SEC must be positive, using default"
            );
            config.auth_rate_per_sec = defaults.auth_rate_per_sec;
        }
        if !(config.auth_rate_burst.is_finite() && config.auth_rate_burst >= 1.0) {
            tracing::warn!(
                value = config.auth_rate_burst,
                "AUTH_RATE_BURST must be at least 1, using default"
            );
            config.auth_rate_burst = defaults.auth_rate_burst;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            access_ttl: chrono::Duration::seconds(self.access_token_ttl_secs),
            refresh_ttl: chrono::Duration::seconds(self.refresh_token_ttl_secs),
        }
    }

    /// Build the token service from the configured secret.
    pub fn token_service(&self) -> TokenService {
        let policy = self.token_policy();
        match &self.token_secret {
            TokenSecret::Seed(seed) => TokenService::from_seed(seed, policy),
            TokenSecret::Passphrase(secret) => TokenService::from_passphrase(secret, policy),
            TokenSecret::Ephemeral => {
                tracing::warn!(
                    "TOKEN_SECRET not set, using an ephemeral key; sessions will not survive a restart"
                );
                TokenService::ephemeral(policy)
            }
        }
    }

    pub fn invite_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.invite_cooldown_hours)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
        }
    }
}

fn ensure_range<T>(key: &str, slot: &mut T, range: RangeInclusive<T>, default: T)
where
    T: PartialOrd + Copy + Display,
{
    if !range.contains(&*slot) {
        tracing::warn!(
            key,
            value = %slot,
            min = %range.start(),
            max = %range.end(),
            "Value out of range, using default"
        );
        *slot = default;
    }
}

/// Parse a 64-character hex string into a 32-byte seed.
fn parse_hex_seed(raw: &str) -> Result<[u8; 32], String> {
    if raw.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", raw.len()));
    }
    let bytes = hex::decode(raw).map_err(|e| format!("invalid hex: {e}"))?;
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&bytes);
    Ok(seed)
}
