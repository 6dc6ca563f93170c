/// Cookie carrying the short-lived access token
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Cookie carrying the long-lived refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Default access token lifetime in seconds (15 minutes)
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 900;

/// Default refresh token lifetime in seconds (7 days)
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Hours a declined invite blocks a new invite between the same pair
pub const DEFAULT_INVITE_COOLDOWN_HOURS: i64 = 24;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 4444;

/// Maximum chat message text size in bytes (16 KiB)
pub const MAX_MESSAGE_TEXT_SIZE: usize = 16 * 1024;

/// Outbound frames buffered per live connection before deliveries are dropped
pub const CONNECTION_BUFFER: usize = 256;

/// Key derivation context (BLAKE3) for stretching a token secret
pub const KDF_CONTEXT_TOKEN_KEY: &str = "hearth-token-signing-key-v1";

/// Password length bounds
pub const PASSWORD_MIN_LEN: usize = 10;
pub const PASSWORD_MAX_LEN: usize = 32;

/// Username length bounds
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;
