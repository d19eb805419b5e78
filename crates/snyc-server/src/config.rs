//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use snyc_shared::constants::{DEFAULT_PASSWORD_COST, MAX_TOKEN_TTL_MINUTES, MIN_PASSWORD_COST};
use snyc_shared::crypto::SymmetricKey;

/// bcrypt rejects work factors above this.
const MAX_PASSWORD_COST: u32 = 31;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    InvalidKey { var: &'static str, reason: String },
}

/// Passphrase behind the development content key. Never use in production.
const DEV_CONTENT_PASSPHRASE: &str = "snyc-development-content-key";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./snyc.db`
    pub database_path: PathBuf,

    /// Process-wide key for encrypted note content (hex-encoded, 64 chars).
    /// Env: `CONTENT_ENCRYPTION_KEY`
    /// Default: `None`, meaning a fixed development key derived from a
    /// passphrase.
    pub content_key: Option<SymmetricKey>,

    /// Ed25519 secret for access tokens (hex-encoded, 64 chars).
    /// Env: `TOKEN_SIGNING_KEY`
    /// Default: `None`, meaning a random key per process; tokens do not
    /// survive a restart.
    pub token_signing_key: Option<[u8; 32]>,

    /// Access token lifetime in minutes.
    /// Env: `ACCESS_TOKEN_EXPIRE_MINUTES`
    /// Default: `30`, capped at one year.
    pub access_token_expire_minutes: i64,

    /// bcrypt work factor for new password hashes.
    /// Env: `PASSWORD_HASH_COST` (4..=31)
    /// Default: `12`
    pub password_hash_cost: u32,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Whether `/api/v2` requires a premium subscription.
    /// Self-hosted admins can disable this to grant full access to all users.
    /// Env: `PREMIUM_REQUIRED` (true/false)
    /// Default: `true`
    pub premium_required: bool,

    /// Per-IP request budget for `/api/v2`.
    /// Env: `RATE_LIMIT_PER_MINUTE`
    /// Default: `60`
    pub rate_limit_per_minute: u32,

    /// A joined collaboration session that receives nothing for this long
    /// is closed.
    /// Env: `SESSION_IDLE_TIMEOUT_SECS`
    /// Default: `300`
    pub session_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: PathBuf::from("./snyc.db"),
            content_key: None,
            token_signing_key: None,
            access_token_expire_minutes: 30,
            password_hash_cost: DEFAULT_PASSWORD_COST,
            admin_token: None,
            premium_required: true,
            rate_limit_per_minute: 60,
            session_idle_timeout: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup.
    ///
    /// Unparseable tunables fall back to their default with a warning.
    /// A key that is set but malformed is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        config.content_key = read_key(&lookup, "CONTENT_ENCRYPTION_KEY")?;
        if config.content_key.is_none() {
            tracing::warn!("CONTENT_ENCRYPTION_KEY not set, using development key");
        }

        config.token_signing_key = read_key(&lookup, "TOKEN_SIGNING_KEY")?;
        if config.token_signing_key.is_none() {
            tracing::warn!("TOKEN_SIGNING_KEY not set, generating an ephemeral key");
        }

        if let Some(val) = lookup("ACCESS_TOKEN_EXPIRE_MINUTES") {
            match val.parse::<i64>() {
                Ok(n) if n > MAX_TOKEN_TTL_MINUTES => {
                    tracing::warn!(
                        value = n,
                        max = MAX_TOKEN_TTL_MINUTES,
                        "ACCESS_TOKEN_EXPIRE_MINUTES too large, clamping"
                    );
                    config.access_token_expire_minutes = MAX_TOKEN_TTL_MINUTES;
                }
                Ok(n) if n > 0 => config.access_token_expire_minutes = n,
                _ => tracing::warn!(value = %val, "Invalid ACCESS_TOKEN_EXPIRE_MINUTES, using default"),
            }
        }

        if let Some(val) = lookup("PASSWORD_HASH_COST") {
            match val.parse::<u32>() {
                Ok(n) if (MIN_PASSWORD_COST..=MAX_PASSWORD_COST).contains(&n) => {
                    config.password_hash_cost = n
                }
                _ => tracing::warn!(value = %val, "Invalid PASSWORD_HASH_COST, using default"),
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("PREMIUM_REQUIRED") {
            config.premium_required = parse_flag(&val);
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_MINUTE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.rate_limit_per_minute = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_MINUTE, using default"),
            }
        }

        if let Some(val) = lookup("SESSION_IDLE_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.session_idle_timeout = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid SESSION_IDLE_TIMEOUT_SECS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        Ok(config)
    }

    /// The content key to use, falling back to the development key.
    pub fn content_cipher(&self) -> snyc_shared::crypto::ContentCipher {
        match self.content_key {
            Some(key) => snyc_shared::crypto::ContentCipher::new(key),
            None => snyc_shared::crypto::ContentCipher::from_passphrase(DEV_CONTENT_PASSPHRASE),
        }
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.access_token_expire_minutes.min(MAX_TOKEN_TTL_MINUTES))
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("content_key", &self.content_key.map(|_| "<set>"))
            .field("token_signing_key", &self.token_signing_key.map(|_| "<set>"))
            .field("access_token_expire_minutes", &self.access_token_expire_minutes)
            .field("password_hash_cost", &self.password_hash_cost)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<set>"))
            .field("premium_required", &self.premium_required)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .finish()
    }
}

/// `None` when unset or blank; an error when set to anything but 64 hex chars.
fn read_key<F>(lookup: &F, var: &'static str) -> Result<Option<[u8; 32]>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => parse_hex_key(&raw)
            .map(Some)
            .map_err(|reason| ConfigError::InvalidKey { var, reason }),
        _ => Ok(None),
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_key(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = load(&[]).unwrap();
        assert!(config.content_key.is_none());
        assert!(config.token_signing_key.is_none());
        assert_eq!(config.access_token_expire_minutes, 30);
        assert_eq!(config.password_hash_cost, DEFAULT_PASSWORD_COST);
    }

    #[test]
    fn test_valid_keys_are_loaded() {
        let config = load(&[
            ("CONTENT_ENCRYPTION_KEY", "ab".repeat(32).as_str()),
            ("TOKEN_SIGNING_KEY", "cd".repeat(32).as_str()),
        ])
        .unwrap();
        assert_eq!(config.content_key, Some([0xab; 32]));
        assert_eq!(config.token_signing_key, Some([0xcd; 32]));
    }

    #[test]
    fn test_malformed_content_key_is_an_error() {
        let err = load(&[("CONTENT_ENCRYPTION_KEY", "not-hex")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidKey { var: "CONTENT_ENCRYPTION_KEY", .. }
        ));

        let err = load(&[("TOKEN_SIGNING_KEY", "zz".repeat(32).as_str())]).unwrap_err();
        assert!(err.to_string().contains("TOKEN_SIGNING_KEY"));
    }

    #[test]
    fn test_token_lifetime_is_clamped() {
        let config = load(&[("ACCESS_TOKEN_EXPIRE_MINUTES", "9223372036854775807")]).unwrap();
        assert_eq!(config.access_token_expire_minutes, MAX_TOKEN_TTL_MINUTES);
        // Must not panic.
        assert_eq!(
            config.access_token_ttl(),
            chrono::Duration::minutes(MAX_TOKEN_TTL_MINUTES)
        );

        let config = load(&[("ACCESS_TOKEN_EXPIRE_MINUTES", "-5")]).unwrap();
        assert_eq!(config.access_token_expire_minutes, 30);
    }

    #[test]
    fn test_password_cost_bounds() {
        assert_eq!(load(&[("PASSWORD_HASH_COST", "10")]).unwrap().password_hash_cost, 10);
        assert_eq!(
            load(&[("PASSWORD_HASH_COST", "2")]).unwrap().password_hash_cost,
            DEFAULT_PASSWORD_COST
        );
        assert_eq!(
            load(&[("PASSWORD_HASH_COST", "40")]).unwrap().password_hash_cost,
            DEFAULT_PASSWORD_COST
        );
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.premium_required);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.access_token_ttl(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_parse_hex_key() {
        let hex = "ab".repeat(32);
        let key = parse_hex_key(&hex).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_key_wrong_length() {
        assert!(parse_hex_key("abcd").is_err());
        assert!(parse_hex_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_flags() {
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
        assert!(parse_flag("true"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = ServerConfig {
            admin_token: Some("hunter2".into()),
            content_key: Some([1u8; 32]),
            ..ServerConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<set>"));
    }

    #[test]
    fn test_dev_cipher_is_stable() {
        let a = ServerConfig::default().content_cipher();
        let b = ServerConfig::default().content_cipher();
        let sealed = a.encrypt_content("hello").unwrap();
        assert_eq!(b.decrypt_content(&sealed).unwrap(), "hello");
    }
}
