/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// bcrypt work factor used when none is configured
pub const DEFAULT_PASSWORD_COST: u32 = 12;

/// Lowest work factor bcrypt accepts
pub const MIN_PASSWORD_COST: u32 = 4;

/// Upper bound on access token lifetime, whatever the configuration says
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;

/// Maximum content length accepted from a collaboration frame (256 KiB)
pub const MAX_CONTENT_SIZE: usize = 262_144;

/// Bounded outbound queue per collaboration session
pub const SESSION_OUTBOUND_BUFFER: usize = 256;

/// Default and maximum page size for note listings
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Key derivation context for passphrase-derived content keys (BLAKE3)
pub const KDF_CONTEXT_CONTENT_KEY: &str = "snyc-note-content-key-v1";
