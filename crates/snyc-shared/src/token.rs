use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_TOKEN_TTL_MINUTES;
use crate::error::TokenError;
use crate::types::UserId;

// Token issued at login, presented as a bearer credential or `?token=`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: UserId,
    pub exp: DateTime<Utc>,
}

/// Issues and verifies Ed25519-signed access tokens.
///
/// Wire format: `base64url(claims json) "." base64url(signature)`, the
/// signature covering the encoded claims segment.
#[derive(Clone)]
pub struct TokenSigner {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl TokenSigner {
    pub fn new(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Issue a token for `user`. Lifetimes beyond a year are capped.
    pub fn issue(&self, user: UserId, ttl: Duration) -> String {
        let ttl = ttl.min(Duration::minutes(MAX_TOKEN_TTL_MINUTES));
        self.issue_claims(&AccessClaims {
            sub: user,
            exp: Utc::now() + ttl,
        })
    }

    pub fn issue_claims(&self, claims: &AccessClaims) -> String {
        // Serializing two plain fields cannot fail.
        let json = serde_json::to_vec(claims).unwrap_or_default();
        let payload = B64URL.encode(json);
        let signature = self.signing_key.sign(payload.as_bytes());
        format!("{}.{}", payload, B64URL.encode(signature.to_bytes()))
    }

    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let (payload, sig_b64) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;

        let sig_bytes = B64URL.decode(sig_b64).map_err(|_| TokenError::Malformed)?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| TokenError::Malformed)?;

        self.verifying_key
            .verify(payload.as_bytes(), &signature)
            .map_err(|_| TokenError::BadSignature)?;

        let json = B64URL.decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: AccessClaims =
            serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        if Utc::now() > claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("verifying_key", &hex::encode(self.verifying_key.to_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_valid() {
        let signer = TokenSigner::generate();
        let user = UserId::new();

        let token = signer.issue(user, Duration::minutes(30));
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, user);
    }

    #[test]
    fn test_token_expired() {
        let signer = TokenSigner::generate();
        let token = signer.issue(UserId::new(), Duration::minutes(-1));
        assert_eq!(signer.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_token_wrong_server_key() {
        let issuer = TokenSigner::generate();
        let other = TokenSigner::generate();

        let token = issuer.issue(UserId::new(), Duration::minutes(30));
        assert_eq!(other.verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_token_tampered_claims() {
        let signer = TokenSigner::generate();
        let token = signer.issue(UserId::new(), Duration::minutes(30));
        let (_, sig) = token.split_once('.').unwrap();

        let forged = signer.issue_claims(&AccessClaims {
            sub: UserId::new(),
            exp: Utc::now() + Duration::days(365),
        });
        let (forged_payload, _) = forged.split_once('.').unwrap();

        let spliced = format!("{forged_payload}.{sig}");
        assert_eq!(signer.verify(&spliced), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_token_garbage() {
        let signer = TokenSigner::generate();
        assert_eq!(signer.verify("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(signer.verify(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_huge_ttl_is_capped() {
        let signer = TokenSigner::generate();
        let token = signer.issue(UserId::new(), Duration::minutes(1_000_000_000_000));

        let claims = signer.verify(&token).unwrap();
        let cap = Utc::now() + Duration::minutes(MAX_TOKEN_TTL_MINUTES);
        assert!(claims.exp <= cap);
        assert!(claims.exp > Utc::now() + Duration::days(364));
    }

    #[test]
    fn test_same_secret_verifies() {
        let secret = [7u8; 32];
        let a = TokenSigner::new(&secret);
        let b = TokenSigner::new(&secret);

        let token = a.issue(UserId::new(), Duration::minutes(5));
        assert!(b.verify(&token).is_ok());
    }
}
