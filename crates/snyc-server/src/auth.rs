//! Registration, login and access-token resolution.
//!
//! Tokens only carry the user id. Every request re-reads the user record,
//! so role and tier changes apply immediately and deactivated accounts
//! lose access without waiting for their tokens to expire.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use snyc_shared::password::{hash_password, verify_password};
use snyc_shared::token::TokenSigner;
use snyc_shared::{Principal, Role, SubscriptionTier, UserId};
use snyc_store::{now_micros, StoreError, User};

use crate::api::SharedDb;
use crate::error::ApiError;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Clone)]
pub struct Authenticator {
    db: SharedDb,
    signer: Arc<TokenSigner>,
    ttl: chrono::Duration,
    password_cost: u32,
}

impl Authenticator {
    pub fn new(
        db: SharedDb,
        signer: TokenSigner,
        ttl: chrono::Duration,
        password_cost: u32,
    ) -> Self {
        Self {
            db,
            signer: Arc::new(signer),
            ttl,
            password_cost,
        }
    }

    /// Create a standard, free-tier account.
    pub async fn register(&self, req: RegisterRequest) -> Result<User, ApiError> {
        let email = req.email.trim();
        let username = req.username.trim();

        if !email.contains('@') {
            return Err(ApiError::BadRequest("Invalid email address".into()));
        }
        if username.is_empty() {
            return Err(ApiError::BadRequest("Username must not be empty".into()));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::BadRequest(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let cost = self.password_cost;
        let password = req.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let now = now_micros();
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            username: username.to_string(),
            password_hash,
            role: Role::Standard,
            subscription: SubscriptionTier::Free,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let db = self.db.lock().await;
        match db.insert_user(&user) {
            Ok(()) => {}
            Err(StoreError::Conflict(column)) if column == "email" => {
                return Err(ApiError::BadRequest(
                    "A user with this email already exists.".into(),
                ));
            }
            Err(StoreError::Conflict(column)) if column == "username" => {
                return Err(ApiError::BadRequest(
                    "A user with this username already exists.".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        info!(user = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Exchange credentials for a bearer token.
    pub async fn login(&self, req: LoginRequest) -> Result<TokenResponse, ApiError> {
        let rejected = || ApiError::Unauthorized("Incorrect username or password".into());

        let user = {
            let db = self.db.lock().await;
            match db.get_user_by_username(req.username.trim()) {
                Ok(user) => user,
                Err(e) if e.is_not_found() => return Err(rejected()),
                Err(e) => return Err(e.into()),
            }
        };

        let password = req.password;
        let stored = user.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if !valid || !user.is_active {
            warn!(username = %user.username, "Login rejected");
            return Err(rejected());
        }

        Ok(TokenResponse {
            access_token: self.signer.issue(user.id, self.ttl),
            token_type: "bearer".into(),
        })
    }

    /// Resolve a bearer token to the current stored user.
    pub async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        let claims = self.signer.verify(token).map_err(|e| {
            warn!(error = %e, "Access token rejected");
            ApiError::invalid_credentials()
        })?;

        let db = self.db.lock().await;
        match db.get_user(claims.sub) {
            Ok(user) if user.is_active => Ok(user),
            Ok(user) => {
                warn!(user = %user.id, "Token presented for inactive user");
                Err(ApiError::invalid_credentials())
            }
            Err(e) if e.is_not_found() => {
                warn!(user = %claims.sub, "Token presented for unknown user");
                Err(ApiError::invalid_credentials())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn resolve(&self, token: &str) -> Result<Principal, ApiError> {
        self.current_user(token).await.map(|user| user.principal())
    }

    /// The subject of a correctly signed, unexpired token. Does not touch
    /// the store, so the user may since have been deleted or deactivated.
    pub fn token_subject(&self, token: &str) -> Option<UserId> {
        self.signer.verify(token).ok().map(|claims| claims.sub)
    }
}

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snyc_shared::constants::MIN_PASSWORD_COST;
    use snyc_store::Database;
    use tokio::sync::Mutex;

    fn authenticator() -> (Authenticator, SharedDb) {
        let db: SharedDb = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let auth = Authenticator::new(
            db.clone(),
            TokenSigner::generate(),
            chrono::Duration::minutes(30),
            MIN_PASSWORD_COST,
        );
        (auth, db)
    }

    fn register_req(name: &str) -> RegisterRequest {
        RegisterRequest {
            email: format!("{name}@example.com"),
            username: name.to_string(),
            password: "password123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_login_resolve() {
        let (auth, _) = authenticator();
        let user = auth.register(register_req("alice")).await.unwrap();
        assert_eq!(user.role, Role::Standard);
        assert_eq!(user.subscription, SubscriptionTier::Free);

        let token = auth
            .login(LoginRequest {
                username: "alice".into(),
                password: "password123".into(),
            })
            .await
            .unwrap();
        assert_eq!(token.token_type, "bearer");

        let principal = auth.resolve(&token.access_token).await.unwrap();
        assert_eq!(principal.id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_registration_messages() {
        let (auth, _) = authenticator();
        auth.register(register_req("alice")).await.unwrap();

        let mut same_email = register_req("other");
        same_email.email = "alice@example.com".into();
        let err = auth.register(same_email).await.unwrap_err();
        assert_eq!(err.to_string(), "A user with this email already exists.");

        let mut same_name = register_req("alice");
        same_name.email = "fresh@example.com".into();
        let err = auth.register(same_name).await.unwrap_err();
        assert_eq!(err.to_string(), "A user with this username already exists.");
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let (auth, _) = authenticator();

        let mut short = register_req("bob");
        short.password = "short".into();
        assert!(matches!(
            auth.register(short).await,
            Err(ApiError::BadRequest(_))
        ));

        let mut bad_email = register_req("bob");
        bad_email.email = "bob.example.com".into();
        assert!(matches!(
            auth.register(bad_email).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_look_the_same() {
        let (auth, _) = authenticator();
        auth.register(register_req("alice")).await.unwrap();

        let wrong = auth
            .login(LoginRequest {
                username: "alice".into(),
                password: "nope-nope-nope".into(),
            })
            .await
            .unwrap_err();
        let unknown = auth
            .login(LoginRequest {
                username: "mallory".into(),
                password: "password123".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_tier_change_applies_to_existing_token() {
        let (auth, db) = authenticator();
        let user = auth.register(register_req("carol")).await.unwrap();
        let token = auth.signer.issue(user.id, chrono::Duration::minutes(5));

        assert!(!auth.resolve(&token).await.unwrap().has_premium_access());
        db.lock()
            .await
            .set_subscription(user.id, SubscriptionTier::Premium)
            .unwrap();
        assert!(auth.resolve(&token).await.unwrap().has_premium_access());
    }

    #[tokio::test]
    async fn test_tokens_for_deleted_or_forged_users_fail() {
        let (auth, _) = authenticator();
        let ghost = auth.signer.issue(UserId::new(), chrono::Duration::minutes(5));
        assert!(matches!(
            auth.resolve(&ghost).await,
            Err(ApiError::Unauthorized(_))
        ));

        let foreign = TokenSigner::generate().issue(UserId::new(), chrono::Duration::minutes(5));
        assert!(matches!(
            auth.resolve(&foreign).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_password_is_stored_as_bcrypt() {
        let (auth, db) = authenticator();
        let user = auth.register(register_req("dave")).await.unwrap();
        let stored = db.lock().await.get_user(user.id).unwrap().password_hash;
        assert!(stored.starts_with("$2b$04$"));
        assert!(!stored.contains("password123"));
    }

    #[test]
    fn test_token_subject_checks_signature_only() {
        let (auth, _) = authenticator();
        let id = UserId::new();
        assert_eq!(
            auth.token_subject(&auth.signer.issue(id, chrono::Duration::minutes(5))),
            Some(id)
        );

        let foreign = TokenSigner::generate().issue(id, chrono::Duration::minutes(5));
        assert_eq!(auth.token_subject(&foreign), None);
        assert_eq!(auth.token_subject("garbage"), None);
    }

    #[test]
    fn test_bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
