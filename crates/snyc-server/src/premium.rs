//! Premium entitlement for the v2 surface, plus the admin API that
//! changes tiers and roles.
//!
//! There is no billing integration. An operator holding `ADMIN_TOKEN`
//! grants or revokes premium directly.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::info;

use snyc_shared::{Principal, Role, SubscriptionTier};

use crate::api::AppState;
use crate::auth::bearer_token;
use crate::config::ServerConfig;
use crate::error::ApiError;

/// Authenticate the bearer token, enforce the tier, and hand the
/// [`Principal`] to the handler through request extensions.
pub async fn require_premium(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))?;
    let principal = state.auth.resolve(token).await?;

    check_entitlement(&principal, state.config.premium_required)?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

pub fn check_entitlement(principal: &Principal, premium_required: bool) -> Result<(), ApiError> {
    if premium_required && !principal.has_premium_access() {
        info!(user = %principal.id, "Premium required, access refused");
        return Err(ApiError::premium_required());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Admin API
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubscriptionChange {
    pub email: String,
    pub tier: SubscriptionTier,
}

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminStatusResponse {
    pub version: String,
    pub premium_required: bool,
    pub live_sessions: usize,
    pub live_notes: usize,
    pub uptime_secs: u64,
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ApiError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ApiError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");

    // Constant-time comparison to prevent timing attacks on admin token.
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ApiError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

pub async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ApiError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        premium_required: state.config.premium_required,
        live_sessions: state.registry.session_count(),
        live_notes: state.registry.note_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

pub async fn admin_set_subscription(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SubscriptionChange>,
) -> Result<Json<serde_json::Value>, ApiError> {
    verify_admin_token(&headers, &state.config)?;

    let db = state.db.lock().await;
    let user = db.get_user_by_email(req.email.trim()).map_err(|e| {
        if e.is_not_found() {
            ApiError::UserNotFound
        } else {
            e.into()
        }
    })?;
    db.set_subscription(user.id, req.tier)?;

    info!(user = %user.id, tier = req.tier.as_str(), "Admin changed subscription");
    Ok(Json(serde_json::json!({ "id": user.id, "subscription": req.tier })))
}

pub async fn admin_set_role(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<RoleChange>,
) -> Result<Json<serde_json::Value>, ApiError> {
    verify_admin_token(&headers, &state.config)?;

    let db = state.db.lock().await;
    let user = db.get_user_by_email(req.email.trim()).map_err(|e| {
        if e.is_not_found() {
            ApiError::UserNotFound
        } else {
            e.into()
        }
    })?;
    db.set_role(user.id, req.role)?;

    info!(user = %user.id, role = req.role.as_str(), "Admin changed role");
    Ok(Json(serde_json::json!({ "id": user.id, "role": req.role })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use snyc_shared::UserId;

    fn principal(role: Role, subscription: SubscriptionTier) -> Principal {
        Principal {
            id: UserId::new(),
            role,
            subscription,
        }
    }

    #[test]
    fn test_entitlement_rules() {
        let free = principal(Role::Standard, SubscriptionTier::Free);
        let premium = principal(Role::Standard, SubscriptionTier::Premium);
        let admin = principal(Role::Admin, SubscriptionTier::Free);

        assert!(matches!(
            check_entitlement(&free, true),
            Err(ApiError::Forbidden(_))
        ));
        assert!(check_entitlement(&premium, true).is_ok());
        assert!(check_entitlement(&admin, true).is_ok());
        assert!(check_entitlement(&free, false).is_ok());
    }

    #[test]
    fn test_admin_token_comparison() {
        let config = ServerConfig {
            admin_token: Some("s3cret".into()),
            ..ServerConfig::default()
        };

        let mut headers = HeaderMap::new();
        assert!(verify_admin_token(&headers, &config).is_err());

        headers.insert("authorization", "Bearer s3cre".parse().unwrap());
        assert!(verify_admin_token(&headers, &config).is_err());

        headers.insert("authorization", "Bearer s3cret".parse().unwrap());
        assert!(verify_admin_token(&headers, &config).is_ok());

        let disabled = ServerConfig::default();
        assert!(verify_admin_token(&headers, &disabled).is_err());
    }
}
