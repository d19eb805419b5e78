//! Request budgets for the public API.
//!
//! Callers presenting a correctly signed token are metered per user, so
//! accounts sharing an address do not share a budget. Everyone else is
//! metered by client address. Requests with neither pass unmetered.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use snyc_shared::UserId;

use crate::api::AppState;
use crate::auth::bearer_token;
use crate::config::ServerConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    User(UserId),
    Addr(IpAddr),
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::User(id) => write!(f, "user:{id}"),
            ClientKey::Addr(ip) => write!(f, "addr:{ip}"),
        }
    }
}

/// A burst allowance refilled continuously.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    burst: f64,
    per_second: f64,
}

impl Budget {
    /// A full minute's requests as burst, refilled evenly over the minute.
    pub fn per_minute(requests: u32) -> Self {
        let burst = f64::from(requests.max(1));
        Self {
            burst,
            per_second: burst / 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after: Duration },
}

#[derive(Debug)]
struct Allowance {
    remaining: f64,
    seen: Instant,
}

impl Allowance {
    fn take(&mut self, budget: Budget, now: Instant) -> Decision {
        let elapsed = now.saturating_duration_since(self.seen).as_secs_f64();
        self.seen = now;
        self.remaining = (self.remaining + elapsed * budget.per_second).min(budget.burst);

        if self.remaining >= 1.0 {
            self.remaining -= 1.0;
            return Decision::Allowed;
        }
        let wait = (1.0 - self.remaining) / budget.per_second;
        Decision::Limited {
            retry_after: Duration::from_secs_f64(wait),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    budget: Budget,
    allowances: Arc<Mutex<HashMap<ClientKey, Allowance>>>,
}

impl RateLimiter {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            allowances: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(Budget::per_minute(config.rate_limit_per_minute))
    }

    pub async fn check(&self, key: ClientKey) -> Decision {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: ClientKey, now: Instant) -> Decision {
        let mut allowances = self.allowances.lock().await;
        allowances
            .entry(key)
            .or_insert(Allowance {
                remaining: self.budget.burst,
                seen: now,
            })
            .take(self.budget, now)
    }

    /// Forget clients not seen for `max_idle`. A forgotten client starts
    /// again with a full burst.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let mut allowances = self.allowances.lock().await;
        let before = allowances.len();
        let now = Instant::now();
        allowances.retain(|_, a| now.saturating_duration_since(a.seen) < max_idle);
        let removed = before - allowances.len();
        if removed > 0 {
            debug!(removed, "Purged idle rate limit entries");
        }
    }
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(key) = client_key(&state, &req) else {
        return Ok(next.run(req).await);
    };

    match state.rate_limiter.check(key).await {
        Decision::Allowed => Ok(next.run(req).await),
        Decision::Limited { retry_after } => {
            warn!(client = %key, "Rate limit exceeded");
            Err(ApiError::RateLimited {
                retry_after_secs: retry_after.as_secs_f64().ceil().max(1.0) as u64,
            })
        }
    }
}

fn client_key(state: &AppState, req: &Request) -> Option<ClientKey> {
    bearer_token(req.headers())
        .and_then(|token| state.auth.token_subject(token))
        .map(ClientKey::User)
        .or_else(|| client_addr(req).map(ClientKey::Addr))
}

/// Proxy headers first, then the socket peer.
fn client_addr(req: &Request) -> Option<IpAddr> {
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header("x-real-ip"))
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
}
