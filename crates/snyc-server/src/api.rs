use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use snyc_shared::constants::DEFAULT_PAGE_LIMIT;
use snyc_shared::token::TokenSigner;
use snyc_shared::{NoteId, Principal};
use snyc_store::{Category, Database, Tag, Task, User};

use crate::auth::{bearer_token, Authenticator, LoginRequest, RegisterRequest, TokenResponse};
use crate::collab::{ws::note_socket, ConnectionRegistry, SessionContext};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::notes::{Note, NoteInput, NoteService};
use crate::premium::{admin_set_role, admin_set_subscription, admin_status, require_premium};
use crate::rate_limit::{rate_limit, RateLimiter};
use crate::tasks::{NameInput, TaskInput, TaskService};

/// The single SQLite handle, serialized behind an async mutex.
pub type SharedDb = Arc<Mutex<Database>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: SharedDb,
    pub auth: Authenticator,
    pub notes: NoteService,
    pub tasks: TaskService,
    pub registry: ConnectionRegistry,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        let db: SharedDb = Arc::new(Mutex::new(db));
        let signer = match config.token_signing_key {
            Some(secret) => TokenSigner::new(&secret),
            None => TokenSigner::generate(),
        };

        Self {
            auth: Authenticator::new(
                db.clone(),
                signer,
                config.access_token_ttl(),
                config.password_hash_cost,
            ),
            notes: NoteService::new(db.clone(), config.content_cipher()),
            tasks: TaskService::new(db.clone()),
            registry: ConnectionRegistry::new(),
            rate_limiter: RateLimiter::from_config(&config),
            started_at: Instant::now(),
            config: Arc::new(config),
            db,
        }
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            auth: self.auth.clone(),
            notes: self.notes.clone(),
            registry: self.registry.clone(),
            premium_required: self.config.premium_required,
            idle_timeout: self.config.session_idle_timeout,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let premium = Router::new()
        .route("/notes", get(list_notes).post(create_note))
        .route(
            "/notes/:id",
            get(read_note).put(update_note).delete(delete_note),
        )
        .route("/notes/:id/share", post(share_note))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/:id",
            get(read_task).put(update_task).delete(delete_task),
        )
        .route("/tags", get(list_tags).post(create_tag))
        .route("/categories", get(list_categories).post(create_category))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_premium,
        ));

    let v2 = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/token", post(login))
        .route("/auth/me", get(me))
        // Authenticates from the query string inside the session.
        .route("/notes/ws/:id", get(note_socket))
        .merge(premium)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    // Open task list, no authentication.
    let v1 = Router::new()
        .route("/tasks", get(list_open_tasks).post(create_open_task))
        .route(
            "/tasks/:id",
            get(read_open_task)
                .put(update_open_task)
                .delete(delete_open_task),
        )
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1)
        .nest("/api/v2", v2)
        .route("/admin/status", get(admin_status))
        .route("/admin/subscription", post(admin_set_subscription))
        .route("/admin/role", post(admin_set_role))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Ids that do not parse cannot name a note the caller may see.
pub fn parse_note_id(raw: &str) -> Result<NoteId, ApiError> {
    NoteId::parse(raw).map_err(|_| ApiError::NoteNotFound)
}

fn parse_task_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::TaskNotFound)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

#[derive(Debug, Deserialize)]
struct ShareRequest {
    user_email: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Auth ───

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(state.auth.register(req).await?))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(state.auth.login(req).await?))
}

async fn me(headers: HeaderMap, State(state): State<AppState>) -> Result<Json<User>, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))?;
    Ok(Json(state.auth.current_user(token).await?))
}

// ─── Notes ───

async fn create_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<NoteInput>, JsonRejection>,
) -> Result<Json<Note>, ApiError> {
    let Json(input) = payload?;
    Ok(Json(state.notes.create(&principal, input).await?))
}

async fn list_notes(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    page: Result<Query<Pagination>, QueryRejection>,
) -> Result<Json<Vec<Note>>, ApiError> {
    let Query(page) = page?;
    Ok(Json(
        state
            .notes
            .list(&principal, page.skip, page.limit)
            .await?,
    ))
}

async fn read_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Note>, ApiError> {
    let id = parse_note_id(&id)?;
    Ok(Json(state.notes.get(&principal, id).await?))
}

async fn update_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    payload: Result<Json<NoteInput>, JsonRejection>,
) -> Result<Json<Note>, ApiError> {
    let id = parse_note_id(&id)?;
    let Json(input) = payload?;
    Ok(Json(state.notes.update(&principal, id, input).await?))
}

async fn delete_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Note>, ApiError> {
    let id = parse_note_id(&id)?;
    Ok(Json(state.notes.delete(&principal, id).await?))
}

async fn share_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    payload: Result<Json<ShareRequest>, JsonRejection>,
) -> Result<Json<Note>, ApiError> {
    let id = parse_note_id(&id)?;
    let Json(req) = payload?;
    Ok(Json(
        state.notes.share(&principal, id, &req.user_email).await?,
    ))
}

// ─── Tasks (v1, anonymous) ───

async fn create_open_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(input) = payload?;
    Ok(Json(state.tasks.create(None, input).await?))
}

async fn list_open_tasks(
    State(state): State<AppState>,
    page: Result<Query<Pagination>, QueryRejection>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let Query(page) = page?;
    Ok(Json(state.tasks.list(None, page.skip, page.limit).await?))
}

async fn read_open_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.tasks.get(None, id).await?))
}

async fn update_open_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let Json(input) = payload?;
    Ok(Json(state.tasks.update(None, id, input).await?))
}

async fn delete_open_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.tasks.delete(None, id).await?))
}

// ─── Tasks (v2) ───

async fn create_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(input) = payload?;
    Ok(Json(state.tasks.create(Some(&principal), input).await?))
}

async fn list_tasks(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    page: Result<Query<Pagination>, QueryRejection>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let Query(page) = page?;
    Ok(Json(
        state
            .tasks
            .list(Some(&principal), page.skip, page.limit)
            .await?,
    ))
}

async fn read_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.tasks.get(Some(&principal), id).await?))
}

async fn update_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let Json(input) = payload?;
    Ok(Json(state.tasks.update(Some(&principal), id, input).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.tasks.delete(Some(&principal), id).await?))
}

async fn create_tag(
    State(state): State<AppState>,
    payload: Result<Json<NameInput>, JsonRejection>,
) -> Result<Json<Tag>, ApiError> {
    let Json(input) = payload?;
    Ok(Json(state.tasks.create_tag(input).await?))
}

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>, ApiError> {
    Ok(Json(state.tasks.list_tags().await?))
}

async fn create_category(
    State(state): State<AppState>,
    payload: Result<Json<NameInput>, JsonRejection>,
) -> Result<Json<Category>, ApiError> {
    let Json(input) = payload?;
    Ok(Json(state.tasks.create_category(input).await?))
}

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.tasks.list_categories().await?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
