use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::env;
use tracing::error;

use crate::{
    auth::AuthClaims,
    controller::quick_mod::{QuickModOutcome, QuickModerationController},
    db,
    errors::ApiError,
    manage_settings::{save_moderation_settings, ModerationSettings},
    mod_request::QuickModRequest,
    restore::restore_topics,
    security::SESSION_TOKEN_VAR,
    services::{ForumContext, InMemoryService, ServiceResult},
};

/// Header carrying the anti-forgery token for mutating routes.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[derive(Clone)]
pub struct AppState {
    pub db: Option<PgPool>,
    pub forum: InMemoryService,
    pub settings: ModerationSettings,
    pub scripturl: String,
}

impl AppState {
    pub fn new(db: Option<PgPool>, forum: InMemoryService, settings: ModerationSettings) -> Self {
        Self {
            db,
            forum,
            settings,
            scripturl: env::var("FORUM_SCRIPTURL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000/index.php".into()),
        }
    }

    fn context(&self, claims: &AuthClaims, headers: &HeaderMap) -> ServiceResult<ForumContext> {
        let mut ctx = ForumContext {
            scripturl: self.scripturl.clone(),
            ..Default::default()
        };
        save_moderation_settings(&mut ctx, self.settings)?;
        claims.apply_to(&mut ctx);
        if let Some(token) = headers
            .get(SESSION_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            ctx.post_vars.set(SESSION_TOKEN_VAR, token);
        }
        Ok(ctx)
    }
}

/// Moderation switches from the environment. `RECYCLE_BOARD` turns recycling on.
pub fn settings_from_env() -> ModerationSettings {
    let flag = |key: &str| {
        env::var(key)
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    };
    let recycle_board = env::var("RECYCLE_BOARD")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|board| *board > 0);
    ModerationSettings {
        postmod_active: flag("POSTMOD_ACTIVE"),
        recycle_enable: recycle_board.is_some(),
        recycle_board,
        topic_move_any: flag("TOPIC_MOVE_ANY"),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/moderation/quick", post(quick_moderation))
        .route("/moderation/restore", post(restore))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = match &state.db {
        None => json!({"status": "unconfigured"}),
        Some(pool) => match db::ping(pool).await {
            Ok(()) => json!({"status": "ok"}),
            Err(err) => {
                error!(error = %err, "database connectivity check failed");
                json!({"status": "error", "message": err.to_string()})
            }
        },
    };

    (
        StatusCode::OK,
        Json(json!({
            "service": "ok",
            "db": db_status,
            "timestamp": Utc::now()
        })),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct BoardQuery {
    pub board: Option<i64>,
}

async fn quick_moderation(
    State(state): State<AppState>,
    Query(query): Query<BoardQuery>,
    claims: AuthClaims,
    headers: HeaderMap,
    Json(request): Json<QuickModRequest>,
) -> Result<Json<QuickModOutcome>, ApiError> {
    let mut ctx = state.context(&claims, &headers)?;
    ctx.board_id = query.board.filter(|board| *board > 0);
    let controller = QuickModerationController::new(state.forum.clone());
    let outcome = controller.quick_moderation(&mut ctx, &request)?;
    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
pub struct RestoreRequest {
    #[serde(default)]
    pub topics: Vec<i64>,
}

async fn restore(
    State(state): State<AppState>,
    claims: AuthClaims,
    headers: HeaderMap,
    Json(request): Json<RestoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.context(&claims, &headers)?;
    let restored = restore_topics(&state.forum, &ctx, &request.topics)?;
    Ok(Json(json!({ "status": "ok", "restored": restored })))
}
