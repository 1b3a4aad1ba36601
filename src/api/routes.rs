//! REST endpoints for the assistant.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::error::Error;
use crate::onboarding::extract::find_url;
use crate::onboarding::prompts::{AVAILABLE_ACTIONS, WELCOME};
use crate::onboarding::{ConversationStatus, Profile, StageMachine};
use crate::orchestrator::Orchestrator;
use crate::session::SessionHistory;
use crate::store::Database;
use crate::website::WebsiteAnalyzer;

const GENERIC_FAILURE: &str = "عذراً، حدث خطأ أثناء معالجة رسالتك. يرجى المحاولة مرة أخرى.";
const PROFILE_REQUIRED: &str = "يرجى إكمال ملفك الشخصي أولاً";
const PROFILE_REQUIRED_DETAIL: &str = "دعني أتعرف عليك أكثر قبل تحليل المواقع";
const RESET_DONE: &str = "تم إعادة تعيين ملفك الشخصي";
const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub machine: Arc<StageMachine>,
    pub orchestrator: Arc<Orchestrator>,
    pub analyzer: Arc<WebsiteAnalyzer>,
    pub sessions: Arc<SessionHistory>,
}

/// Build the API router. Any origin may call it.
pub fn api_routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/profile/{user_id}", get(get_profile))
        .route("/chat", post(chat))
        .route("/analyze-website", post(analyze_website))
        .route("/reset-profile/{user_id}", post(reset_profile))
        .route("/history/{user_id}", get(history))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    warn!("Request failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE)
}

/// Stage fields of a status, without the profile.
#[derive(Serialize)]
struct StatusView {
    stage: String,
    profile_complete: bool,
    next_question: Option<String>,
}

impl From<&ConversationStatus> for StatusView {
    fn from(status: &ConversationStatus) -> Self {
        Self {
            stage: status.stage.to_string(),
            profile_complete: status.profile_complete,
            next_question: status.next_question.clone(),
        }
    }
}

// ── Root ────────────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": WELCOME,
        "available_actions": AVAILABLE_ACTIONS,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Profile ─────────────────────────────────────────────────────────────

async fn get_profile(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.machine.status(&user_id).await {
        Ok(status) => Json(serde_json::json!({
            "user_id": user_id,
            "conversation_status": StatusView::from(&status),
            "profile": status.profile,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Chat ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    user_id: String,
    message: String,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    let ChatRequest { user_id, message } = body;

    let profile = match state.db.get_profile(&user_id).await {
        Ok(profile) => profile.filter(Profile::is_complete),
        Err(e) => return internal_error(e),
    };

    // A link from a user with a complete profile gets a direct site report.
    let url = profile.as_ref().and_then(|_| find_url(&message));
    let response = match url {
        Some(url) => {
            info!(user_id = %user_id, url = %url, "Analyzing website from chat");
            let data = state.analyzer.analyze(&url).await;
            state.analyzer.summarize(&data, profile.as_ref()).await
        }
        None => {
            let history = state.sessions.get(&user_id).await;
            match state.orchestrator.respond(&user_id, &message, &history).await {
                Ok(response) => response,
                Err(Error::Llm(e)) => {
                    warn!(user_id = %user_id, "Chat reply failed: {}", e);
                    return error_response(StatusCode::BAD_GATEWAY, GENERIC_FAILURE);
                }
                Err(e) => return internal_error(e),
            }
        }
    };

    state.sessions.append(&user_id, &message, &response).await;
    if let Err(e) = state
        .db
        .log_chat(&user_id, &message, &response, Utc::now())
        .await
    {
        warn!(user_id = %user_id, "Failed to persist chat log: {}", e);
    }

    let status = match state.machine.status(&user_id).await {
        Ok(status) => status,
        Err(e) => return internal_error(e),
    };

    Json(serde_json::json!({
        "response": response,
        "history": state.sessions.get(&user_id).await,
        "profile_complete": status.profile_complete,
        "conversation_status": StatusView::from(&status),
    }))
    .into_response()
}

// ── Website analysis ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AnalyzeRequest {
    user_id: String,
    url: String,
}

async fn analyze_website(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequest>,
) -> Response {
    let profile = match state.db.get_profile(&body.user_id).await {
        Ok(Some(profile)) if profile.is_complete() => profile,
        Ok(_) => {
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "error": PROFILE_REQUIRED,
                    "message": PROFILE_REQUIRED_DETAIL,
                })),
            )
                .into_response();
        }
        Err(e) => return internal_error(e),
    };

    let data = state.analyzer.analyze(&body.url).await;
    let report = state.analyzer.summarize(&data, Some(&profile)).await;

    let request_text = format!("تحليل موقع: {}", body.url);
    if let Err(e) = state
        .db
        .log_chat(&body.user_id, &request_text, &report, Utc::now())
        .await
    {
        warn!(user_id = %body.user_id, "Failed to persist analysis log: {}", e);
    }

    Json(serde_json::json!({
        "website_data": data,
        "analysis_report": report,
        "user_id": body.user_id,
        "user_profile": profile,
    }))
    .into_response()
}

// ── Reset ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum ResetMode {
    #[default]
    Soft,
    Hard,
}

#[derive(Deserialize)]
struct ResetQuery {
    #[serde(default)]
    mode: ResetMode,
}

async fn reset_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ResetQuery>,
) -> Response {
    let result = match query.mode {
        ResetMode::Soft => state.machine.soft_reset(&user_id).await,
        ResetMode::Hard => state.machine.hard_reset(&user_id).await,
    };
    if let Err(e) = result {
        return internal_error(e);
    }
    state.sessions.clear(&user_id).await;

    Json(serde_json::json!({
        "message": RESET_DONE,
        "user_id": user_id,
        "mode": query.mode,
    }))
    .into_response()
}

// ── History ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    match state.db.recent_chats(&user_id, limit).await {
        Ok(chats) => Json(serde_json::json!({
            "user_id": user_id,
            "chats": chats,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}
