//! The HTTP surface.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{self, InvalidHeaderValue};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use pr_pilot_core::Outcome;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::analysis::{Analyst, RiskAssessment, SecurityAssessment};
use crate::session::Session;

/// State shared by every handler.
pub struct AppState {
    pub analyst: Analyst,
    pub session: Session,
    /// Cancelled when the server shuts down. Agent runs use child tokens.
    pub shutdown: CancellationToken,
}

/// A failed request, rendered as `{"error": ...}`.
///
/// Internal failures show the client a fixed message per endpoint and log
/// the detail.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}: {detail}")]
    Internal {
        message: &'static str,
        detail: String,
    },
}

impl ApiError {
    fn internal(message: &'static str, detail: impl ToString) -> Self {
        Self::Internal {
            message,
            detail: detail.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal { message, detail } => {
                error!(%detail, "{message}");
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_owned())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[derive(Deserialize)]
struct ContentRequest {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct AgentRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    context: Option<Value>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    incomplete: Option<&'static str>,
}

impl MessageResponse {
    fn new(message: String) -> Self {
        Self {
            message,
            incomplete: None,
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Builds the router. CORS is only applied when a layer is given.
pub fn router(state: Arc<AppState>, cors: Option<CorsLayer>) -> Router {
    let mut router = Router::new()
        .route("/api/ai/chat", post(chat))
        .route("/api/ai/review", post(review))
        .route("/api/ai/risk", post(risk))
        .route("/api/ai/security", post(security))
        .route("/api/ai/agent", post(agent))
        .with_state(state);
    if let Some(cors) = cors {
        router = router.layer(cors);
    }
    router.layer(TraceLayer::new_for_http())
}

/// Allows `origin` to call the API with credentials.
pub fn cors_layer(origin: &str) -> Result<CorsLayer, InvalidHeaderValue> {
    Ok(CorsLayer::new()
        .allow_origin(HeaderValue::from_str(origin)?)
        .allow_credentials(true)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]))
}

/// Serves until `shutdown` is cancelled, then waits for in-flight requests.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

fn required<'a>(
    field: &'a Option<String>,
    message: &str,
) -> Result<&'a str, ApiError> {
    match field.as_deref() {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ApiError::BadRequest(message.to_owned())),
    }
}

async fn chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ContentRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(body) = body?;
    let content = required(&body.content, "Content is required")?;
    let message = state
        .analyst
        .chat(content)
        .await
        .map_err(|err| ApiError::internal("Failed to get AI response", err))?;
    Ok(Json(MessageResponse::new(message)))
}

async fn review(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ContentRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(body) = body?;
    let diff = required(&body.content, "Content (diff) is required")?;
    let message = state
        .analyst
        .review(diff)
        .await
        .map_err(|err| ApiError::internal("Failed to generate review", err))?;
    Ok(Json(MessageResponse::new(message)))
}

async fn risk(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ContentRequest>, JsonRejection>,
) -> ApiResult<RiskAssessment> {
    let Json(body) = body?;
    let diff = required(&body.content, "Content (diff) is required")?;
    let assessment = state
        .analyst
        .assess_risk(diff)
        .await
        .map_err(|err| ApiError::internal("Failed to assess risk", err))?;
    Ok(Json(assessment))
}

async fn security(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ContentRequest>, JsonRejection>,
) -> ApiResult<SecurityAssessment> {
    let Json(body) = body?;
    let diff = required(&body.content, "Content (diff) is required")?;
    let assessment =
        state.analyst.detect_security(diff).await.map_err(|err| {
            ApiError::internal("Failed to detect security issues", err)
        })?;
    Ok(Json(assessment))
}

async fn agent(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AgentRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(body) = body?;
    let query = required(&body.query, "Query is required")?;

    let cancel = state.shutdown.child_token();
    let completion = state
        .session
        .ask(query, body.context.as_ref(), &cancel)
        .await
        .map_err(|err| ApiError::internal("Agent encountered an error", err))?;

    let resp = match completion.outcome {
        Outcome::Answer(message) => MessageResponse::new(message),
        Outcome::Inconclusive(reason) => MessageResponse {
            message: format!(
                "I stopped before finishing this request ({reason}). Please \
                 try again or narrow it down."
            ),
            incomplete: Some(reason.as_str()),
        },
    };
    Ok(Json(resp))
}
