use crate::dispatcher::{ActionDispatcher, CreateInterview};
use crate::error::ActionError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use interview_core::interview::Interview;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub type AppState = Arc<ActionDispatcher>;

/// Builds the HTTP surface: health, creation, read and the action dispatcher.
pub fn router(dispatcher: ActionDispatcher) -> Router {
    // Browser clients and the voice service call back from other origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/interviews", post(create_interview))
        .route(
            "/api/interview/{id}",
            get(get_interview).post(dispatch_action),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(dispatcher))
}

async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "online" }))
}

async fn create_interview(
    State(dispatcher): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ActionError> {
    let Json(body) = body?;
    let request: CreateInterview = serde_json::from_value(body)
        .map_err(|e| ActionError::Validation(format!("Invalid interview request: {e}")))?;
    let interview = dispatcher.create(request).await?;
    Ok(Json(json!({
        "success": true,
        "interviewId": interview.id,
        "questions": interview.questions,
    })))
}

async fn get_interview(
    State(dispatcher): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Interview>, ActionError> {
    Ok(Json(dispatcher.load(&id).await?))
}

async fn dispatch_action(
    State(dispatcher): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ActionError> {
    let Json(body) = body?;
    Ok(Json(dispatcher.dispatch(&id, &body).await?))
}
