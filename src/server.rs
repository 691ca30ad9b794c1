use crate::completion::{CompletionOutcome, Gateway};
use crate::error::GatewayError;
use crate::translate::anthropic_types::MessagesRequest;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub gateway: Gateway,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_request(body: &Bytes) -> Result<MessagesRequest, GatewayError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "Failed to parse request");
        GatewayError::validation(format!("Invalid request body: {e}"))
    })
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req = match parse_request(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    match state.gateway.complete(req).await {
        Ok(CompletionOutcome::Message(message)) => Json(message).into_response(),
        Ok(CompletionOutcome::Stream(events)) => {
            let events = events.map(|sse| -> Result<Event, Infallible> {
                Ok(Event::default().event(sse.event).data(sse.data))
            });
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Request failed");
            e.into_response()
        }
    }
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req = match parse_request(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    match state.gateway.count_tokens(req) {
        Ok(input_tokens) => Json(serde_json::json!({ "input_tokens": input_tokens })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .gateway
        .mapper()
        .client_models()
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "type": "model",
                "display_name": name,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "has_more": false }))
}
