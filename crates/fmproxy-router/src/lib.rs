//! HTTP surface: route table, local bearer auth middleware, and the
//! handlers translating between the wire protocol and
//! `fmproxy_core::Pipeline`. Mirrors the role `gproxy-router` plays in the
//! teacher workspace, scoped down to the three routes spec.md §6 names.

pub mod auth_extract;
pub mod handler;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use fmproxy_core::{LocalApiKeyAuthority, ModelRouter, Pipeline, PipelineError};

use auth_extract::extract_bearer;

pub struct RouterState {
    pub pipeline: Arc<Pipeline>,
    pub router: Arc<ModelRouter>,
    pub authority: Arc<LocalApiKeyAuthority>,
    pub max_request_size: usize,
}

pub fn build_router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handler::chat_completions_handler))
        .route("/v1/models", get(handler::models_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_local_auth))
        .route("/health", get(handler::health_handler))
        .with_state(state)
}

async fn require_local_auth(State(state): State<Arc<RouterState>>, req: Request<Body>, next: Next) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return auth_error("missing_api_key", "missing Authorization: Bearer header");
    };

    if !state.authority.validate(token) {
        return auth_error("invalid_api_key", "the provided API key is not recognized");
    }

    next.run(req).await
}

fn auth_error(code: &str, message: &str) -> Response {
    let err = PipelineError::authentication(code, message);
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::UNAUTHORIZED);
    (status, [("content-type", "application/json")], err.body()).into_response()
}
