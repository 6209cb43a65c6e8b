use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::rest;
use crate::state::AppState;
use crate::ws::ws_upgrade;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Match an origin against a configured glob. A trailing `*` matches any
/// suffix (`http://localhost:*` covers every port); anything else must
/// match exactly.
pub(crate) fn origin_matches_glob(pattern: &str, origin: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => origin.starts_with(prefix),
        None => origin == pattern,
    }
}

pub fn origin_allowed(patterns: &[String], origin: &str) -> bool {
    patterns.iter().any(|p| origin_matches_glob(p, origin))
}

async fn fallback() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}

/// Plain `OPTIONS` requests (CORS preflights never get this far; the CORS
/// layer answers those itself) are acknowledged with 204 on every path.
async fn options_short_circuit(request: Request<Body>, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(request).await
}

pub fn build_router(state: AppState) -> Router {
    let patterns = state.config.allowed_origins.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin
                .to_str()
                .map(|o| origin_allowed(&patterns, o))
                .unwrap_or(false)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(ws_upgrade))
        .route("/health", get(rest::health))
        .route("/sessions", get(rest::list_sessions).post(rest::create_session))
        .route(
            "/sessions/{id}",
            get(rest::get_session)
                .patch(rest::update_session)
                .delete(rest::delete_session),
        )
        .route("/sessions/{id}/prompt", post(rest::send_prompt))
        .route("/sessions/{id}/cancel", post(rest::cancel_session))
        .route("/sessions/{id}/restart", post(rest::restart_session))
        .route("/event", post(rest::post_event))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(options_short_circuit))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<axum::body::Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri()
                )
            },
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_any_port() {
        assert!(origin_matches_glob(
            "http://localhost:*",
            "http://localhost:3000"
        ));
        assert!(origin_matches_glob(
            "http://localhost:*",
            "http://localhost:9999"
        ));
        assert!(origin_matches_glob(
            "https://127.0.0.1:*",
            "https://127.0.0.1:8443"
        ));
    }

    #[test]
    fn glob_rejects_other_hosts() {
        assert!(!origin_matches_glob(
            "http://localhost:*",
            "http://evil.example:3000"
        ));
        assert!(!origin_matches_glob(
            "http://localhost:*",
            "https://localhost:3000"
        ));
    }

    #[test]
    fn exact_pattern_requires_equality() {
        assert!(origin_matches_glob("https://app.example", "https://app.example"));
        assert!(!origin_matches_glob(
            "https://app.example",
            "https://app.example.evil"
        ));
    }

    #[test]
    fn origin_allowed_checks_all_patterns() {
        let patterns = vec![
            "http://localhost:*".to_string(),
            "https://app.example".to_string(),
        ];
        assert!(origin_allowed(&patterns, "http://localhost:1234"));
        assert!(origin_allowed(&patterns, "https://app.example"));
        assert!(!origin_allowed(&patterns, "https://elsewhere.example"));
        assert!(!origin_allowed(&[], "http://localhost:1234"));
    }
}
