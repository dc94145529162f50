//! The Decree HTTP service.
//!
//! Endpoints (the trailing-slash root multiplexes on query flags, the way
//! the original wire protocol does):
//!
//! - `POST /rulesets/{path}`                    — create (body: signature)
//! - `PUT  /rulesets/{path}`                    — append a version (body: rule list)
//! - `GET  /rulesets/{path}?version=`           — fetch a snapshot
//! - `GET  /rulesets/{path}?eval&p1=v1...`      — evaluate with query params
//! - `GET  /rulesets/?list&limit=&cursor=...`   — paginated listing
//! - `POST /rulesets/?watch&revision=`          — long-poll (body: `[paths]`)
//! - `POST /i/rulesets/`                        — authoring create (s-expressions)
//! - `PATCH /i/rulesets/{path}`                 — authoring edit (s-expressions)
//!
//! All responses are `application/json`. Validation failures carry a
//! structured `fields` list locating each broken rule.

mod handlers;
mod state;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use decree_storage::RulesetService;

use self::handlers::{
    handle_authoring_create, handle_authoring_edit, handle_create, handle_put, handle_root_get,
    handle_root_post, handle_ruleset_get,
};
use self::state::AppState;

/// Fallback for unmatched routes.
async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// A JSON error response: `{"error": "<message>"}`.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": message })))
}

/// Build the service router.
pub fn router(rulesets: Arc<dyn RulesetService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH])
        .allow_headers(Any);

    Router::new()
        .route("/rulesets/", get(handle_root_get).post(handle_root_post))
        .route(
            "/rulesets/{*path}",
            get(handle_ruleset_get).post(handle_create).put(handle_put),
        )
        .route("/i/rulesets/", post(handle_authoring_create))
        .route("/i/rulesets/{*path}", patch(handle_authoring_edit))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(Arc::new(AppState::new(rulesets)))
}

/// Serve until ctrl-c.
pub async fn start_server(
    addr: &str,
    rulesets: Arc<dyn RulesetService>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(rulesets);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "decree listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to install ctrl-c handler: {e}");
    }
}
