//! HTTP route entry point for `/api/...`.
//!
//! Route groups:
//! - `/health` → liveness check (public)
//! - `/auth` → login (public)
//! - `/modules/{module_id}/attendance` → the attendance engine surface,
//!   guarded per route by module role and tenancy.

use axum::Router;
use common::state::AppState;

pub mod auth;
pub mod health;
pub mod modules;

use auth::auth_routes;
use health::health_routes;
use modules::modules_routes;

/// Builds the complete application router for all HTTP endpoints.
pub fn routes(app_state: AppState) -> Router {
    Router::new()
        .nest("/health", health_routes())
        .nest("/auth", auth_routes())
        .nest("/modules", modules_routes(app_state.clone()))
        .with_state(app_state)
}
