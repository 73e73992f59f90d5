//! Routes for the `/auth` endpoint group.

pub mod post;

use axum::{Router, routing::post as post_route};
use common::state::AppState;
use post::login;

/// Builds the `/auth` route group.
///
/// - `POST /auth/login` → `login`
pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/login", post_route(login))
}
