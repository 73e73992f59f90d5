//! Routes for the `/api/modules` endpoint group.
//!
//! Only the attendance engine surface is exposed here; module CRUD itself is
//! an administrative concern handled out of band (seeding, SIS sync).

use axum::Router;
use common::state::AppState;

pub mod attendance;

use attendance::attendance_routes;

/// Builds the `/modules` route group. Everything is nested per module under
/// `/{module_id}/attendance`.
pub fn modules_routes(app_state: AppState) -> Router<AppState> {
    Router::new().nest("/{module_id}/attendance", attendance_routes(app_state))
}
