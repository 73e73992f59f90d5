use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use ::common::state::AppState;

mod common;
mod get;
mod post;
mod put;

pub use get::{get_live_token, get_reverify_status, get_session, list_sessions};
pub use post::{
    create_session, mark_attendance, override_present, request_retry, submit_reverify,
    target_students,
};
pub use put::close_session;

use crate::auth::guards::{allow_lecturer, allow_student};

/// Builds the `/modules/{module_id}/attendance` route group.
///
/// Lecturer routes manage sessions and the reverify pool; student routes
/// submit marks and reverifications for their own record only.
pub fn attendance_routes(app_state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/sessions",
            post(create_session)
                .route_layer(from_fn_with_state(app_state.clone(), allow_lecturer)),
        )
        .route(
            "/sessions",
            get(list_sessions).route_layer(from_fn_with_state(app_state.clone(), allow_lecturer)),
        )
        .route(
            "/sessions/{session_id}",
            get(get_session).route_layer(from_fn_with_state(app_state.clone(), allow_lecturer)),
        )
        .route(
            "/sessions/{session_id}/token",
            get(get_live_token).route_layer(from_fn_with_state(app_state.clone(), allow_lecturer)),
        )
        .route(
            "/sessions/{session_id}/close",
            put(close_session).route_layer(from_fn_with_state(app_state.clone(), allow_lecturer)),
        )
        .route(
            "/sessions/{session_id}/mark",
            post(mark_attendance)
                .route_layer(from_fn_with_state(app_state.clone(), allow_student)),
        )
        .route(
            "/sessions/{session_id}/reverify",
            get(get_reverify_status)
                .route_layer(from_fn_with_state(app_state.clone(), allow_student)),
        )
        .route(
            "/sessions/{session_id}/reverify",
            post(submit_reverify)
                .route_layer(from_fn_with_state(app_state.clone(), allow_student)),
        )
        .route(
            "/sessions/{session_id}/reverify/retry",
            post(request_retry).route_layer(from_fn_with_state(app_state.clone(), allow_student)),
        )
        .route(
            "/sessions/{session_id}/reverify/target",
            post(target_students)
                .route_layer(from_fn_with_state(app_state.clone(), allow_lecturer)),
        )
        .route(
            "/sessions/{session_id}/reverify/override",
            post(override_present)
                .route_layer(from_fn_with_state(app_state.clone(), allow_lecturer)),
        )
}
