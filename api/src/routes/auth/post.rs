use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use common::state::AppState;
use db::models::user::Model as UserModel;
use serde::{Deserialize, Serialize};

use crate::auth::generate_jwt;
use crate::response::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Default)]
pub struct LoginResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub organization_id: i64,
    pub admin: bool,
    pub token: String,
    pub expires_at: String,
}

/// POST /auth/login
///
/// Verifies credentials and issues a JWT.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let db = state.db();

    match UserModel::verify_credentials(db, &req.username, &req.password).await {
        Ok(Some(user)) => {
            let (token, expires_at) = generate_jwt(user.id, user.organization_id, user.admin);
            (
                StatusCode::OK,
                Json(ApiResponse::success(
                    LoginResponse {
                        id: user.id,
                        username: user.username,
                        email: user.email,
                        organization_id: user.organization_id,
                        admin: user.admin,
                        token,
                        expires_at,
                    },
                    "Login successful",
                )),
            )
        }
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Invalid username or password")),
        ),
        Err(e) => {
            tracing::error!(error = %e, "login lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Internal server error")),
            )
        }
    }
}
