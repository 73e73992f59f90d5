use crate::auth::claims::AuthUser;
use crate::response::ApiResponse;
use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Path, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use common::state::AppState;
use db::models::{module::Entity as ModuleEntity, user, user_module_role::Role};
use sea_orm::{DatabaseConnection, EntityTrait};
use std::collections::HashMap;

#[derive(serde::Serialize, Default)]
pub struct Empty;

/// Helper to extract and validate the user from request parts and insert the
/// claims back into the request extensions for handlers to read.
async fn extract_and_insert_authuser(
    req: Request<Body>,
) -> Result<(Request<Body>, AuthUser), (StatusCode, Json<ApiResponse<Empty>>)> {
    let (mut parts, body) = req.into_parts();
    let user = AuthUser::from_request_parts(&mut parts, &())
        .await
        .map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Authentication required")),
            )
        })?;

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(user.clone());
    Ok((req, user))
}

/// Basic guard to ensure the request is authenticated.
pub async fn allow_authenticated(
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    let (req, _user) = extract_and_insert_authuser(req).await?;

    Ok(next.run(req).await)
}

/// Admin-only guard.
pub async fn allow_admin(
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    let (req, user) = extract_and_insert_authuser(req).await?;

    if !user.0.admin {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Admin access required")),
        ));
    }

    Ok(next.run(req).await)
}

/// Base role guard: the caller must hold `required_role` in the module named
/// by the `module_id` path parameter, and the module must belong to the
/// caller's organization. Cross-tenant module ids read as not found.
async fn allow_role_base(
    State(app_state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request<Body>,
    next: Next,
    required_role: Role,
    failure_msg: &str,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    let db: &DatabaseConnection = app_state.db();

    let (req, user) = extract_and_insert_authuser(req).await?;

    let module_id = params
        .get("module_id")
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Missing or invalid module_id")),
        ))?;

    if !module_in_org(db, module_id, user.0.org).await {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Module not found")),
        ));
    }

    if user.0.admin {
        return Ok(next.run(req).await);
    }

    match user::Model::is_in_role(db, user.0.sub, module_id, required_role).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err((StatusCode::FORBIDDEN, Json(ApiResponse::error(failure_msg)))),
        Err(e) => {
            // Deny on DB error (fail-safe)
            tracing::warn!(
                error = %e,
                user_id = user.0.sub,
                module_id,
                "DB error while checking role; denying access"
            );
            Err((StatusCode::FORBIDDEN, Json(ApiResponse::error(failure_msg))))
        }
    }
}

/// Tenancy check: the module must belong to the caller's organization.
async fn module_in_org(db: &DatabaseConnection, module_id: i64, org_id: i64) -> bool {
    match ModuleEntity::find_by_id(module_id).one(db).await {
        Ok(Some(m)) => m.organization_id == org_id,
        _ => false,
    }
}

/// Guard for lecturer-only routes within a module.
pub async fn allow_lecturer(
    State(app_state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    allow_role_base(
        State(app_state),
        Path(params),
        req,
        next,
        Role::Lecturer,
        "Lecturer access required for this module",
    )
    .await
}

/// Guard for student routes within a module.
pub async fn allow_student(
    State(app_state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    allow_role_base(
        State(app_state),
        Path(params),
        req,
        next,
        Role::Student,
        "Student enrollment required for this module",
    )
    .await
}
