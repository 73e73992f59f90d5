use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Request, Response},
};
use common::{events::EventDispatcher, state::AppState};
use db::models::{module, organization, user, user_module_role};
use db::models::user_module_role::Role;
use std::convert::Infallible;
use std::net::SocketAddr;
use tower::ServiceExt;
use tower::util::BoxCloneService;

pub type TestApp = BoxCloneService<Request<Body>, Response<axum::body::Body>, Infallible>;

/// Builds a test app over a fresh in-memory database. Engine events are
/// drained and discarded.
pub async fn make_test_app() -> (TestApp, AppState) {
    let db = db::test_utils::setup_test_db().await;
    let (events, mut rx) = EventDispatcher::new();
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let state = AppState::new(db, events);
    let router = Router::new().nest("/api", api::routes::routes(state.clone()));
    (router.into_service().boxed_clone(), state)
}

pub struct Seed {
    pub org: organization::Model,
    pub module: module::Model,
    pub lecturer: user::Model,
    pub student: user::Model,
    pub outsider: user::Model,
}

/// One organization with a module, a lecturer, an enrolled student, and a
/// user from a different organization.
pub async fn seed(state: &AppState) -> Seed {
    let db = state.db();

    let org = organization::Model::create(db, "Test University", Some("10.0.0.0/8"))
        .await
        .unwrap();
    let other_org = organization::Model::create(db, "Other University", None)
        .await
        .unwrap();

    let module = module::Model::create(db, org.id, "COS301", 2026, Some("Software Engineering"))
        .await
        .unwrap();

    let lecturer = user::Model::create(db, org.id, "lect1", "lect1@test.com", "password", false)
        .await
        .unwrap();
    let student = user::Model::create(db, org.id, "stud1", "stud1@test.com", "password", false)
        .await
        .unwrap();
    let outsider = user::Model::create(
        db,
        other_org.id,
        "outsider",
        "outsider@test.com",
        "password",
        false,
    )
    .await
    .unwrap();

    user_module_role::Model::assign_user_to_module(db, lecturer.id, module.id, Role::Lecturer)
        .await
        .unwrap();
    user_module_role::Model::assign_user_to_module(db, student.id, module.id, Role::Student)
        .await
        .unwrap();

    Seed {
        org,
        module,
        lecturer,
        student,
        outsider,
    }
}

/// Builds a JSON request carrying a bearer token and a fake peer address.
pub fn json_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    let mut req = builder.body(body).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 40000))));
    req
}

pub async fn send(app: &TestApp, req: Request<Body>) -> (axum::http::StatusCode, serde_json::Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
