mod helpers;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use db::models::attendance_record::Entity as RecordEntity;
use db::models::attendance_session::{Entity as SessionEntity, Phase};
use helpers::app::{Seed, TestApp, json_request, make_test_app, seed, send};
use common::state::AppState;
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, Set};
use serde_json::json;
use services::{slots, token};
use std::time::Duration;

fn sessions_uri(module_id: i64) -> String {
    format!("/api/modules/{module_id}/attendance/sessions")
}

async fn create_session(
    app: &TestApp,
    seed: &Seed,
    lecturer_token: &str,
    initial_secs: i64,
    reverify_secs: i64,
) -> i64 {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            &sessions_uri(seed.module.id),
            Some(lecturer_token),
            Some(json!({
                "lat": -25.7545,
                "lng": 28.2314,
                "radius_m": 500.0,
                "initial_secs": initial_secs,
                "reverify_secs": reverify_secs,
                "token_rotation_ms": 1000,
                "token_grace_ms": 300,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    body["data"]["id"].as_i64().unwrap()
}

async fn live_token(app: &TestApp, seed: &Seed, lecturer_token: &str, session_id: i64) -> String {
    let uri = format!("{}/{}/token", sessions_uri(seed.module.id), session_id);
    let (status, body) = send(app, json_request("GET", &uri, Some(lecturer_token), None)).await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["token"].as_str().unwrap().to_owned()
}

async fn set_sample_percent(state: &AppState, seed: &Seed, percent: i32) {
    let mut org = seed.org.clone().into_active_model();
    org.reverify_sample_percent = Set(percent);
    org.update(state.db()).await.unwrap();
}

#[tokio::test]
async fn create_session_conflicts_point_at_the_winner() {
    let (app, state) = make_test_app().await;
    let seed = seed(&state).await;
    let (lect, _) = api::auth::generate_jwt(seed.lecturer.id, seed.lecturer.organization_id, false);

    let id = create_session(&app, &seed, &lect, 300, 240).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &sessions_uri(seed.module.id),
            Some(&lect),
            Some(json!({
                "lat": 0.0, "lng": 0.0, "radius_m": 100.0,
                "initial_secs": 60, "reverify_secs": 60,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["existing_session_id"].as_i64().unwrap(), id);
}

#[tokio::test]
async fn mark_flow_over_http() {
    let (app, state) = make_test_app().await;
    let seed = seed(&state).await;
    let (lect, _) = api::auth::generate_jwt(seed.lecturer.id, seed.lecturer.organization_id, false);
    let (stud, _) = api::auth::generate_jwt(seed.student.id, seed.student.organization_id, false);

    let session_id = create_session(&app, &seed, &lect, 300, 240).await;
    let mark_uri = format!("{}/{}/mark", sessions_uri(seed.module.id), session_id);

    // Garbage token is a hard rejection.
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &mark_uri,
            Some(&stud),
            Some(json!({
                "token": "deadbeef",
                "lat": -25.7545, "lng": 28.2314,
                "biometric_verified": true,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // With the live display token the mark lands; peer 10.1.2.3 is on the
    // tenant's trusted network, so all four signals contribute.
    let display = live_token(&app, &seed, &lect, session_id).await;
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &mark_uri,
            Some(&stud),
            Some(json!({
                "token": display,
                "lat": -25.7545, "lng": 28.2314,
                "biometric_verified": true,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "mark failed: {body}");
    assert_eq!(body["data"]["confidence"], 100);
    assert_eq!(body["data"]["flagged"], false);

    // Second attempt is a conflict.
    let display = live_token(&app, &seed, &lect, session_id).await;
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &mark_uri,
            Some(&stud),
            Some(json!({
                "token": display,
                "lat": -25.7545, "lng": 28.2314,
                "biometric_verified": true,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Lecturer list shows the attendance count.
    let (status, body) = send(
        &app,
        json_request("GET", &sessions_uri(seed.module.id), Some(&lect), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sessions"][0]["attended_count"], 1);

    // Monitoring view carries the record.
    let detail_uri = format!("{}/{}", sessions_uri(seed.module.id), session_id);
    let (status, body) = send(&app, json_request("GET", &detail_uri, Some(&lect), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["records"][0]["user_id"], seed.student.id);
}

#[tokio::test]
async fn close_ends_the_session() {
    let (app, state) = make_test_app().await;
    let seed = seed(&state).await;
    let (lect, _) = api::auth::generate_jwt(seed.lecturer.id, seed.lecturer.organization_id, false);
    let (stud, _) = api::auth::generate_jwt(seed.student.id, seed.student.organization_id, false);

    let session_id = create_session(&app, &seed, &lect, 300, 240).await;
    let display = live_token(&app, &seed, &lect, session_id).await;

    let close_uri = format!("{}/{}/close", sessions_uri(seed.module.id), session_id);
    let (status, body) = send(&app, json_request("PUT", &close_uri, Some(&lect), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "closed");
    assert_eq!(body["data"]["phase"], "closed");

    // Closing again is a no-op returning the closed state.
    let (status, _) = send(&app, json_request("PUT", &close_uri, Some(&lect), None)).await;
    assert_eq!(status, StatusCode::OK);

    // Marks bounce off a closed session.
    let mark_uri = format!("{}/{}/mark", sessions_uri(seed.module.id), session_id);
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &mark_uri,
            Some(&stud),
            Some(json!({
                "token": display,
                "lat": -25.7545, "lng": 28.2314,
                "biometric_verified": true,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reverify_flow_over_http() {
    let (app, state) = make_test_app().await;
    let seed = seed(&state).await;
    set_sample_percent(&state, &seed, 100).await;
    let (lect, _) = api::auth::generate_jwt(seed.lecturer.id, seed.lecturer.organization_id, false);
    let (stud, _) = api::auth::generate_jwt(seed.student.id, seed.student.organization_id, false);

    // Short real-time windows: 2s initial, 30s reverify, 1s rotation.
    let session_id = create_session(&app, &seed, &lect, 2, 30).await;
    let display = live_token(&app, &seed, &lect, session_id).await;
    let mark_uri = format!("{}/{}/mark", sessions_uri(seed.module.id), session_id);
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &mark_uri,
            Some(&stud),
            Some(json!({
                "token": display,
                "lat": -25.7545, "lng": 28.2314,
                "biometric_verified": true,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Wait out the initial window (rounded up to a rotation boundary, so as
    // late as 3s), then poll: selection at 100% must have picked our only
    // marked student.
    tokio::time::sleep(Duration::from_millis(3300)).await;
    let reverify_uri = format!("{}/{}/reverify", sessions_uri(seed.module.id), session_id);
    let (status, body) = send(&app, json_request("GET", &reverify_uri, Some(&stud), None)).await;
    assert_eq!(status, StatusCode::OK, "poll failed: {body}");
    assert_eq!(body["data"]["required"], true);
    assert_eq!(body["data"]["status"], "pending");
    let slot_start: DateTime<Utc> = body["data"]["slot_start"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // Mint the slot-bound token the student's device would derive from the
    // projected rotation at the slot instant.
    let session = SessionEntity::find_by_id(session_id)
        .one(state.db())
        .await
        .unwrap()
        .unwrap();
    let record = RecordEntity::find_by_id((session_id, seed.student.id))
        .one(state.db())
        .await
        .unwrap()
        .unwrap();
    let slot_seq = slots::record_slot_sequence(&session, &record).unwrap();
    let slot_token = token::mint(&session.secret, session_id, Phase::Reverify, slot_seq);

    // Sleep into the slot window and submit.
    let wait = (slot_start - Utc::now()).num_milliseconds().max(0) as u64 + 100;
    tokio::time::sleep(Duration::from_millis(wait)).await;
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &reverify_uri,
            Some(&stud),
            Some(json!({ "token": slot_token, "biometric_verified": true })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "reverify failed: {body}");
    assert_eq!(body["data"]["reverify_status"], "passed");
    assert_eq!(body["data"]["flagged"], false);
}

#[tokio::test]
async fn lecturer_can_target_and_override() {
    let (app, state) = make_test_app().await;
    let seed = seed(&state).await;
    set_sample_percent(&state, &seed, 0).await;
    let (lect, _) = api::auth::generate_jwt(seed.lecturer.id, seed.lecturer.organization_id, false);
    let (stud, _) = api::auth::generate_jwt(seed.student.id, seed.student.organization_id, false);

    let session_id = create_session(&app, &seed, &lect, 2, 30).await;
    let display = live_token(&app, &seed, &lect, session_id).await;
    let mark_uri = format!("{}/{}/mark", sessions_uri(seed.module.id), session_id);
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &mark_uri,
            Some(&stud),
            Some(json!({
                "token": display,
                "lat": -25.7545, "lng": 28.2314,
                "biometric_verified": true,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    tokio::time::sleep(Duration::from_millis(3300)).await;

    // Random selection at 0% picked nobody; the lecturer pulls the student
    // in by hand.
    let target_uri = format!(
        "{}/{}/reverify/target",
        sessions_uri(seed.module.id),
        session_id
    );
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &target_uri,
            Some(&lect),
            Some(json!({ "user_ids": [seed.student.id, 999_999] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "target failed: {body}");
    assert_eq!(
        body["data"]["assigned_user_ids"],
        json!([seed.student.id])
    );

    // Manual override closes the loop without a submission.
    let override_uri = format!(
        "{}/{}/reverify/override",
        sessions_uri(seed.module.id),
        session_id
    );
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &override_uri,
            Some(&lect),
            Some(json!({ "user_id": seed.student.id })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reverify_status"], "manual_present");
    assert_eq!(body["data"]["manual_override"], true);
    assert_eq!(body["data"]["flagged"], false);
}
