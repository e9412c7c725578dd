// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! End-to-end HTTP tests driving the router in-process with
//! `tower::ServiceExt::oneshot`, covering the submission/claim/release
//! lifecycle, idempotent resubmission, claim races and cancellation.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use taskforged::{AppState, Config, Server};
use tower::ServiceExt;

async fn test_app() -> (Router, AppState) {
    // Auto-register codebases on first use so tests don't need a separate
    // codebase-provisioning call before submitting a task (spec §4.5).
    let config = Config { codebase_auto_register: true, ..Config::default() };
    let server = Server::new(config).await.expect("in-memory server init never fails");
    let state = server.state();
    (taskforged::router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.expect("collect body").to_bytes();
    serde_json::from_slice(&bytes).expect("response body is valid JSON")
}

fn submit_req(body: Value, idempotency_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/tasks")
        .header("authorization", "Bearer alice")
        .header("content-type", "application/json");
    if let Some(key) = idempotency_key {
        builder = builder.header("idempotency-key", key);
    }
    builder.body(Body::from(body.to_string())).expect("valid request")
}

fn sample_task(codebase: &str) -> Value {
    json!({
        "title": "fix the thing",
        "description": "a description long enough to pass validation",
        "codebase_id": codebase,
        "agent_type": "build",
    })
}

#[tokio::test]
async fn healthz_and_version_respond_ok() {
    let (app, _state) = test_app().await;

    let res = app.clone().oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "ok");

    let res = app.oneshot(Request::builder().uri("/v1/version").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["name"], "taskforged");
}

/// S1: submit, then read the task back by id.
#[tokio::test]
async fn submit_then_get_roundtrips_the_task() {
    let (app, _state) = test_app().await;

    let res = app.clone().oneshot(submit_req(sample_task("repo-a"), None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created = body_json(res).await;
    let task_id = created["task_id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "pending");

    let get_req = Request::builder()
        .uri(format!("/v1/tasks/{task_id}"))
        .header("authorization", "Bearer alice")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(get_req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let task = body_json(res).await;
    assert_eq!(task["id"], task_id);
    assert_eq!(task["codebase_id"], "repo-a");
    assert_eq!(task["status"], "pending");
}

/// P3 / S3: resubmitting with the same idempotency key under the same
/// principal returns the original task rather than creating a new one.
#[tokio::test]
async fn duplicate_submission_with_same_idempotency_key_is_a_no_op() {
    let (app, _state) = test_app().await;

    let first = app.clone().oneshot(submit_req(sample_task("repo-a"), Some("key-1"))).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_body = body_json(first).await;
    let first_id = first_body["task_id"].as_str().unwrap().to_string();

    let second = app.clone().oneshot(submit_req(sample_task("repo-a"), Some("key-1"))).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = body_json(second).await;
    assert_eq!(second_body["task_id"], first_id);

    let list_req = Request::builder()
        .uri("/v1/tasks?codebase_id=repo-a")
        .header("authorization", "Bearer alice")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(list_req).await.unwrap();
    let page = body_json(res).await;
    assert_eq!(page["tasks"].as_array().unwrap().len(), 1, "idempotent resubmission must not create a second row");
}

/// P1 / S2: two workers racing to claim the same task — exactly one wins,
/// the loser gets a bare 409 with no body.
#[tokio::test]
async fn only_one_worker_wins_a_concurrent_claim() {
    let (app, _state) = test_app().await;

    let submit = app.clone().oneshot(submit_req(sample_task("repo-a"), None)).await.unwrap();
    let task_id = body_json(submit).await["task_id"].as_str().unwrap().to_string();

    let claim_req = |worker: &str| {
        Request::builder()
            .method("POST")
            .uri("/v1/worker/tasks/claim")
            .header("x-worker-id", worker)
            .header("content-type", "application/json")
            .body(Body::from(json!({ "task_id": task_id }).to_string()))
            .unwrap()
    };

    let first = app.clone().oneshot(claim_req("worker-a")).await.unwrap();
    let second = app.clone().oneshot(claim_req("worker-b")).await.unwrap();

    let statuses = [first.status(), second.status()];
    assert!(statuses.contains(&StatusCode::OK), "one of the two claims must succeed");
    assert!(statuses.contains(&StatusCode::CONFLICT), "the loser must see a 409");

    let get_req = Request::builder()
        .uri(format!("/v1/tasks/{task_id}"))
        .header("authorization", "Bearer alice")
        .body(Body::empty())
        .unwrap();
    let task = body_json(app.oneshot(get_req).await.unwrap()).await;
    assert_eq!(task["status"], "claimed");
}

/// S1 continued: claim, then release as completed, observing the terminal
/// status and that a second release attempt is rejected as a stale claim.
#[tokio::test]
async fn claim_then_release_completes_the_task() {
    let (app, _state) = test_app().await;

    let submit = app.clone().oneshot(submit_req(sample_task("repo-a"), None)).await.unwrap();
    let task_id = body_json(submit).await["task_id"].as_str().unwrap().to_string();

    let claim_req = Request::builder()
        .method("POST")
        .uri("/v1/worker/tasks/claim")
        .header("x-worker-id", "worker-a")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "task_id": task_id }).to_string()))
        .unwrap();
    let claim_res = app.clone().oneshot(claim_req).await.unwrap();
    assert_eq!(claim_res.status(), StatusCode::OK);
    let claim_body = body_json(claim_res).await;
    let claim_token = claim_body["claim_token"].as_str().unwrap().to_string();

    let release_req = Request::builder()
        .method("POST")
        .uri("/v1/worker/tasks/release")
        .header("x-worker-id", "worker-a")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "task_id": task_id, "claim_token": claim_token, "status": "completed", "result": "done" }).to_string(),
        ))
        .unwrap();
    let release_res = app.clone().oneshot(release_req).await.unwrap();
    assert_eq!(release_res.status(), StatusCode::OK);

    let get_req = Request::builder()
        .uri(format!("/v1/tasks/{task_id}"))
        .header("authorization", "Bearer alice")
        .body(Body::empty())
        .unwrap();
    let task = body_json(app.clone().oneshot(get_req).await.unwrap()).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["result"], "done");

    // P9: the claim token is now stale, a second release must be rejected.
    let stale_release_req = Request::builder()
        .method("POST")
        .uri("/v1/worker/tasks/release")
        .header("x-worker-id", "worker-a")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "task_id": task_id, "claim_token": claim_token, "status": "completed", "result": "done-again" }).to_string(),
        ))
        .unwrap();
    let stale_res = app.oneshot(stale_release_req).await.unwrap();
    assert_eq!(stale_res.status(), StatusCode::CONFLICT);
}

/// P9: a pending task can be cancelled directly; a cancelled task cannot
/// then be claimed.
#[tokio::test]
async fn cancelling_a_pending_task_makes_it_terminal() {
    let (app, _state) = test_app().await;

    let submit = app.clone().oneshot(submit_req(sample_task("repo-a"), None)).await.unwrap();
    let task_id = body_json(submit).await["task_id"].as_str().unwrap().to_string();

    let cancel_req = Request::builder()
        .method("DELETE")
        .uri(format!("/v1/tasks/{task_id}"))
        .header("authorization", "Bearer alice")
        .body(Body::empty())
        .unwrap();
    let res = app.clone().oneshot(cancel_req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let task = body_json(res).await;
    assert_eq!(task["status"], "cancelled");

    let claim_req = Request::builder()
        .method("POST")
        .uri("/v1/worker/tasks/claim")
        .header("x-worker-id", "worker-a")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "task_id": task_id }).to_string()))
        .unwrap();
    let claim_res = app.oneshot(claim_req).await.unwrap();
    assert_eq!(claim_res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn submission_with_an_overlong_title_is_rejected() {
    let (app, _state) = test_app().await;

    let mut body = sample_task("repo-a");
    body["title"] = json!("x".repeat(201));
    let res = app.oneshot(submit_req(body, None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submission_with_too_short_a_description_is_rejected() {
    let (app, _state) = test_app().await;

    let mut body = sample_task("repo-a");
    body["description"] = json!("short");
    let res = app.oneshot(submit_req(body, None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_unknown_task_is_not_found() {
    let (app, _state) = test_app().await;

    let req = Request::builder()
        .uri("/v1/tasks/task_doesnotexist")
        .header("authorization", "Bearer alice")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

/// `update_codebases` only updates an already-registered worker; one that
/// never opened `GET /v1/worker/tasks/stream` first is unknown to the
/// registry.
#[tokio::test]
async fn updating_codebases_for_an_unregistered_worker_is_not_found() {
    let (app, _state) = test_app().await;

    let update_req = Request::builder()
        .method("PUT")
        .uri("/v1/worker/codebases")
        .header("x-worker-id", "worker-never-seen")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "codebases": ["repo-a"] }).to_string()))
        .unwrap();
    let res = app.oneshot(update_req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
