//! Integration tests for the `/api/v1/tasks` REST surface.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, post, post_json, rows};
use serde_json::json;

// ---------------------------------------------------------------------------
// Test: create returns 201 with id and estimates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_task_returns_201_with_estimates() {
    let (app, _) = common::build_test_app().await;
    let response = post_json(
        app,
        "/api/v1/tasks",
        json!({
            "templateIds": ["invoice", "letter"],
            "dataSource": rows(5),
            "mode": "parallel",
            "options": { "concurrency": 2 }
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let data = &json["data"];
    assert!(data["taskId"].as_str().unwrap().starts_with("task_"));
    assert_eq!(data["status"], "pending");
    assert_eq!(data["estimatedDocumentCount"], 10);
    // ceil(10 / 2) x 1000ms
    assert_eq!(data["estimatedDurationMs"], 5000);
}

// ---------------------------------------------------------------------------
// Test: validation failures are 400 and create nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_create_returns_400_without_storing() {
    let (app, state) = common::build_test_app().await;

    let empty = post_json(
        app.clone(),
        "/api/v1/tasks",
        json!({ "templateIds": [], "dataSource": rows(1) }),
    )
    .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(empty).await["code"], "VALIDATION_ERROR");

    let unknown = post_json(
        app.clone(),
        "/api/v1/tasks",
        json!({ "templateIds": ["nope"], "dataSource": rows(1) }),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    let body = body_json(unknown).await;
    assert!(body["error"].as_str().unwrap().contains("Template not found: nope"));

    let bad_csv = post_json(
        app,
        "/api/v1/tasks",
        json!({
            "templateIds": ["invoice"],
            "dataSource": { "type": "csv", "content": "name\n\"unterminated" }
        }),
    )
    .await;
    assert_eq!(bad_csv.status(), StatusCode::BAD_REQUEST);

    assert!(state.scheduler.list_tasks().await.is_empty());
}

// ---------------------------------------------------------------------------
// Test: unknown ids are 404, illegal transitions are 409
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_task_is_404_and_illegal_transition_is_409() {
    let (app, _) = common::build_test_app().await;

    let missing = get(app.clone(), "/api/v1/tasks/task_missing").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(missing).await["code"], "TASK_NOT_FOUND");

    let created = post_json(
        app.clone(),
        "/api/v1/tasks",
        json!({ "templateIds": ["invoice"], "dataSource": rows(2) }),
    )
    .await;
    let id = body_json(created).await["data"]["taskId"]
        .as_str()
        .unwrap()
        .to_string();

    let pause = post(app.clone(), &format!("/api/v1/tasks/{id}/pause")).await;
    assert_eq!(pause.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(pause).await["code"], "TASK_STATUS_ERROR");

    let resume = post(app.clone(), &format!("/api/v1/tasks/{id}/resume")).await;
    assert_eq!(resume.status(), StatusCode::CONFLICT);

    let after = body_json(get(app, &format!("/api/v1/tasks/{id}")).await).await;
    assert_eq!(after["data"]["status"], "pending");
}

// ---------------------------------------------------------------------------
// Test: a started task runs to completion and its results are listed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn started_task_completes_and_lists_results() {
    let (app, state) = common::build_test_app().await;

    let created = post_json(
        app.clone(),
        "/api/v1/tasks",
        json!({
            "templateIds": ["invoice", "letter"],
            "dataSource": { "type": "csv", "content": "name\nAda\nGrace\nLinus\n" },
            "outputFormat": "txt"
        }),
    )
    .await;
    let id = body_json(created).await["data"]["taskId"]
        .as_str()
        .unwrap()
        .to_string();

    let started = post(app.clone(), &format!("/api/v1/tasks/{id}/start")).await;
    assert_eq!(started.status(), StatusCode::OK);

    state.scheduler.wait_idle(&id).await.unwrap();

    let task = body_json(get(app.clone(), &format!("/api/v1/tasks/{id}")).await).await;
    assert_eq!(task["data"]["status"], "completed");
    assert_eq!(task["data"]["execution"]["completedDocuments"], 6);
    assert_eq!(task["data"]["execution"]["failedDocuments"], 0);
    assert_eq!(task["data"]["progress"], 100.0);

    let results = body_json(get(app.clone(), &format!("/api/v1/tasks/{id}/results")).await).await;
    let records = results["data"].as_array().unwrap();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r["format"] == "txt"));

    let again = post(app.clone(), &format!("/api/v1/tasks/{id}/cancel")).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let list = body_json(get(app, "/api/v1/tasks").await).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: a missing placeholder field fails units without failing the task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_fields_fail_units_not_the_task() {
    let (app, state) = common::build_test_app().await;

    let created = post_json(
        app.clone(),
        "/api/v1/tasks",
        json!({
            "templateIds": ["invoice"],
            "dataSource": { "type": "json", "content": "[{\"name\":\"Ada\"},{\"other\":1}]" },
            "options": { "maxRetries": 0 }
        }),
    )
    .await;
    let id = body_json(created).await["data"]["taskId"]
        .as_str()
        .unwrap()
        .to_string();

    post(app.clone(), &format!("/api/v1/tasks/{id}/start")).await;
    let task = state.scheduler.wait_idle(&id).await.unwrap();

    assert_eq!(task.execution.completed_documents, 1);
    assert_eq!(task.execution.failed_documents, 1);
    assert_eq!(task.status.as_str(), "completed");
}
