use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use db::DBService;
use server::{routes, state::AppState};
use services::services::{
    config::Config, dispatcher::Dispatcher, execution::ExecutionService,
    notify::NotificationService, registry::ProjectRegistry,
};
use tempfile::TempDir;
use tower::util::ServiceExt;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

async fn test_app() -> TestResult<(TempDir, Router)> {
    let dir = TempDir::new()?;

    let registry_path = dir.path().join("projects.json");
    std::fs::write(
        &registry_path,
        serde_json::json!({
            "projects": [{
                "id": "zephyr",
                "name": "Zephyr",
                "repo_url": "https://example.com/zephyr.git",
                "priority": 1
            }]
        })
        .to_string(),
    )?;
    let registry = Arc::new(ProjectRegistry::load(&registry_path)?);

    let db = DBService::from_url(&format!(
        "sqlite://{}",
        dir.path().join("test.sqlite").to_string_lossy()
    ))
    .await?;

    let config = Config::default();
    let notifier = NotificationService::disabled();
    let execution = ExecutionService::new(
        db.clone(),
        registry.clone(),
        notifier.clone(),
        config.clone(),
    );
    let dispatcher = Dispatcher::new(db.clone(), registry.clone(), notifier, execution);

    let state = AppState {
        db,
        registry,
        dispatcher,
        config: Arc::new(config),
    };
    Ok((dir, routes::router().with_state(state)))
}

fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_liveness() -> TestResult<()> {
    let (_dir, app) = test_app().await?;

    let response = app
        .oneshot(Request::get("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "server");
    Ok(())
}

#[tokio::test]
async fn trigger_accepts_known_repo() -> TestResult<()> {
    let (_dir, app) = test_app().await?;

    let response = app
        .clone()
        .oneshot(json_post(
            "/trigger",
            serde_json::json!({
                "taskId": "wi-7",
                "repoUrl": "https://example.com/zephyr.git",
                "workItemPath": "work/7.md",
                "subStepCount": 3
            }),
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "accepted");
    let task_id = json["taskId"].as_str().unwrap().to_string();

    // The task is visible through the read API, still queued.
    let response = app
        .oneshot(Request::get(format!("/tasks/{task_id}").as_str()).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "queued");
    assert_eq!(json["data"]["steps_total"], 3);
    Ok(())
}

#[tokio::test]
async fn trigger_rejects_unknown_repo_and_bad_input() -> TestResult<()> {
    let (_dir, app) = test_app().await?;

    let response = app
        .clone()
        .oneshot(json_post(
            "/trigger",
            serde_json::json!({"repoUrl": "https://example.com/stranger.git"}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(json_post("/trigger", serde_json::json!({"repoUrl": "  "})))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing repoUrl entirely fails deserialization.
    let response = app
        .oneshot(json_post("/trigger", serde_json::json!({"taskId": "x"})))
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn chat_event_with_unknown_project_pauses_task() -> TestResult<()> {
    let (_dir, app) = test_app().await?;

    let response = app
        .clone()
        .oneshot(json_post(
            "/chat/events",
            serde_json::json!({
                "channel_id": "C123",
                "message_id": "1700.0001",
                "text": "task wrongname fix the bug"
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/tasks?limit=10").body(Body::empty())?)
        .await?;
    let json = body_json(response).await;
    let tasks = json["data"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["status"], "paused");
    assert_eq!(tasks[0]["original_description"], "fix the bug");
    Ok(())
}

#[tokio::test]
async fn projects_route_lists_registry_snapshot() -> TestResult<()> {
    let (_dir, app) = test_app().await?;

    let response = app
        .oneshot(Request::get("/projects").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"][0]["id"], "zephyr");
    Ok(())
}

#[tokio::test]
async fn task_lookup_misses_return_404() -> TestResult<()> {
    let (_dir, app) = test_app().await?;

    let response = app
        .oneshot(
            Request::get("/tasks/00000000-0000-0000-0000-000000000000").body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
