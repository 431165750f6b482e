use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use mission_control::config::{Config, DataPaths};
use mission_control::server::{AppState, router};

struct Harness {
    _dir: tempfile::TempDir,
    paths: DataPaths,
    app: Router,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = DataPaths::under(dir.path());
    let app = router(AppState::new(Config::default(), paths.clone()));
    Harness {
        _dir: dir,
        paths,
        app,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_owned())))
        .expect("request");
    let resp = app.clone().oneshot(req).await.expect("response");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, value)
}

#[tokio::test]
async fn created_task_is_listed_with_a_title_derived_id() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/tasks",
        Some(r#"{"title":"Buy milk","priority":"high"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["task"]["id"], "QnV5IG1pbGs");
    assert_eq!(body["task"]["editable"], true);

    let (status, body) = send(&h.app, "GET", "/api/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    let task = &body["tasks"][0];
    assert_eq!(task["title"], "Buy milk");
    assert_eq!(task["status"], "todo");
    assert_eq!(task["priority"], "high");
    assert_eq!(task["assignee"], "raul");
    assert_eq!(task["lineNumber"], 2);

    // Same routes without the /api prefix.
    let (status, root) = send(&h.app, "GET", "/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(root, body);
}

#[tokio::test]
async fn task_status_update_and_delete_round() {
    let h = harness();
    std::fs::write(
        &h.paths.task_inbox,
        "## 📥 Sin clasificar\n- [ ] Water plants #low\n",
    )
    .unwrap();
    let id = "V2F0ZXIgcGxhbnRz";

    let (status, body) = send(
        &h.app,
        "PATCH",
        &format!("/api/tasks/{id}"),
        Some(r#"{"status":"done"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["id"], id);
    assert_eq!(body["status"], "done");
    assert_eq!(body["source"], "inbox");
    assert_eq!(body["task"]["status"], "done");
    assert_eq!(
        std::fs::read_to_string(&h.paths.task_inbox).unwrap(),
        "## 📥 Sin clasificar\n- [x] Water plants #low\n"
    );

    let (status, body) = send(&h.app, "DELETE", &format!("/api/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
    assert_eq!(
        std::fs::read_to_string(&h.paths.task_inbox).unwrap(),
        "## 📥 Sin clasificar\n(vacío)\n"
    );

    let (status, body) = send(&h.app, "DELETE", &format!("/api/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Task not found or not editable" }));
}

#[tokio::test]
async fn task_validation_errors_are_400() {
    let h = harness();
    let (status, body) = send(&h.app, "POST", "/api/tasks", Some(r#"{"title":"   "}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "title is required");
    assert!(!h.paths.task_inbox.exists());

    let (status, body) = send(&h.app, "POST", "/api/tasks", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &h.app,
        "PATCH",
        "/api/tasks/QnV5IG1pbGs",
        Some(r#"{"status":"someday"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.app,
        "PATCH",
        "/api/tasks/QnV5IG1pbGs",
        Some(r#"{"status":"done"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn goals_crud_and_missing_ids() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        "POST",
        "/api/goals",
        Some(r#"{"title":"Run a marathon","timeframe":"long"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["goal"]["id"].as_str().unwrap().to_owned();
    assert_eq!(body["goal"]["status"], "active");
    assert_eq!(body["goal"]["description"], "");

    let before = std::fs::read(&h.paths.goals_file).unwrap();
    let (status, body) = send(
        &h.app,
        "PATCH",
        "/api/goals/nonexistent",
        Some(r#"{"status":"completed"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    assert_eq!(std::fs::read(&h.paths.goals_file).unwrap(), before);

    let (status, body) = send(
        &h.app,
        "PATCH",
        &format!("/api/goals/{id}"),
        Some(r#"{"status":"completed"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["goal"]["status"], "completed");
    assert_eq!(body["goal"]["title"], "Run a marathon");

    let (status, body) = send(&h.app, "GET", "/api/goals", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["goals"].as_array().unwrap().len(), 1);

    let (status, _) = send(&h.app, "DELETE", &format!("/api/goals/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&h.app, "DELETE", &format!("/api/goals/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&h.app, "POST", "/api/goals", Some(r#"{"title":""}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn io_failures_report_context_and_detail() {
    let h = harness();
    std::fs::write(&h.paths.goals_file, "{ broken").unwrap();

    let (status, body) = send(&h.app, "GET", "/api/goals", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "goals": [] }));

    let (status, body) = send(&h.app, "POST", "/api/goals", Some(r#"{"title":"x"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to create goal");
    assert!(body["detail"].as_str().unwrap().contains("goals.json"));
    assert_eq!(std::fs::read_to_string(&h.paths.goals_file).unwrap(), "{ broken");
}

#[tokio::test]
async fn crons_list_and_toggle() {
    let h = harness();
    std::fs::create_dir_all(h.paths.cron_jobs_file.parent().unwrap()).unwrap();
    std::fs::write(
        &h.paths.cron_jobs_file,
        r#"[{"id":"j1","name":"evening-checkin","enabled":true,"schedule":{"kind":"every","everyMs":86400000},"custom":1}]"#,
    )
    .unwrap();

    let (status, body) = send(&h.app, "GET", "/api/crons", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["crons"][0]["scheduleLabel"], "cada 1d");
    assert_eq!(body["crons"][0]["status"], "pending");

    let (status, body) = send(&h.app, "PATCH", "/api/crons/j1", Some(r#"{"enabled":false}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["cron"]["enabled"], false);
    assert_eq!(body["cron"]["status"], "disabled");

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(&h.paths.cron_jobs_file).unwrap()).unwrap();
    assert_eq!(saved[0]["enabled"], false);
    assert_eq!(saved[0]["custom"], 1);

    let (status, _) = send(&h.app, "PATCH", "/api/crons/zz", Some(r#"{"enabled":true}"#)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&h.app, "PATCH", "/api/crons/j1", Some("{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_environment_degrades_gracefully() {
    let h = harness();

    let (status, body) = send(&h.app, "GET", "/api/usage", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "No sessions found" }));

    let (status, body) = send(&h.app, "GET", "/api/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agents"][0]["id"], "serman");
    assert_eq!(body["agents"][0]["status"], "offline");
    let generated_at = body["generatedAt"].as_i64().expect("epoch millis");
    assert!(generated_at > 1_700_000_000_000);

    for (uri, key) in [
        ("/api/projects", "projects"),
        ("/api/memory", "memories"),
        ("/api/crons", "crons"),
        ("/api/tasks", "tasks"),
    ] {
        let (status, body) = send(&h.app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body[key], json!([]), "{uri}");
    }
}

#[tokio::test]
async fn usage_sums_todays_session_log() {
    let h = harness();
    std::fs::create_dir_all(&h.paths.sessions_dir).unwrap();
    let now = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap();
    let line = json!({
        "type": "message",
        "timestamp": now,
        "message": {
            "model": "claude-opus",
            "usage": { "input": 1000, "output": 200, "cost": { "total": 0.5 } }
        }
    });
    std::fs::write(h.paths.sessions_dir.join("s1.jsonl"), format!("{line}\n")).unwrap();

    let (status, body) = send(&h.app, "GET", "/api/usage", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["today"]["model"], "total");
    assert_eq!(body["today"]["input"], 1000);
    assert_eq!(body["byModel"]["claude-opus"]["output"], 200);
    assert_eq!(body["today"]["cost"], 0.5);
}

#[tokio::test]
async fn root_serves_the_dashboard() {
    let h = harness();
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let resp = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("Mission Control"));
}
