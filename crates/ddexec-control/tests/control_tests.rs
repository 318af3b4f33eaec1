//! Control-plane route and socket tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use ddexec_control::routes::create_router;
use ddexec_control::{
    AppState, CommandRunner, ControlClient, ControlEndpoint, ControlServer, PathResolver,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

/// Records commands and answers with a fixed exit code.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<(String, String)>>,
    exit_code: i64,
    fail: bool,
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run_command(&self, container_id: &str, command: &str) -> anyhow::Result<i64> {
        self.calls
            .lock()
            .unwrap()
            .push((container_id.to_string(), command.to_string()));
        if self.fail {
            anyhow::bail!("engine unavailable");
        }
        Ok(self.exit_code)
    }
}

fn test_app(home: &TempDir, runner: Arc<RecordingRunner>) -> Router {
    create_router(AppState::new(PathResolver::new(home.path()), runner))
}

async fn post(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

// ============================================================================
// mkdir
// ============================================================================

mod mkdir {
    use super::*;

    #[tokio::test]
    async fn test_creates_under_host_home() {
        let home = TempDir::new().unwrap();
        let app = test_app(&home, Arc::default());

        let (status, json) = post(app, "/mkdir", r#"{"path":"~/work"}"#).await;

        assert_eq!(status, StatusCode::OK);
        let expected = home.path().join("work");
        assert_eq!(json["createdPath"], expected.display().to_string());
        assert!(expected.is_dir());
    }

    #[tokio::test]
    async fn test_existing_directory_returns_same_path() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir(home.path().join("work")).unwrap();

        let (first, json1) =
            post(test_app(&home, Arc::default()), "/mkdir", r#"{"path":"~/work"}"#).await;
        let (second, json2) =
            post(test_app(&home, Arc::default()), "/mkdir", r#"{"path":"~/work"}"#).await;

        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::OK);
        assert_eq!(json1["createdPath"], json2["createdPath"]);
    }

    #[tokio::test]
    async fn test_accepts_pascal_case_keys() {
        let home = TempDir::new().unwrap();
        let (status, _) =
            post(test_app(&home, Arc::default()), "/mkdir", r#"{"Path":"$HOME/x"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert!(home.path().join("x").is_dir());
    }

    #[tokio::test]
    async fn test_file_conflict() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("notes"), b"hello").unwrap();

        let (status, json) =
            post(test_app(&home, Arc::default()), "/mkdir", r#"{"path":"~/notes"}"#).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], "NOT_A_DIRECTORY");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let home = TempDir::new().unwrap();
        let (status, _) = post(test_app(&home, Arc::default()), "/mkdir", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            post(test_app(&home, Arc::default()), "/mkdir", r#"{"other":1}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_outside_home_is_forbidden() {
        let home = TempDir::new().unwrap();
        let (status, _) = post(
            test_app(&home, Arc::default()),
            "/mkdir",
            r#"{"path":"/var/lib/ddexec-forbidden"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let home = TempDir::new().unwrap();
        let response = test_app(&home, Arc::default())
            .oneshot(
                Request::builder()
                    .uri("/mkdir")
                    .method(Method::GET)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

// ============================================================================
// checkDevice
// ============================================================================

mod check_device {
    use super::*;

    #[tokio::test]
    async fn test_existing_and_missing() {
        let home = TempDir::new().unwrap();
        let device = home.path().join("dri");
        std::fs::create_dir(&device).unwrap();

        let body = json!({ "path": device.display().to_string() }).to_string();
        let (status, json) = post(test_app(&home, Arc::default()), "/checkDevice", &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exists"], true);

        let body = json!({ "path": home.path().join("video0").display().to_string() }).to_string();
        let (_, json) = post(test_app(&home, Arc::default()), "/checkDevice", &body).await;
        assert_eq!(json["exists"], false);
    }
}

// ============================================================================
// runCommand
// ============================================================================

mod run_command {
    use super::*;

    #[tokio::test]
    async fn test_forwards_to_runner() {
        let home = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());

        let (status, json) = post(
            test_app(&home, runner.clone()),
            "/runCommand",
            r#"{"containerId":"c1","command":"chrome https://example.com"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exitCode"], 0);
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            &[("c1".to_string(), "chrome https://example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_runner_failure_reports_exit_code_one() {
        let home = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner {
            fail: true,
            ..Default::default()
        });

        let (status, json) = post(
            test_app(&home, runner),
            "/runCommand",
            r#"{"containerId":"c1","command":"true"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["exitCode"], 1);
    }

    #[tokio::test]
    async fn test_missing_container_id() {
        let home = TempDir::new().unwrap();
        let (status, _) = post(
            test_app(&home, Arc::default()),
            "/runCommand",
            r#"{"containerId":"","command":"true"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

// ============================================================================
// Socket round trip
// ============================================================================

mod socket {
    use super::*;

    #[tokio::test]
    async fn test_client_talks_to_server() {
        let home = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner {
            exit_code: 3,
            ..Default::default()
        });
        let state = AppState::new(PathResolver::new(home.path()), runner);
        let server = ControlServer::new(state).start().await.unwrap();
        let directory = server.directory().to_path_buf();
        assert!(server.socket_path().exists());

        let endpoint = ControlEndpoint::hosted(&server);
        assert_eq!(endpoint.share_dir(), directory.as_path());
        let client: ControlClient = endpoint.client().unwrap();

        let created = client.mkdir("~/work").await.unwrap();
        assert_eq!(created, home.path().join("work"));
        assert!(client.check_device(&directory.display().to_string()).await.unwrap());
        assert_eq!(client.run_command("c1", "ls").await.unwrap(), 3);

        let err = client.mkdir("/var/lib/ddexec-forbidden").await.unwrap_err();
        assert!(err.to_string().contains("403"));
        drop(client);

        server.shutdown().await.unwrap();
        assert!(!directory.exists());
    }
}
