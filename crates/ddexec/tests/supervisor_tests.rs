//! Supervisor and control plane tests.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{FakeEngine, test_session};
use ddexec::dispatch::EXIT_OK;
use ddexec::model::{DoNotShare, HostFlags, parse_applications};
use ddexec::supervisor::host_control_plane;
use ddexec::{Dispatcher, Lifecycle, MappingRegistry, Supervisor};
use ddexec_control::{ControlClient, PathResolver};
use tempfile::TempDir;

const DOCUMENT: &str = r#"
a:
  image: alpine
  command: [echo, hello]
  depends_on: [b]

b:
  image: alpine
  x-startup:
    daemon: true
"#;

fn flags() -> HostFlags {
    HostFlags {
        do_not_share: DoNotShare {
            home: true,
            tools: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_dependencies_start_first_and_stop_last() {
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::with_image("alpine");
    *engine.exit_code.lock().unwrap() = 7;
    let session = Arc::new(test_session(dir.path(), flags()));
    let mut supervisor = Supervisor::new(Arc::new(Lifecycle::new(engine.clone(), session)));

    let code = supervisor
        .run(parse_applications(DOCUMENT).unwrap())
        .await
        .unwrap();
    assert_eq!(code, 7);
    assert_eq!(engine.created_names(), vec!["b", "a"]);

    let running: Vec<String> = supervisor.running().map(|r| r.name().to_string()).collect();
    assert_eq!(running, vec!["b", "a"]);

    supervisor.shutdown().await;
    assert_eq!(supervisor.running().count(), 0);
    // Only the daemon was still running.
    assert_eq!(engine.stopped.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cycle_fails_before_any_container_exists() {
    let dir = TempDir::new().unwrap();
    let engine = FakeEngine::with_image("alpine");
    let session = Arc::new(test_session(dir.path(), flags()));
    let mut supervisor = Supervisor::new(Arc::new(Lifecycle::new(engine.clone(), session)));

    let apps = parse_applications(
        "a:\n  image: alpine\n  depends_on: [b]\nb:\n  image: alpine\n  depends_on: [a]\n",
    )
    .unwrap();
    let err = supervisor.run(apps).await.unwrap_err();

    assert!(err.is_dependency());
    assert!(engine.created_names().is_empty());
}

#[tokio::test]
async fn test_control_plane_runs_commands_through_engine() {
    let home = TempDir::new().unwrap();
    let engine = FakeEngine::new();
    *engine.exec_code.lock().unwrap() = 5;

    let server = host_control_plane(engine.clone(), PathResolver::new(home.path()))
        .await
        .unwrap();
    let client = ControlClient::new(server.socket_path());

    assert_eq!(client.run_command("c1", "true").await.unwrap(), 5);
    assert_eq!(
        engine.execs.lock().unwrap().as_slice(),
        &[(
            "c1".to_string(),
            vec!["/bin/sh".to_string(), "-c".to_string(), "true".to_string()]
        )]
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dispatch_falls_back_to_control_plane() {
    let dir = TempDir::new().unwrap();
    let host_engine = FakeEngine::new();
    let server = host_control_plane(host_engine.clone(), PathResolver::new(dir.path()))
        .await
        .unwrap();

    let registry = MappingRegistry::new(dir.path());
    registry
        .register(
            "c1",
            &BTreeMap::from([(
                "x-scheme-handler/https".to_string(),
                "chrome <arg>".to_string(),
            )]),
        )
        .await
        .unwrap();

    let local_engine = FakeEngine::new();
    local_engine.unreachable.store(true, Ordering::SeqCst);
    let dispatcher = Dispatcher::new(
        local_engine,
        registry,
        Some(ControlClient::new(server.socket_path())),
    );

    assert_eq!(dispatcher.invoke("https://example.com").await, EXIT_OK);
    let execs = host_engine.execs.lock().unwrap().clone();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].1[2], "chrome https://example.com");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refused_exec_falls_back_to_control_plane() {
    let dir = TempDir::new().unwrap();
    let host_engine = FakeEngine::new();
    let server = host_control_plane(host_engine.clone(), PathResolver::new(dir.path()))
        .await
        .unwrap();

    let registry = MappingRegistry::new(dir.path());
    registry
        .register(
            "c1",
            &BTreeMap::from([("text/plain".to_string(), "gedit <arg>".to_string())]),
        )
        .await
        .unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, b"hello").unwrap();

    let local_engine = FakeEngine::new();
    local_engine.refuse_exec.store(true, Ordering::SeqCst);
    let dispatcher = Dispatcher::new(
        local_engine.clone(),
        registry,
        Some(ControlClient::new(server.socket_path())),
    );

    assert_eq!(dispatcher.invoke(&notes.to_string_lossy()).await, EXIT_OK);
    assert!(local_engine.execs.lock().unwrap().is_empty());
    assert_eq!(host_engine.execs.lock().unwrap().len(), 1);

    server.shutdown().await.unwrap();
}
