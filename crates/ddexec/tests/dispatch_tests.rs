//! `xdg-open` dispatch tests.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use common::FakeEngine;
use ddexec::dispatch::{
    EXIT_FAILED, EXIT_MALFORMED_URL, EXIT_MISSING_FILE, EXIT_NO_HANDLER, EXIT_OK,
};
use ddexec::{Dispatcher, MappingRegistry};
use tempfile::TempDir;

async fn registry_with(dir: &TempDir, container: &str, mime: &str, template: &str) -> MappingRegistry {
    let registry = MappingRegistry::new(dir.path());
    registry
        .register(
            container,
            &BTreeMap::from([(mime.to_string(), template.to_string())]),
        )
        .await
        .unwrap();
    registry
}

#[tokio::test]
async fn test_url_runs_registered_handler() {
    let dir = TempDir::new().unwrap();
    let registry = registry_with(&dir, "c1", "x-scheme-handler/https", "chrome <arg>").await;
    let engine = FakeEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), registry, None);

    assert_eq!(dispatcher.invoke("https://example.com").await, EXIT_OK);

    let execs = engine.execs.lock().unwrap();
    assert_eq!(execs.len(), 1);
    let (container, cmd) = &execs[0];
    assert_eq!(container, "c1");
    assert_eq!(cmd, &["/bin/sh", "-c", "chrome https://example.com"]);
}

#[tokio::test]
async fn test_failing_handler_exits_4() {
    let dir = TempDir::new().unwrap();
    let registry = registry_with(&dir, "c1", "x-scheme-handler/https", "chrome <arg>").await;
    let engine = FakeEngine::new();
    *engine.exec_code.lock().unwrap() = 127;
    let dispatcher = Dispatcher::new(engine, registry, None);

    assert_eq!(dispatcher.invoke("https://example.com").await, EXIT_FAILED);
}

#[tokio::test]
async fn test_unreachable_engine_without_control_exits_4() {
    let dir = TempDir::new().unwrap();
    let registry = registry_with(&dir, "c1", "x-scheme-handler/https", "chrome <arg>").await;
    let engine = FakeEngine::new();
    engine.unreachable.store(true, Ordering::SeqCst);
    let dispatcher = Dispatcher::new(engine, registry, None);

    assert_eq!(dispatcher.invoke("https://example.com").await, EXIT_FAILED);
}

#[tokio::test]
async fn test_exit_codes_classify_failures() {
    let dir = TempDir::new().unwrap();
    let registry = registry_with(&dir, "c1", "x-scheme-handler/https", "chrome <arg>").await;
    let engine = FakeEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), registry, None);

    let missing = dir.path().join("missing.pdf");
    assert_eq!(
        dispatcher.invoke(&missing.to_string_lossy()).await,
        EXIT_MISSING_FILE
    );
    assert_eq!(dispatcher.invoke("9ttp://example.com").await, EXIT_MALFORMED_URL);
    assert_eq!(dispatcher.invoke("mailto-x://someone").await, EXIT_NO_HANDLER);

    let pdf = dir.path().join("paper.pdf");
    std::fs::write(&pdf, b"%PDF-1.4").unwrap();
    assert_eq!(dispatcher.invoke(&pdf.to_string_lossy()).await, EXIT_NO_HANDLER);

    assert!(engine.execs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_file_type_exits_4() {
    let dir = TempDir::new().unwrap();
    let blob = dir.path().join("blob.zzunknown");
    std::fs::write(&blob, b"\0\x01").unwrap();
    let engine = FakeEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), MappingRegistry::new(dir.path()), None);

    assert_eq!(dispatcher.invoke(&blob.to_string_lossy()).await, EXIT_FAILED);
    assert!(engine.execs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unreadable_registry_exits_4() {
    let dir = TempDir::new().unwrap();
    let not_a_dir = dir.path().join("mappings");
    std::fs::write(&not_a_dir, b"").unwrap();
    let engine = FakeEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), MappingRegistry::new(&not_a_dir), None);

    assert_eq!(dispatcher.invoke("https://example.com").await, EXIT_FAILED);
    assert!(engine.execs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_file_path_is_quoted() {
    let dir = TempDir::new().unwrap();
    let registry = registry_with(&dir, "c2", "application/pdf", "evince <arg>").await;
    let pdf = dir.path().join("my paper.pdf");
    std::fs::write(&pdf, b"%PDF-1.4").unwrap();
    let engine = FakeEngine::new();
    let dispatcher = Dispatcher::new(engine.clone(), registry, None);

    let target = pdf.to_string_lossy().into_owned();
    assert_eq!(dispatcher.invoke(&target).await, EXIT_OK);

    let execs = engine.execs.lock().unwrap();
    let (container, cmd) = &execs[0];
    assert_eq!(container, "c2");
    assert_eq!(shlex::split(&cmd[2]).unwrap(), vec!["evince".to_string(), target]);
}
