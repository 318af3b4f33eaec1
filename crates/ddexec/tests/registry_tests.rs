//! Handler registry tests.

use std::collections::BTreeMap;

use ddexec::MappingRegistry;
use ddexec::registry::Mapping;
use tempfile::TempDir;

fn handlers(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(mime, template)| (mime.to_string(), template.to_string()))
        .collect()
}

#[tokio::test]
async fn test_register_find_clear() {
    let dir = TempDir::new().unwrap();
    let registry = MappingRegistry::new(dir.path());

    registry
        .register(
            "c1",
            &handlers(&[
                ("x-scheme-handler/https", "chrome <arg>"),
                ("application/pdf", "evince <arg>"),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(
        registry.find("x-scheme-handler/https").await.unwrap(),
        Some(Mapping {
            container_id: "c1".to_string(),
            template: "chrome <arg>".to_string(),
        })
    );
    assert_eq!(
        registry.find("application/pdf").await.unwrap().unwrap().template,
        "evince <arg>"
    );
    assert!(registry.find("image/png").await.unwrap().is_none());

    let contents = std::fs::read_to_string(dir.path().join("xdg_open.c1")).unwrap();
    assert_eq!(
        contents,
        "application/pdf=evince <arg>\nx-scheme-handler/https=chrome <arg>\n"
    );

    registry.clear("c1").await.unwrap();
    assert!(registry.find("application/pdf").await.unwrap().is_none());
    assert!(!dir.path().join("xdg_open.c1").exists());

    // Clearing twice is fine.
    registry.clear("c1").await.unwrap();
}

#[tokio::test]
async fn test_empty_handlers_write_nothing() {
    let dir = TempDir::new().unwrap();
    let registry = MappingRegistry::new(dir.path());

    registry.register("c1", &BTreeMap::new()).await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_first_entry_in_name_order_wins() {
    let dir = TempDir::new().unwrap();
    let registry = MappingRegistry::new(dir.path());

    registry
        .register("bbb", &handlers(&[("text/plain", "gedit <arg>")]))
        .await
        .unwrap();
    registry
        .register("aaa", &handlers(&[("text/plain", "vim <arg>")]))
        .await
        .unwrap();

    let mapping = registry.find("text/plain").await.unwrap().unwrap();
    assert_eq!(mapping.container_id, "aaa");
    assert_eq!(mapping.template, "vim <arg>");
}

#[tokio::test]
async fn test_unrelated_files_are_ignored() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("server.sock.txt"), "text/plain=nope\n").unwrap();
    let registry = MappingRegistry::new(dir.path());

    assert!(registry.find("text/plain").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_directory_has_no_handlers() {
    let dir = TempDir::new().unwrap();
    let registry = MappingRegistry::new(dir.path().join("gone"));
    assert!(registry.find("text/plain").await.unwrap().is_none());
}

#[tokio::test]
async fn test_directory_that_is_a_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mappings");
    std::fs::write(&path, b"").unwrap();
    let registry = MappingRegistry::new(&path);
    assert!(registry.find("text/plain").await.is_err());
}
