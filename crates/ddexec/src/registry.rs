//! MIME handler registrations of running containers.
//!
//! Each container that declares `xdg_open` handlers owns one `xdg_open.<containerId>` file
//! in the mapping directory, holding `mimeType=commandTemplate` lines. Files are replaced
//! atomically so a concurrent lookup never sees a partial file.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

const PREFIX: &str = "xdg_open.";

/// A handler found for a MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub container_id: String,
    pub template: String,
}

#[derive(Debug, Clone)]
pub struct MappingRegistry {
    dir: PathBuf,
}

impl MappingRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, container_id: &str) -> PathBuf {
        self.dir.join(format!("{PREFIX}{container_id}"))
    }

    /// Write the handlers of a container. An empty map registers nothing.
    pub async fn register(
        &self,
        container_id: &str,
        mappings: &BTreeMap<String, String>,
    ) -> io::Result<()> {
        if mappings.is_empty() {
            return Ok(());
        }

        let body: String = mappings
            .iter()
            .map(|(mime, template)| format!("{mime}={template}\n"))
            .collect();

        let target = self.entry_path(container_id);
        let staging = self.dir.join(format!(".{PREFIX}{container_id}.tmp"));
        fs::write(&staging, body).await?;
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }
        debug!(
            "Registered {} handler(s) for {}",
            mappings.len(),
            container_id
        );
        Ok(())
    }

    /// First registered handler for `mime`, scanning entries in name order.
    pub async fn find(&self, mime: &str) -> io::Result<Option<Mapping>> {
        match fs::metadata(&self.dir).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{} is not a directory", self.dir.display()),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        let pattern = self.dir.join(format!("{PREFIX}*"));
        let pattern = pattern.to_string_lossy();
        let mut entries: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
            .filter_map(Result::ok)
            .collect();
        entries.sort();

        let key = format!("{mime}=");
        for entry in entries {
            let Some(container_id) = entry
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(PREFIX))
                .map(str::to_string)
            else {
                continue;
            };

            let contents = match fs::read_to_string(&entry).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("Cannot read {}: {}", entry.display(), e);
                    continue;
                }
            };
            if let Some(template) = contents.lines().find_map(|line| line.strip_prefix(&key)) {
                return Ok(Some(Mapping {
                    container_id,
                    template: template.to_string(),
                }));
            }
        }
        Ok(None)
    }

    /// Remove the entry of a container; a missing entry is fine.
    pub async fn clear(&self, container_id: &str) -> io::Result<()> {
        match fs::remove_file(self.entry_path(container_id)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
