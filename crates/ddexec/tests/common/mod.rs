//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ddexec::engine::archive::{self, FileMode};
use ddexec::engine::{
    Attached, BuildOptions, ContainerDetails, ContainerSummary, CreateContainer, Engine,
    EngineError, EngineInfo, EngineResult, ExecOptions, ExitWaiter, ImageDetails,
};
use ddexec::lifecycle::{LaunchOptions, Session, SessionPaths};
use ddexec::model::HostFlags;
use ddexec::HostEnvironment;
use ddexec_control::{ControlEndpoint, PathResolver};
use futures::{FutureExt, StreamExt};

// ============================================================================
// Fake engine
// ============================================================================

/// In-memory engine that records every call.
#[derive(Default)]
pub struct FakeEngine {
    pub images: Mutex<HashMap<String, ImageDetails>>,
    pub builds: AtomicUsize,
    pub pulls: AtomicUsize,
    /// `(name, body)` of every created container
    pub created: Mutex<Vec<(String, CreateContainer)>>,
    /// `(container, directory)` of every copy into a container
    pub copies: Mutex<Vec<(String, String)>>,
    /// `(container, argv)` of every exec
    pub execs: Mutex<Vec<(String, Vec<String>)>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    /// Names reported by `list_containers`
    pub existing_names: Mutex<Vec<String>>,
    /// Exit code of every exec
    pub exec_code: Mutex<i64>,
    /// Exit code reported by `wait`
    pub exit_code: Mutex<i64>,
    /// Every call fails as if the socket were missing
    pub unreachable: AtomicBool,
    /// `start` is refused by the daemon
    pub refuse_start: AtomicBool,
    /// `exec` is refused by the daemon
    pub refuse_exec: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An engine that already has `image`.
    pub fn with_image(image: &str) -> Arc<Self> {
        let engine = Self::default();
        engine.images.lock().unwrap().insert(
            image.to_string(),
            ImageDetails {
                id: format!("sha256:{image}"),
                env: vec!["PATH=/usr/local/sbin:/usr/local/bin:/usr/bin:/bin".to_string()],
                ..Default::default()
            },
        );
        Arc::new(engine)
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn created_names(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn refused(operation: &str) -> EngineError {
        EngineError::Stream {
            operation: operation.to_string(),
            message: "daemon error".to_string(),
        }
    }

    fn check(&self) -> EngineResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(EngineError::Connect {
                socket: "/nonexistent/docker.sock".to_string(),
                message: "No such file or directory".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn inspect_image(&self, image: &str) -> EngineResult<Option<ImageDetails>> {
        self.check()?;
        Ok(self.images.lock().unwrap().get(image).cloned())
    }

    async fn pull_image(&self, image: &str) -> EngineResult<()> {
        self.check()?;
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.images
            .lock()
            .unwrap()
            .entry(image.to_string())
            .or_insert_with(|| ImageDetails {
                id: format!("sha256:{image}"),
                ..Default::default()
            });
        Ok(())
    }

    async fn build_image(&self, _context: Vec<u8>, options: &BuildOptions) -> EngineResult<()> {
        self.check()?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.images.lock().unwrap().insert(
            options.tag.clone(),
            ImageDetails {
                id: format!("sha256:{}", options.tag),
                labels: options.labels.clone().into_iter().collect(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn create_container(&self, name: &str, spec: &CreateContainer) -> EngineResult<String> {
        self.check()?;
        let mut created = self.created.lock().unwrap();
        created.push((name.to_string(), spec.clone()));
        Ok(format!("{:0>12}", created.len()))
    }

    async fn copy_to_container(&self, id: &str, dir: &str, _archive: Vec<u8>) -> EngineResult<()> {
        self.check()?;
        self.copies
            .lock()
            .unwrap()
            .push((id.to_string(), dir.to_string()));
        Ok(())
    }

    async fn copy_from_container(&self, _id: &str, path: &str) -> EngineResult<Vec<u8>> {
        self.check()?;
        if path != "/etc/hosts" {
            return Err(EngineError::NotFound(path.to_string()));
        }
        Ok(archive::single_file(
            "hosts",
            b"127.0.0.1\tlocalhost\n",
            FileMode::root(0o644),
        )?)
    }

    async fn attach(&self, _id: &str, _stdin: bool) -> EngineResult<Attached> {
        self.check()?;
        Ok(Attached {
            output: futures::stream::empty().boxed(),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn wait(&self, _id: &str) -> EngineResult<ExitWaiter> {
        self.check()?;
        let code = *self.exit_code.lock().unwrap();
        Ok(async move { Ok(code) }.boxed())
    }

    async fn start(&self, id: &str) -> EngineResult<()> {
        self.check()?;
        if self.refuse_start.load(Ordering::SeqCst) {
            return Err(Self::refused("start container"));
        }
        self.started.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn stop(&self, id: &str) -> EngineResult<()> {
        self.check()?;
        self.stopped.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str) -> EngineResult<()> {
        self.check()?;
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn kill(&self, _id: &str, _signal: i32) -> EngineResult<()> {
        self.check()
    }

    async fn resize(&self, _id: &str, _rows: u16, _cols: u16) -> EngineResult<()> {
        self.check()
    }

    async fn exec(&self, id: &str, options: &ExecOptions) -> EngineResult<Option<i64>> {
        self.check()?;
        if self.refuse_exec.load(Ordering::SeqCst) {
            return Err(Self::refused("create exec"));
        }
        self.execs
            .lock()
            .unwrap()
            .push((id.to_string(), options.cmd.clone()));
        if options.detach {
            return Ok(None);
        }
        Ok(Some(*self.exec_code.lock().unwrap()))
    }

    async fn list_containers(&self, name: &str) -> EngineResult<Vec<ContainerSummary>> {
        self.check()?;
        Ok(self
            .existing_names
            .lock()
            .unwrap()
            .iter()
            .filter(|existing| existing.contains(name))
            .enumerate()
            .map(|(i, existing)| ContainerSummary {
                id: format!("existing{i}"),
                names: vec![existing.clone()],
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails> {
        self.check()?;
        Ok(ContainerDetails {
            id: id.to_string(),
            running: true,
            gateway: Some("172.17.0.1".to_string()),
        })
    }

    async fn network_gateway(&self, _network: &str) -> EngineResult<Option<String>> {
        self.check()?;
        Ok(Some("172.17.0.1".to_string()))
    }

    async fn info(&self) -> EngineResult<EngineInfo> {
        self.check()?;
        Ok(EngineInfo {
            security_options: vec!["name=seccomp,profile=default".to_string()],
        })
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// A session rooted in `root`: the shared home, control directory and mapping directory
/// all live below it and nothing is brokered.
pub fn test_session(root: &Path, flags: HostFlags) -> Session {
    let control_dir = root.join("control");
    std::fs::create_dir_all(&control_dir).unwrap();
    // A non-empty authority file is used as is.
    std::fs::write(root.join("xauth"), b"cookie").unwrap();

    let mut host = HostEnvironment::with_vars([
        ("USER", "alice"),
        ("HOME", "/home/alice"),
        ("DISPLAY", ":0"),
        ("TZ", "Europe/Berlin"),
    ]);
    host.uid = 1000;
    host.gid = 1000;

    Session {
        host,
        flags,
        options: LaunchOptions::default(),
        endpoint: ControlEndpoint::inherited(None, Some(control_dir.clone()))
            .expect("control dir endpoint"),
        resolver: PathResolver::new(root.join("home")),
        paths: SessionPaths {
            xauth: root.join("xauth"),
            xorg_logs: root.join("xorg-logs"),
            mapping_dir: control_dir,
        },
    }
}
