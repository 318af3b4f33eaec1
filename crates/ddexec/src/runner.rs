//! Engine-backed command runner for the control plane.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ddexec_control::CommandRunner;
use tracing::debug;

use crate::engine::{Engine, ExecOptions};

/// Runs `/bin/sh -c <command>` in a sibling container through the engine.
pub struct EngineCommandRunner {
    engine: Arc<dyn Engine>,
}

impl EngineCommandRunner {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }
}

/// Exec options for a shell command with attached output.
pub fn shell_exec(command: &str) -> ExecOptions {
    ExecOptions {
        cmd: vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()],
        user: None,
        detach: false,
    }
}

#[async_trait]
impl CommandRunner for EngineCommandRunner {
    async fn run_command(&self, container_id: &str, command: &str) -> anyhow::Result<i64> {
        debug!("Running in {}: {}", container_id, command);
        let code = self
            .engine
            .exec(container_id, &shell_exec(command))
            .await
            .with_context(|| format!("exec in container {container_id}"))?;
        Ok(code.unwrap_or(1))
    }
}
