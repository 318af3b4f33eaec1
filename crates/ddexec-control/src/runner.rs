use async_trait::async_trait;

/// Runs a shell command inside a sibling container.
///
/// The control plane has no engine client of its own; the host process plugs one in.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` through `/bin/sh -c` in `container_id` and return its exit code.
    async fn run_command(&self, container_id: &str, command: &str) -> anyhow::Result<i64>;
}
