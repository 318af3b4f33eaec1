//! `/etc/hosts` patching after start.
//!
//! Every container learns `ddexec.local` as the bridge gateway plus the configured
//! hostname mappings. The patch runs in the background and never fails the launch.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::archive::{self, FileMode};
use crate::engine::{Engine, EngineResult, ExecOptions};

pub const LOCAL_HOSTNAME: &str = "ddexec.local";
const HOSTS_PATH: &str = "/etc/hosts";
const FALLBACK_NETWORK: &str = "bridge";

/// How the hosts file was changed, recorded in the appended comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMethod {
    Copy,
    Echo,
}

impl PatchMethod {
    fn label(self) -> &'static str {
        match self {
            PatchMethod::Copy => "copy",
            PatchMethod::Echo => "sh+echo",
        }
    }
}

/// Text appended to `/etc/hosts`. A mapping target of `host` means the gateway.
pub fn hosts_addition(
    gateway: &str,
    hostnames: &[(String, String)],
    method: PatchMethod,
) -> String {
    let mut text = format!(
        "\n\n# Changed by ddexec with {}\n\n{gateway}  {LOCAL_HOSTNAME}\n\n",
        method.label()
    );
    for (name, target) in hostnames {
        let target = if target == "host" { gateway } else { target.as_str() };
        text.push_str(&format!("{target}  {name}\n"));
    }
    text
}

pub fn spawn_patch(
    tasks: &mut JoinSet<()>,
    cancel: CancellationToken,
    engine: Arc<dyn Engine>,
    container_id: String,
    hostnames: Vec<(String, String)>,
) {
    tasks.spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = patch(engine.as_ref(), &container_id, &hostnames) => {}
        }
    });
}

async fn patch(engine: &dyn Engine, container_id: &str, hostnames: &[(String, String)]) {
    let gateway = match gateway(engine, container_id).await {
        Ok(Some(gateway)) => gateway,
        Ok(None) => {
            debug!("No gateway for {}, leaving {} alone", container_id, HOSTS_PATH);
            return;
        }
        Err(e) if e.is_not_found() => return,
        Err(e) => {
            warn!("Cannot find the gateway of {}: {}", container_id, e);
            return;
        }
    };

    let addition = hosts_addition(&gateway, hostnames, PatchMethod::Copy);
    match copy_patch(engine, container_id, &addition).await {
        Ok(()) => {
            info!("Patched {} of {}", HOSTS_PATH, container_id);
            return;
        }
        Err(e) if e.is_not_found() => return,
        Err(e) => debug!("Copying {} failed, falling back to exec: {}", HOSTS_PATH, e),
    }

    let addition = hosts_addition(&gateway, hostnames, PatchMethod::Echo);
    let quoted = shlex::try_quote(&addition)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{}'", addition.replace(['\0', '\''], "")));
    let exec = ExecOptions {
        cmd: vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo {quoted} >> {HOSTS_PATH}"),
        ],
        user: Some("0".to_string()),
        detach: true,
    };
    match engine.exec(container_id, &exec).await {
        Ok(_) => debug!("Patched {} of {} with exec", HOSTS_PATH, container_id),
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!("Cannot patch {} of {}: {}", HOSTS_PATH, container_id, e),
    }
}

async fn gateway(engine: &dyn Engine, container_id: &str) -> EngineResult<Option<String>> {
    let details = engine.inspect_container(container_id).await?;
    if !details.running {
        return Ok(None);
    }
    if let Some(gateway) = details.gateway.filter(|g| !g.is_empty()) {
        return Ok(Some(gateway));
    }
    engine.network_gateway(FALLBACK_NETWORK).await
}

async fn copy_patch(engine: &dyn Engine, container_id: &str, addition: &str) -> EngineResult<()> {
    let archive_bytes = engine.copy_from_container(container_id, HOSTS_PATH).await?;
    let mut hosts = archive::first_file(&archive_bytes)?;
    hosts.extend_from_slice(addition.as_bytes());
    let tar = archive::single_file("hosts", &hosts, FileMode::root(0o644))?;
    engine.copy_to_container(container_id, "/etc", tar).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosts_addition() {
        let hostnames = vec![
            ("printer".to_string(), "10.0.0.5".to_string()),
            ("api".to_string(), "host".to_string()),
        ];
        assert_eq!(
            hosts_addition("172.17.0.1", &hostnames, PatchMethod::Copy),
            "\n\n# Changed by ddexec with copy\n\n\
             172.17.0.1  ddexec.local\n\n\
             10.0.0.5  printer\n\
             172.17.0.1  api\n"
        );
    }

    #[test]
    fn test_hosts_addition_without_mappings() {
        let text = hosts_addition("10.1.0.1", &[], PatchMethod::Echo);
        assert_eq!(
            text,
            "\n\n# Changed by ddexec with sh+echo\n\n10.1.0.1  ddexec.local\n\n"
        );
    }
}
