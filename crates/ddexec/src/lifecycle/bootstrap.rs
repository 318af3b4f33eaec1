//! Files copied into a created container before it starts.

use std::path::Path;

use regex::Regex;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::{LifecycleError, LifecycleResult};
use super::Session;
use crate::engine::Engine;
use crate::engine::archive::{self, FileMode};
use crate::model::Startup;

/// Where the running executable lands inside containers.
pub const EXECUTABLE_TARGET: &str = "/usr/local/bin/ddexec";

/// Copy identity files, the executable and the X authority into `container_id`.
pub async fn copy_files(
    engine: &dyn Engine,
    container_id: &str,
    startup: &Startup,
    session: &Session,
) -> LifecycleResult<()> {
    let host = &session.host;

    if !startup.keep_user {
        let passwd = read_host_file("/etc/passwd").await?;
        let passwd = rewrite_shell(&passwd, &host.user);
        copy(engine, container_id, "/etc/passwd", passwd.as_bytes(), FileMode::root(0o644)).await?;

        let group = read_host_file("/etc/group").await?;
        copy(engine, container_id, "/etc/group", group.as_bytes(), FileMode::root(0o644)).await?;

        let hash = match &startup.password_file {
            Some(path) => password_hash(path).await?,
            None => "!".to_string(),
        };
        let shadow = shadow_file(&host.user, &hash);
        copy(engine, container_id, "/etc/shadow", shadow.as_bytes(), FileMode::root(0o600)).await?;
    }

    match &host.executable {
        Some(exe) => {
            let contents = fs::read(exe)
                .await
                .map_err(|e| LifecycleError::bootstrap(&exe.to_string_lossy(), e))?;
            copy(engine, container_id, EXECUTABLE_TARGET, &contents, FileMode::root(0o755)).await?;
        }
        None => warn!("Cannot locate the running executable, not copying it"),
    }

    if !startup.desktop_mode {
        match host.var("DISPLAY") {
            Some(display) => {
                let xauth = &session.paths.xauth;
                prepare_xauth(xauth, display).await?;
                let contents = fs::read(xauth)
                    .await
                    .map_err(|e| LifecycleError::bootstrap(&xauth.to_string_lossy(), e))?;
                let mode = FileMode {
                    mode: 0o600,
                    uid: u64::from(host.uid),
                    gid: u64::from(host.gid),
                };
                copy(engine, container_id, &xauth.to_string_lossy(), &contents, mode).await?;
            }
            None => debug!("DISPLAY is not set, skipping X authority"),
        }
    }

    Ok(())
}

async fn read_host_file(path: &str) -> LifecycleResult<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| LifecycleError::bootstrap(path, e))
}

async fn copy(
    engine: &dyn Engine,
    container_id: &str,
    target: &str,
    contents: &[u8],
    mode: FileMode,
) -> LifecycleResult<()> {
    let path = Path::new(target);
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(LifecycleError::bootstrap(target, "not a file path"));
    };
    let tar = archive::single_file(&name.to_string_lossy(), contents, mode)?;
    engine
        .copy_to_container(container_id, &dir.to_string_lossy(), tar)
        .await
        .map_err(|e| LifecycleError::bootstrap(target, e))?;
    debug!("Copied {} ({} bytes)", target, contents.len());
    Ok(())
}

/// Set the login shell of `user` to `/bin/sh` in a passwd document.
pub fn rewrite_shell(passwd: &str, user: &str) -> String {
    let pattern = format!(r"(?m)^({}:.+:)[^:\n]*$", regex::escape(user));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(passwd, "${1}/bin/sh").into_owned(),
        Err(_) => passwd.to_string(),
    }
}

/// Shadow document holding `user` and a locked root.
pub fn shadow_file(user: &str, hash: &str) -> String {
    format!("{user}:{hash}::0:99999:7:::\nroot:!::0:99999:7:::\n")
}

/// Crypt string for the password stored in `path`.
async fn password_hash(path: &Path) -> LifecycleResult<String> {
    let display = path.to_string_lossy();
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| LifecycleError::bootstrap(&display, e))?;
    hash_password(content.trim())
        .map_err(|e| LifecycleError::bootstrap(&display, format!("{e:?}")))
}

/// SHA-512 crypt (`$6$`) of a plain password, which glibc and musl images both verify.
/// A value that already is a crypt string is kept.
pub fn hash_password(password: &str) -> Result<String, sha_crypt::CryptError> {
    if password.is_empty() {
        return Ok("!".to_string());
    }
    if password.starts_with('$') {
        return Ok(password.to_string());
    }
    let params = sha_crypt::Sha512Params::new(sha_crypt::ROUNDS_DEFAULT)?;
    sha_crypt::sha512_simple(password, &params)
}

/// Merge the display's cookie into `xauth` with a wildcard family, unless the file
/// already holds one.
async fn prepare_xauth(xauth: &Path, display: &str) -> LifecycleResult<()> {
    if let Ok(meta) = fs::metadata(xauth).await {
        if meta.len() > 0 {
            return Ok(());
        }
    }

    let target = xauth.to_string_lossy();
    let script = format!(
        "touch {file} && xauth nlist {display} | sed -e 's/^..../ffff/' | xauth -f {file} nmerge -",
        file = quote(&target),
        display = quote(display),
    );
    debug!("Preparing X authority: {}", script);
    let output = Command::new("sh")
        .arg("-c")
        .arg(&script)
        .output()
        .await
        .map_err(|e| LifecycleError::bootstrap(&target, e))?;
    if !output.status.success() {
        return Err(LifecycleError::bootstrap(
            &target,
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }
    Ok(())
}

fn quote(value: &str) -> String {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| value.to_string())
}
