//! `xdg-open` stand-in: route a URL or file to the container that registered a handler
//! for its MIME type.
//!
//! Exit codes: 0 success, 1 malformed URL, 2 missing file, 3 no handler, 4 anything
//! else, including an unknown file type and an unreadable handler registry.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use ddexec_control::ControlClient;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::registry::MappingRegistry;
use crate::runner::shell_exec;

pub const EXIT_OK: i32 = 0;
pub const EXIT_MALFORMED_URL: i32 = 1;
pub const EXIT_MISSING_FILE: i32 = 2;
pub const EXIT_NO_HANDLER: i32 = 3;
pub const EXIT_FAILED: i32 = 4;

const ARG_PLACEHOLDER: &str = "<arg>";

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*$").expect("valid scheme regex"));

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    #[error("No such file: {0}")]
    MissingFile(String),

    #[error("Unknown MIME type for {0}")]
    UnknownType(String),

    #[error("No handler registered for {0}")]
    NoHandler(String),

    #[error("Handler failed: {0}")]
    Failed(String),
}

impl DispatchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DispatchError::MalformedUrl(_) => EXIT_MALFORMED_URL,
            DispatchError::MissingFile(_) => EXIT_MISSING_FILE,
            DispatchError::NoHandler(_) => EXIT_NO_HANDLER,
            DispatchError::UnknownType(_) | DispatchError::Failed(_) => EXIT_FAILED,
        }
    }
}

/// MIME type of a URL (`x-scheme-handler/<scheme>`) or of an existing file.
pub fn mime_type(target: &str) -> Result<String, DispatchError> {
    if let Some((scheme, _)) = target.split_once("://") {
        if !URL_SCHEME.is_match(scheme) {
            return Err(DispatchError::MalformedUrl(target.to_string()));
        }
        return Ok(format!("x-scheme-handler/{}", scheme.to_ascii_lowercase()));
    }

    let path = Path::new(target);
    if !path.exists() {
        return Err(DispatchError::MissingFile(target.to_string()));
    }
    mime_guess::from_path(path)
        .first_raw()
        .and_then(|mime| mime.split(';').next())
        .map(|mime| mime.trim().to_string())
        .filter(|mime| !mime.is_empty())
        .ok_or_else(|| DispatchError::UnknownType(target.to_string()))
}

/// Substitute every `<arg>` with the shell-quoted target.
pub fn render(template: &str, target: &str) -> String {
    let quoted = shlex::try_quote(target)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{}'", target.replace(['\0', '\''], "")));
    template.replace(ARG_PLACEHOLDER, &quoted)
}

pub struct Dispatcher {
    engine: Arc<dyn Engine>,
    registry: MappingRegistry,
    control: Option<ControlClient>,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn Engine>,
        registry: MappingRegistry,
        control: Option<ControlClient>,
    ) -> Self {
        Self {
            engine,
            registry,
            control,
        }
    }

    /// Open `target` and return the process exit code.
    pub async fn invoke(&self, target: &str) -> i32 {
        match self.open(target).await {
            Ok(()) => EXIT_OK,
            Err(e) => {
                warn!("{}", e);
                e.exit_code()
            }
        }
    }

    pub async fn open(&self, target: &str) -> Result<(), DispatchError> {
        let mime = mime_type(target)?;
        debug!("{} has MIME type {}", target, mime);

        let mapping = match self.registry.find(&mime).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => return Err(DispatchError::NoHandler(mime)),
            Err(e) => {
                return Err(DispatchError::Failed(format!(
                    "cannot read {}: {}",
                    self.registry.directory().display(),
                    e
                )));
            }
        };

        let command = render(&mapping.template, target);
        info!("Opening with {} in {}", command, mapping.container_id);

        let code = match self
            .engine
            .exec(&mapping.container_id, &shell_exec(&command))
            .await
        {
            Ok(code) => code.unwrap_or(0),
            Err(e) if e.is_not_found() => return Err(DispatchError::Failed(e.to_string())),
            Err(e) => {
                let Some(client) = &self.control else {
                    return Err(DispatchError::Failed(e.to_string()));
                };
                debug!("Engine exec failed, using the control plane: {}", e);
                client
                    .run_command(&mapping.container_id, &command)
                    .await
                    .map_err(|e| DispatchError::Failed(e.to_string()))?
            }
        };

        if code == 0 {
            Ok(())
        } else {
            Err(DispatchError::Failed(format!("{command} exited with {code}")))
        }
    }
}

pub fn usage(program: &str) -> String {
    format!(
        "Usage: {program} <url | file>\n\
         \n\
         Open a URL or file with the handler a running ddexec container registered\n\
         for its MIME type.\n\
         \n\
         Exit codes:\n\
         \x20 {EXIT_OK}  success\n\
         \x20 {EXIT_MALFORMED_URL}  malformed URL\n\
         \x20 {EXIT_MISSING_FILE}  file does not exist\n\
         \x20 {EXIT_NO_HANDLER}  no handler for the MIME type\n\
         \x20 {EXIT_FAILED}  unknown file type, unreadable handler list or failed handler\n"
    )
}

pub fn version(program: &str) -> String {
    format!("{program} (ddexec) {}", crate::lifecycle::VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_url_mime_type() {
        assert_eq!(
            mime_type("https://example.com").unwrap(),
            "x-scheme-handler/https"
        );
        assert_eq!(
            mime_type("svn+ssh://host/repo").unwrap(),
            "x-scheme-handler/svn+ssh"
        );
        assert_eq!(
            mime_type("1http://x").unwrap_err(),
            DispatchError::MalformedUrl("1http://x".into())
        );
        assert_eq!(mime_type("://x").unwrap_err().exit_code(), EXIT_MALFORMED_URL);
    }

    #[test]
    fn test_file_mime_type() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("paper.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        assert_eq!(mime_type(&pdf.to_string_lossy()).unwrap(), "application/pdf");

        let unknown = dir.path().join("blob.zzunknown");
        std::fs::write(&unknown, b"").unwrap();
        assert_eq!(
            mime_type(&unknown.to_string_lossy()).unwrap_err().exit_code(),
            EXIT_FAILED
        );

        let missing = dir.path().join("missing.txt");
        assert_eq!(
            mime_type(&missing.to_string_lossy()).unwrap_err().exit_code(),
            EXIT_MISSING_FILE
        );
    }

    #[test]
    fn test_render_quotes_argument() {
        assert_eq!(
            render("chrome <arg>", "https://example.com"),
            "chrome https://example.com"
        );

        let rendered = render("vim <arg> --", "my notes.txt");
        assert_eq!(shlex::split(&rendered).unwrap(), vec!["vim", "my notes.txt", "--"]);

        let rendered = render("evince <arg>", "it's; rm -rf ~");
        assert_eq!(shlex::split(&rendered).unwrap(), vec!["evince", "it's; rm -rf ~"]);
    }
}
