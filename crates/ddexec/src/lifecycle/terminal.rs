//! Host terminal mode and size handling.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustix::termios::{self, OptionalActions, Termios};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::Engine;

const RESIZE_ATTEMPTS: usize = 5;
const RESIZE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Raw mode on the host stdin, restored on drop.
pub struct RawTerminal {
    saved: Option<Termios>,
}

impl RawTerminal {
    pub fn enable() -> io::Result<Self> {
        let stdin = io::stdin();
        let saved = termios::tcgetattr(&stdin)?;
        let mut raw = saved.clone();
        raw.make_raw();
        termios::tcsetattr(&stdin, OptionalActions::Now, &raw)?;
        debug!("Terminal switched to raw mode");
        Ok(Self { saved: Some(saved) })
    }

    /// Put the saved mode back.
    pub fn restore(mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = termios::tcsetattr(io::stdin(), OptionalActions::Now, &saved) {
                warn!("Cannot restore terminal mode: {}", e);
            }
        }
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        self.reset();
    }
}

fn host_size() -> Option<(u16, u16)> {
    termios::tcgetwinsize(io::stdout())
        .ok()
        .filter(|ws| ws.ws_row > 0 && ws.ws_col > 0)
        .map(|ws| (ws.ws_row, ws.ws_col))
}

/// Re-apply the host terminal size so the shell redraws after the container detaches.
pub fn reapply_host_size() {
    let stdout = io::stdout();
    match termios::tcgetwinsize(&stdout) {
        Ok(ws) => {
            if let Err(e) = termios::tcsetwinsize(&stdout, ws) {
                debug!("Cannot re-apply terminal size: {}", e);
            }
        }
        Err(e) => debug!("Cannot read terminal size: {}", e),
    }
}

/// Push the host size to the container now and on every `SIGWINCH`.
pub fn spawn_resize_monitor(
    tasks: &mut JoinSet<()>,
    cancel: CancellationToken,
    engine: Arc<dyn Engine>,
    container_id: String,
) {
    tasks.spawn(async move {
        // The TTY may not be ready right after start.
        for attempt in 1..=RESIZE_ATTEMPTS {
            if cancel.is_cancelled() {
                return;
            }
            let Some((rows, cols)) = host_size() else {
                break;
            };
            match engine.resize(&container_id, rows, cols).await {
                Ok(()) => break,
                Err(e) => {
                    debug!("Initial resize attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(RESIZE_RETRY_DELAY).await;
                }
            }
        }

        let mut winch = match signal(SignalKind::window_change()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot watch terminal resizes: {}", e);
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                received = winch.recv() => {
                    if received.is_none() {
                        return;
                    }
                    if let Some((rows, cols)) = host_size() {
                        if let Err(e) = engine.resize(&container_id, rows, cols).await {
                            debug!("Resize to {}x{} failed: {}", cols, rows, e);
                        }
                    }
                }
            }
        }
    });
}
