//! Host signal forwarding.

use std::sync::Arc;

use futures::future::select_all;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::Engine;

/// Signals relayed to the container as engine kills.
pub fn forwarded_signals() -> [SignalKind; 6] {
    [
        SignalKind::hangup(),
        SignalKind::interrupt(),
        SignalKind::quit(),
        SignalKind::terminate(),
        SignalKind::user_defined1(),
        SignalKind::user_defined2(),
    ]
}

/// Relay host signals to `container_id` until cancelled.
pub fn spawn_forwarder(
    tasks: &mut JoinSet<()>,
    cancel: CancellationToken,
    engine: Arc<dyn Engine>,
    container_id: String,
) {
    let mut streams: Vec<(i32, Signal)> = Vec::new();
    for kind in forwarded_signals() {
        match signal(kind) {
            Ok(stream) => streams.push((kind.as_raw_value(), stream)),
            Err(e) => warn!("Cannot listen for signal {}: {}", kind.as_raw_value(), e),
        }
    }
    if streams.is_empty() {
        return;
    }

    tasks.spawn(async move {
        loop {
            let next = select_all(
                streams
                    .iter_mut()
                    .map(|(number, stream)| Box::pin(async move { stream.recv().await.map(|_| *number) })),
            );
            let number = tokio::select! {
                _ = cancel.cancelled() => return,
                (received, _, _) = next => received,
            };
            let Some(number) = number else {
                return;
            };

            debug!("Forwarding signal {} to {}", number, container_id);
            if let Err(e) = engine.kill(&container_id, number).await {
                if e.is_not_found() {
                    return;
                }
                warn!("Cannot forward signal {}: {}", number, e);
            }
        }
    });
}
