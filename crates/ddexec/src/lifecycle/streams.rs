//! Output and input pumps of an attached container.

use std::io;
use std::pin::Pin;

use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{EngineResult, LogOutput, write_output};

/// Copy container output to the host until the container closes it.
pub fn spawn_output(output: BoxStream<'static, EngineResult<LogOutput>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();
        if let Err(e) = write_output(output, &mut stdout, &mut stderr).await {
            debug!("Output stream ended: {}", e);
        }
    })
}

/// Copy host stdin into the container until EOF or cancellation.
pub fn spawn_input(
    tasks: &mut JoinSet<()>,
    cancel: CancellationToken,
    writer: Pin<Box<dyn AsyncWrite + Send>>,
    stdin_tty: bool,
) {
    tasks.spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut writer = writer;
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = pump_input(&mut stdin, &mut writer, !stdin_tty) => {
                if let Err(e) = result {
                    debug!("Input stream ended: {}", e);
                }
            }
        }
    });
}

/// Copy `input` to `writer`; with `close_on_eof` the write side is shut down at EOF so
/// the container sees its stdin close.
pub async fn pump_input<R, W>(input: &mut R, writer: &mut W, close_on_eof: bool) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = tokio::io::copy(input, writer).await?;
    debug!("Input reached EOF after {} bytes", copied);
    if close_on_eof {
        writer.shutdown().await?;
    }
    Ok(())
}
