//! `courier serve`: run the relay under a restartable console.

use anyhow::{Context, Result};
use courier_server::{CourierServer, ServerConfig};
use courier_server::metrics::PrometheusHandle;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::console::{ServerCommand, parse_server_line};

/// Serve until the console quits or `quit` fires. Returns how many times the
/// server was started.
pub async fn run<R>(
    config: ServerConfig,
    metrics: Option<PrometheusHandle>,
    input: R,
    quit: CancellationToken,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut starts = 0;

    loop {
        let mut server = CourierServer::new(config.clone());
        if let Some(handle) = &metrics {
            server = server.with_metrics(handle.clone());
        }
        let (addr, handle) = server
            .listen()
            .await
            .with_context(|| format!("failed to bind {}", config.bind_address()))?;
        starts += 1;
        info!(%addr, "relay listening on ws://{addr}/ws");

        let restart = loop {
            let line = tokio::select! {
                () = quit.cancelled() => break false,
                line = lines.next_line() => line.context("failed to read console")?,
            };
            match line.as_deref().map_or(ServerCommand::Quit, parse_server_line) {
                ServerCommand::Restart => break true,
                ServerCommand::Quit => break false,
                ServerCommand::Unknown(other) => {
                    warn!(line = %other, "unknown command; `!` restarts, empty line quits");
                }
            }
        };

        info!(sessions = server.directory().len(), "shutting down relay");
        server.shutdown().graceful_shutdown(vec![handle], None).await;
        if !restart {
            return Ok(starts);
        }
        info!("restarting relay");
    }
}
