//! `courier request`: HTTP request console over one persistent connection.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use courier_client::codec::{HttpCodec, HttpResponse};
use courier_client::transport::Transport;
use courier_client::{
    Client, ClientError, ClientHandler, DisconnectReason, HandshakeResponse, ResponseFuture,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::console::{ClientCommand, parse_client_line};

/// How long quitting waits for outstanding responses.
const QUIT_GRACE: Duration = Duration::from_secs(5);

/// Logs connection lifecycle events.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleHandler;

impl ClientHandler<HttpResponse> for ConsoleHandler {
    fn on_connected(&self, response: Option<&HandshakeResponse>) {
        match response {
            Some(r) => info!(status = r.status, "connected (upgraded)"),
            None => info!("connected"),
        }
    }

    fn on_disconnected(&self, reason: &DisconnectReason) {
        match reason {
            DisconnectReason::Requested | DisconnectReason::Reconnect => {}
            other => warn!(reason = ?other, "disconnected; `!` reconnects"),
        }
    }

    fn on_error(&self, error: &ClientError) {
        warn!(error = %error, "client error");
    }
}

/// Run the console until it quits or `quit` fires. Responses are written to
/// `out` in submission order; `out` is handed back at the end.
pub async fn run<T, R, W>(
    client: Client<T, HttpCodec>,
    input: R,
    out: W,
    quit: CancellationToken,
) -> Result<W>
where
    T: Transport,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = client.connect_and_wait().await {
        warn!(error = %e, "connect failed; `!` retries");
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut printer = tokio::spawn(print_responses(rx, out));
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            () = quit.cancelled() => break,
            line = lines.next_line() => line.context("failed to read console")?,
        };
        let Some(line) = line else { break };
        match parse_client_line(&line) {
            Ok(ClientCommand::Quit) => break,
            Ok(ClientCommand::Reconnect) => {
                if let Err(e) = client.reconnect().await {
                    warn!(error = %e, "reconnect failed");
                }
            }
            Ok(ClientCommand::Request { method, url, body }) => {
                let label = format!("{method} {url}");
                match client.send_request(method, &url, body.map(Bytes::from)) {
                    Ok(pending) => {
                        let _ = tx.send((label, pending));
                    }
                    Err(e) => warn!(error = %e, request = %label, "request not sent"),
                }
            }
            Err(e) => warn!(error = %e, "bad command"),
        }
    }

    drop(tx);
    let printed = match tokio::time::timeout(QUIT_GRACE, &mut printer).await {
        Ok(printed) => printed,
        Err(_) => {
            info!("giving up on outstanding responses");
            client.disconnect().await;
            printer.await
        }
    };
    client.disconnect().await;
    printed.context("response printer failed")?
}

async fn print_responses<W>(
    mut rx: mpsc::UnboundedReceiver<(String, ResponseFuture<HttpResponse>)>,
    mut out: W,
) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some((label, pending)) = rx.recv().await {
        let text = match pending.await {
            Ok(response) => format_response(&response),
            Err(e) => format!("{label}: {e}\n"),
        };
        out.write_all(text.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(out)
}

fn format_response(response: &HttpResponse) -> String {
    let mut text = format!("{} {}\n", response.status.as_u16(), response.reason);
    for (name, value) in &response.headers {
        text.push_str(&format!("{name}: {}\n", String::from_utf8_lossy(value.as_bytes())));
    }
    if !response.body.is_empty() {
        text.push('\n');
        text.push_str(&response.body_text());
        if !text.ends_with('\n') {
            text.push('\n');
        }
    }
    text
}
