//! Console line grammar.
//!
//! Server console: `!` restarts, an empty line quits.
//! Request console: `<METHOD> <url> [body]` submits, `!` reconnects, an empty
//! line quits.

use courier_client::codec::{Method, parse_method};
use courier_core::constants::CONSOLE_RESTART;
use thiserror::Error;

/// One server console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Shut down and listen again.
    Restart,
    /// Shut down and exit.
    Quit,
    /// Anything else.
    Unknown(String),
}

/// One request console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Drop the link and open a new one.
    Reconnect,
    /// Disconnect and exit.
    Quit,
    /// Submit a request.
    Request {
        /// Request method.
        method: Method,
        /// Target URL or path.
        url: String,
        /// Rest of the line, if any.
        body: Option<String>,
    },
}

/// Unparseable request console line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    /// Method given without a URL.
    #[error("usage: <METHOD> <url> [body]")]
    MissingUrl,
    /// Not a known request method.
    #[error("unknown method {0:?}")]
    UnknownMethod(String),
}

/// Parse a server console line.
pub fn parse_server_line(line: &str) -> ServerCommand {
    match line.trim() {
        "" => ServerCommand::Quit,
        CONSOLE_RESTART => ServerCommand::Restart,
        other => ServerCommand::Unknown(other.to_owned()),
    }
}

/// Parse a request console line.
pub fn parse_client_line(line: &str) -> Result<ClientCommand, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ClientCommand::Quit);
    }
    if line == CONSOLE_RESTART {
        return Ok(ClientCommand::Reconnect);
    }

    let (method, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let method =
        parse_method(method).map_err(|_| ConsoleError::UnknownMethod(method.to_owned()))?;
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Err(ConsoleError::MissingUrl);
    }
    let (url, body) = match rest.split_once(char::is_whitespace) {
        Some((url, body)) => (url, Some(body.trim_start().to_owned())),
        None => (rest, None),
    };
    Ok(ClientCommand::Request {
        method,
        url: url.to_owned(),
        body: body.filter(|b| !b.is_empty()),
    })
}
