//! # courier
//!
//! Command-line entry point: `courier serve` runs the relay, `courier request`
//! opens an HTTP request console over one persistent connection.

#![deny(unsafe_code)]

mod console;
mod request;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use courier_client::codec::HttpCodec;
use courier_client::transport::TcpTransport;
use courier_client::{Client, ClientConfig};
use courier_server::ServerConfig;
use courier_settings::{ClientSettings, CourierSettings, ServerSettings, SettingsError};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

/// Courier relay and request console.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Courier relay server and request console")]
struct Cli {
    /// Log level or filter directive (overrides settings; `RUST_LOG` wins).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay. `!` restarts it, an empty line quits.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        /// Maximum concurrent sessions.
        #[arg(long)]
        max_connections: Option<usize>,
    },
    /// Send HTTP requests typed as `<METHOD> <url> [body]`. `!` reconnects,
    /// an empty line quits.
    Request {
        /// `host:port` to connect to.
        #[arg(long)]
        address: Option<String>,
        /// Protocol to request in an `Upgrade` handshake.
        #[arg(long)]
        upgrade: Option<String>,
        /// Per-request timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

impl Cli {
    fn server_settings(
        host: Option<String>,
        port: Option<u16>,
        max: Option<usize>,
        base: &ServerSettings,
    ) -> ServerSettings {
        ServerSettings {
            host: host.unwrap_or_else(|| base.host.clone()),
            port: port.unwrap_or(base.port),
            max_connections: max.unwrap_or(base.max_connections),
            ..base.clone()
        }
    }

    fn client_settings(
        address: Option<String>,
        upgrade: Option<String>,
        timeout_ms: Option<u64>,
        base: &ClientSettings,
    ) -> ClientSettings {
        ClientSettings {
            address: address.unwrap_or_else(|| base.address.clone()),
            upgrade: upgrade.or_else(|| base.upgrade.clone()),
            request_timeout_ms: timeout_ms.or(base.request_timeout_ms),
            ..base.clone()
        }
    }
}

/// Loaded settings, or the defaults and the reason loading failed.
fn resolve_settings(
    loaded: courier_settings::Result<CourierSettings>,
) -> (CourierSettings, Option<SettingsError>) {
    match loaded {
        Ok(settings) => (settings, None),
        Err(e) => (CourierSettings::default(), Some(e)),
    }
}

fn init_logging(cli: &Cli, settings: &CourierSettings) {
    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    if cli.json_logs || settings.logging.json {
        courier_logging::init_json_subscriber(level);
    } else {
        courier_logging::init_subscriber(level);
    }
}

/// Cancelled on Ctrl-C.
fn quit_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
        }
        trigger.cancel();
    }));
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings first: they carry the log level. A rejected file is reported
    // once logging is up.
    let (settings, rejected) = resolve_settings(courier_settings::load_settings());
    init_logging(&cli, &settings);
    if let Some(e) = rejected {
        tracing::warn!(
            error = %e,
            field = ?e.field(),
            path = %courier_settings::settings_path().display(),
            "settings rejected, using defaults"
        );
    }
    let quit = quit_on_ctrl_c();
    let stdin = BufReader::new(tokio::io::stdin());

    match cli.command {
        Command::Serve {
            host,
            port,
            max_connections,
        } => {
            let server = Cli::server_settings(host, port, max_connections, &settings.server);
            let metrics = match courier_server::metrics::install_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "metrics disabled");
                    None
                }
            };
            let _ = serve::run(ServerConfig::from(&server), metrics, stdin, quit).await?;
        }
        Command::Request {
            address,
            upgrade,
            timeout_ms,
        } => {
            let client_settings =
                Cli::client_settings(address, upgrade, timeout_ms, &settings.client);
            let host = client_settings.address.clone();
            let mut codec = HttpCodec::new(host);
            if let Some(protocol) = &client_settings.upgrade {
                codec = codec.with_upgrade(protocol.clone());
            }
            let client = Client::new(
                TcpTransport::from_settings(&client_settings),
                codec,
                request::ConsoleHandler,
                ClientConfig::from(&client_settings),
            );
            let _ = request::run(client, stdin, tokio::io::stdout(), quit).await?;
        }
    }

    tracing::info!("bye");
    Ok(())
}
