//! `wsloop` echo server.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use wsloop::{Config, Connection, ConnectionId, Error, EventLoop, Handler, Message, Registry};

/// Single-threaded WebSocket echo server.
#[derive(Parser)]
#[command(name = "wsloop")]
#[command(version)]
struct Cli {
    /// Listening address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    address: String,

    /// Idle notification period in seconds
    #[arg(long, default_value_t = 60)]
    idle_secs: u64,

    /// Upper bound on a single socket read, in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    max_packet_size: usize,

    /// Largest accepted frame payload, in bytes
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    max_payload_size: usize,
}

/// Writes every received message back to its sender.
struct Echo;

impl Handler for Echo {
    fn on_connect(&mut self, registry: &mut Registry, id: ConnectionId) {
        if let Some(connection) = registry.get(id) {
            info!(%id, peer = %connection.peer_addr(), uri = connection.uri(), "client connected");
        }
    }

    fn on_disconnect(&mut self, _registry: &mut Registry, connection: &Connection) {
        info!(id = %connection.id(), "client disconnected");
    }

    fn on_receive(&mut self, registry: &mut Registry, id: ConnectionId, message: Message) {
        if let Err(e) = registry.send(id, message) {
            warn!(%id, error = %e, "echo failed");
        }
    }

    fn on_idle(&mut self, _registry: &mut Registry, id: ConnectionId) {
        debug!(%id, "heartbeat");
    }

    fn on_error(&mut self, _registry: &mut Registry, id: Option<ConnectionId>, error: &Error) {
        match id {
            Some(id) => warn!(%id, %error, "connection error"),
            None => error!(%error, "server error"),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn serve(cli: Cli) -> wsloop::Result<()> {
    let config = Config::new(cli.address)
        .with_idle_interval(Duration::from_secs(cli.idle_secs))
        .with_max_packet_size(cli.max_packet_size)
        .with_max_payload_size(cli.max_payload_size);

    let server = EventLoop::bind(config, Echo)?;
    server.install_signal_handlers()?;
    server.run()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match serve(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "wsloop exited");
            ExitCode::FAILURE
        }
    }
}
