//! Helios Node - command line client for the solar tracker panel controller
//!
//! This binary drives a panel controller over a serial link:
//! - `ports` lists candidate serial ports
//! - `monitor` polls telemetry, logs it, optionally mirrors it over HTTP
//!   and serves a small status API
//! - `send` issues one command and prints the resulting frame as JSON

mod commands;
mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use helios_core::{ChargeState, FieldSchema};
use helios_link::config::DEFAULT_BAUD_RATE;
use helios_link::test_utils::{DeviceSimulator, MockLink};
use helios_link::{
    LatestTelemetry, LogConsumer, PanelLink, PollMode, Poller, PortResolver, Session,
    SessionConfig, SessionHandle, SessionWorker, StateDistributor, SystemPortResolver,
};
use helios_mirror::{MirrorClient, MirrorConfig, MirrorConsumer, DEFAULT_UPLOAD_QUEUE};

use commands::PanelCommand;

/// Port name used with `--simulate` when none is given
const SIMULATED_PORT: &str = "sim0";

#[derive(Parser)]
#[command(name = "helios-node")]
#[command(about = "Serial client for the Helios solar tracker panel controller")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Talk to a built-in simulated controller instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// List serial ports that could host the controller
    Ports,

    /// Poll the controller and distribute its telemetry
    Monitor {
        #[command(flatten)]
        link: LinkArgs,

        /// Time between polls (1s-10s)
        #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
        poll_interval: Duration,

        /// Wait for frames the controller sends on its own instead of requesting them
        #[arg(long)]
        listen: bool,

        /// Mirror every record to this HTTP endpoint
        #[arg(long, env = "HELIOS_MIRROR_URL")]
        mirror_url: Option<String>,

        /// Status API port (disabled if unset)
        #[arg(long)]
        http_port: Option<u16>,
    },

    /// Send one command and print the reply
    Send {
        #[command(flatten)]
        link: LinkArgs,

        #[command(subcommand)]
        command: PanelCommand,
    },
}

#[derive(clap::Args, Clone)]
struct LinkArgs {
    /// Serial port (defaults to the highest numbered detected port)
    #[arg(long, short, env = "HELIOS_PORT")]
    port: Option<String>,

    /// Baud rate
    #[arg(long, short, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Time to wait for a frame
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// JSON file with a custom telemetry layout
    #[arg(long)]
    schema: Option<PathBuf>,
}

/// Application state shared across handlers
pub struct AppState {
    /// Handle to the session worker
    pub handle: SessionHandle,
    /// Last distributed record
    pub latest: Arc<LatestTelemetry>,
    /// Node start time
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.mode {
        Mode::Ports => list_ports(args.simulate),
        mode if args.simulate => {
            info!("Using simulated controller");
            run(MockLink::new().with_device(DeviceSimulator::new()), mode, true).await
        }
        mode => run_serial(mode).await,
    }
}

#[cfg(feature = "serial")]
async fn run_serial(mode: Mode) -> anyhow::Result<()> {
    run(helios_link::interface::SerialLink::new(), mode, false).await
}

#[cfg(not(feature = "serial"))]
async fn run_serial(_mode: Mode) -> anyhow::Result<()> {
    anyhow::bail!("built without serial support; rebuild with `--features serial` or pass --simulate")
}

fn list_ports(simulate: bool) -> anyhow::Result<()> {
    if simulate {
        println!("{SIMULATED_PORT}\tsimulated");
        return Ok(());
    }

    let resolver = SystemPortResolver::new();
    let ports = resolver.list_ports();
    if ports.is_empty() {
        warn!("No serial ports found");
        return Ok(());
    }
    let default = resolver.default_port();
    for port in ports {
        let marker = if default.as_deref() == Some(port.path.as_str()) {
            " (default)"
        } else {
            ""
        };
        let product = port.product_name.as_deref().unwrap_or("");
        println!("{}\t{}\t{}{}", port.path, port.port_type, product, marker);
    }
    Ok(())
}

async fn run<L: PanelLink + 'static>(link: L, mode: Mode, simulate: bool) -> anyhow::Result<()> {
    match mode {
        Mode::Ports => list_ports(simulate),
        Mode::Monitor {
            link: link_args,
            poll_interval,
            listen,
            mirror_url,
            http_port,
        } => {
            let config = link_args.session_config(Some(poll_interval), simulate)?;
            let schema = load_schema(link_args.schema.as_deref())?;
            let session = Session::new(link, config.clone()).with_schema(schema);
            let mode = if listen { PollMode::Listen } else { PollMode::Request };
            monitor(session, config, mode, mirror_url, http_port).await
        }
        Mode::Send {
            link: link_args,
            command,
        } => {
            let config = link_args.session_config(None, simulate)?;
            let schema = load_schema(link_args.schema.as_deref())?;
            let session = Session::new(link, config.clone()).with_schema(schema);
            send_once(session, config, command).await
        }
    }
}

impl LinkArgs {
    fn session_config(
        &self,
        poll_interval: Option<Duration>,
        simulate: bool,
    ) -> anyhow::Result<SessionConfig> {
        let port = match (&self.port, simulate) {
            (Some(port), _) => port.clone(),
            (None, true) => SIMULATED_PORT.to_string(),
            (None, false) => SystemPortResolver::new()
                .default_port()
                .context("no serial port found; pass --port")?,
        };

        let mut builder = SessionConfig::builder()
            .port(port)
            .baud_rate(self.baud)
            .timeout(self.timeout);
        if let Some(interval) = poll_interval {
            builder = builder.poll_interval(interval);
        }
        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn load_schema(path: Option<&Path>) -> anyhow::Result<FieldSchema> {
    let Some(path) = path else {
        return Ok(FieldSchema::standard());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema {}", path.display()))?;
    let schema: FieldSchema = serde_json::from_str(&text)
        .with_context(|| format!("invalid schema {}", path.display()))?;
    info!(
        "Loaded schema with {} fields ({} bytes)",
        schema.len(),
        schema.payload_len()
    );
    Ok(schema)
}

async fn monitor<L: PanelLink + 'static>(
    session: Session<L>,
    config: SessionConfig,
    mode: PollMode,
    mirror_url: Option<String>,
    http_port: Option<u16>,
) -> anyhow::Result<()> {
    let distributor = Arc::new(StateDistributor::new());
    distributor.register(Arc::new(LogConsumer));
    let latest = Arc::new(LatestTelemetry::new());
    distributor.register(latest.clone());

    let uploads = match mirror_url {
        Some(url) => {
            let client = MirrorClient::new(&MirrorConfig::new(url))?;
            info!("Mirroring telemetry to {}", client.frames_url());
            let (consumer, task) = MirrorConsumer::spawn(client, DEFAULT_UPLOAD_QUEUE);
            distributor.register(Arc::new(consumer));
            Some(task)
        }
        None => None,
    };

    let (handle, worker) = SessionWorker::spawn(session, distributor);
    handle
        .connect()
        .await
        .with_context(|| format!("failed to open {}", config.port.as_deref().unwrap_or("?")))?;
    info!(
        "Connected to {} at {} baud",
        config.port.as_deref().unwrap_or("?"),
        config.baud_rate
    );

    let poller = Poller::new(handle.clone(), config.poll_interval)
        .mode(mode)
        .spawn();

    let server = match http_port {
        Some(port) => {
            let state = Arc::new(AppState {
                handle: handle.clone(),
                latest,
                start_time: Instant::now(),
            });
            let app = server::create_router(state);
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
            info!("Status API listening on http://{}", listener.local_addr()?);
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    warn!("Status API stopped: {}", e);
                }
            }))
        }
        None => None,
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    poller.abort();
    if let Some(server) = server {
        server.abort();
    }
    if let Ok(stats) = handle.stats().await {
        info!(
            "Sent {} commands, decoded {} frames ({} errors, {} timeouts)",
            stats.session.commands_sent,
            stats.session.frames_decoded,
            stats.session.frame_errors,
            stats.session.timeouts
        );
    }
    handle.shutdown().await?;
    worker.await?;

    if let Some(uploads) = uploads {
        let stats = uploads.await?;
        info!("Mirrored {} records, {} failed", stats.uploaded, stats.failed);
    }
    Ok(())
}

async fn send_once<L: PanelLink>(
    mut session: Session<L>,
    config: SessionConfig,
    command: PanelCommand,
) -> anyhow::Result<()> {
    let command = command.to_command();
    session.connect(config).await?;
    let reply = session.send_command(&command).await;
    session.disconnect().await?;

    match reply? {
        Some(record) => {
            let output = serde_json::json!({
                "charge_state": ChargeState::from_record(&record),
                "fields": record,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        None => warn!("No reply within {}", humantime::format_duration(session.config().timeout)),
    }
    Ok(())
}
