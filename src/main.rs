//! vibe-probe: connect to a Vibe endpoint over HTTP and talk to it.
//!
//! Opens one socket over the long-poll or streaming transport (picked from
//! the URI's `transport` parameter), logs every event, echoes `echo`
//! events back and resolves every reply-requiring event with its own data.
//!
//! Usage:
//!   vibe-probe --uri 'http://localhost:8080/vibe?transport=stream'
//!   vibe-probe --uri 'http://localhost:8080/vibe?transport=longpoll' --heartbeat 5000
//!   vibe-probe --uri ... --verbose --log-file         # ~/.vibe/logs/probe.log

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vibe_server::{Accepted, ServerConfig, ServerFactory, SocketEvent};
use vibe_transport::HttpConfig;

#[derive(Parser, Debug)]
#[command(name = "vibe-probe", about = "Vibe probe: exercise a Vibe endpoint over HTTP")]
struct Cli {
    /// Endpoint URI, including `transport=longpoll` or `transport=stream`
    #[arg(long)]
    uri: String,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "20000")]
    heartbeat: u64,

    /// Heartbeat acknowledgment timeout announced to the peer, in milliseconds
    #[arg(long, default_value = "5000")]
    handshake_timeout: u64,

    /// HTTP connect timeout in milliseconds
    #[arg(long, default_value = "10000")]
    connect_timeout: u64,

    /// Idle HTTP connections kept per host (unbounded if omitted)
    #[arg(long)]
    pool_max_idle: Option<usize>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.vibe/logs/probe.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(ref log_file_arg) = cli.log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    };

    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    let log_path = if log_file_arg == "DEFAULT" {
        PathBuf::from(&home).join(".vibe/logs/probe.log")
    } else {
        PathBuf::from(log_file_arg)
    };
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let http = HttpConfig {
        pool_max_idle_per_host: cli.pool_max_idle,
        connect_timeout: Some(Duration::from_millis(cli.connect_timeout)),
        ..HttpConfig::default()
    };
    let client = http.build_client().context("failed to build HTTP client")?;
    let (transport, transport_events) =
        vibe_transport::open(&cli.uri, client).with_context(|| format!("cannot open {}", cli.uri))?;

    let (factory, mut accepted) = ServerFactory::new(ServerConfig {
        heartbeat: Duration::from_millis(cli.heartbeat),
        handshake_timeout: Duration::from_millis(cli.handshake_timeout),
    });
    factory.handle(transport.clone(), transport_events);
    let Accepted { socket, mut events } = accepted
        .recv()
        .await
        .context("socket was not published")?;
    transport.connect();
    info!(uri = %cli.uri, "connecting");

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut closing = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SocketEvent::Open) => info!(id = ?socket.id(), "open"),
                Some(SocketEvent::Message(message)) => {
                    info!(event_type = %message.event_type, data = %message.data, "message");
                    if message.event_type == "echo" {
                        socket.send("echo", message.data.clone());
                    }
                    if let Some(reply) = message.reply {
                        reply.resolve(message.data);
                    }
                }
                Some(SocketEvent::Error(err)) => warn!("socket error: {err}"),
                Some(SocketEvent::Close) | None => {
                    info!("closed");
                    break;
                }
            },
            signal = &mut ctrl_c, if !closing => {
                closing = true;
                if let Err(err) = signal {
                    error!("failed to listen for Ctrl+C: {err}");
                }
                info!("shutting down");
                socket.close();
            }
        }
    }
    Ok(())
}
