use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use streamgate::PeerId;
use streamgate::server::net::{TcpTransport, Transport};
use streamgate::server::{
    DataChannelHandler, OrchestratorConfig, OrchestratorEvent, OrchestratorMode, RelayClient,
    SessionOrchestrator, SignalingClient, WebRtcConfig,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "streamgate-node")]
#[command(about = "Expose a stream to remote viewers through a signaling relay")]
struct Cli {
    /// Path to webrtcConfig.json
    #[arg(short, long, global = true, default_value = "webrtcConfig.json", env = "STREAMGATE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to the relay and serve viewers until Ctrl-C.
    Serve {
        #[arg(short, long, default_value = "renderingserver")]
        name: String,

        /// Overrides `server` from the config file.
        #[arg(long)]
        server: Option<String>,

        /// Overrides `port` from the config file.
        #[arg(long)]
        port: Option<u16>,

        #[arg(long, value_enum, default_value_t = Mode::Multi)]
        mode: Mode,

        /// Offer a session to this peer as soon as we are signed in.
        #[arg(long)]
        call: Option<i32>,
    },

    /// Print which parts of the configuration are usable.
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Multi,
    Single,
}

impl From<Mode> for OrchestratorMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Multi => OrchestratorMode::MultiPeer,
            Mode::Single => OrchestratorMode::SinglePeer,
        }
    }
}

struct InputLogger;

#[async_trait]
impl DataChannelHandler for InputLogger {
    async fn on_data_channel_message(&self, peer_id: PeerId, text: String) {
        tracing::info!("Input from {}: {}", peer_id, text);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    println!("{} {}", "Loading".yellow(), cli.config.display());
    let mut config = WebRtcConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Check => check(&config),
        Commands::Serve {
            name,
            server,
            port,
            mode,
            call,
        } => {
            if let Some(server) = server {
                config.server = server;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config, name, mode.into(), call.map(PeerId)).await
        }
    }
}

fn status(label: &str, configured: bool) {
    let state = if configured {
        "OK".green().bold()
    } else {
        "Not configured".dimmed()
    };
    println!("   {:<16} {}", label, state);
}

fn check(config: &WebRtcConfig) -> Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport);

    status("Signaling", !config.server.is_empty());
    let auth = config
        .authentication_provider(transport.clone())
        .context("Invalid authentication settings")?;
    status("Authentication", auth.is_some());
    let turn = config
        .turn_provider(transport)
        .context("Invalid TURN settings")?;
    status("TURN", turn.is_some());
    status("ICE", !config.ice_configuration.is_empty());
    Ok(())
}

async fn serve(
    config: WebRtcConfig,
    name: String,
    mode: OrchestratorMode,
    call: Option<PeerId>,
) -> Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport);
    let authentication = config
        .authentication_provider(transport.clone())
        .context("Invalid authentication settings")?;
    let turn = config
        .turn_provider(transport.clone())
        .context("Invalid TURN settings")?;

    let heartbeat = Some(Duration::from_millis(config.heartbeat));
    let (relay, relay_rx) = RelayClient::new(transport, heartbeat);
    let signaling: Arc<dyn SignalingClient> = Arc::new(relay);

    let orchestrator_config = OrchestratorConfig {
        mode,
        webrtc: config,
        ..Default::default()
    };
    let (mut orchestrator, handle) =
        SessionOrchestrator::new(orchestrator_config, signaling, relay_rx);
    orchestrator = orchestrator.with_data_channel_handler(Arc::new(InputLogger));

    if let Some(turn) = turn {
        if let Some(auth) = &authentication {
            turn.set_authentication_provider(auth.clone());
        }
        orchestrator = orchestrator.with_turn_provider(turn);
    }
    if let Some(auth) = authentication {
        orchestrator = orchestrator.with_authentication(auth);
    }

    let mut events = handle.subscribe();
    let runner = tokio::spawn(orchestrator.run());
    handle.connect(name).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Shutting down...".yellow());
                break;
            }
            event = events.recv() => match event {
                Ok(OrchestratorEvent::SignedIn(id)) => {
                    println!("{} signed in as {}", "OK".green().bold(), id);
                    if let Some(peer) = call {
                        handle.connect_to_peer(peer).await;
                    }
                }
                Ok(OrchestratorEvent::ConnectFailed(reason)) => {
                    println!("{} {}", "Failed".red().bold(), reason);
                    break;
                }
                Ok(OrchestratorEvent::PeerConnected(id, peer_name)) => {
                    println!("   {} {} ({})", "+".green(), peer_name, id);
                }
                Ok(OrchestratorEvent::PeerDisconnected(id)) => {
                    println!("   {} {}", "-".red(), id);
                }
                Ok(OrchestratorEvent::SessionStateChanged(id, state)) => {
                    println!("   {} {:?}", id.to_string().cyan(), state);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    handle.close().await;
    runner.await.context("Orchestrator task panicked")?;
    Ok(())
}
