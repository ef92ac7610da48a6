//! KVS peer binary entry point
//!
//! Joins a Kinesis Video signaling channel as master or viewer and logs the
//! session as it negotiates. No media is captured; the peer only receives.
//!
//! # Usage
//!
//! ```bash
//! export AWS_ACCESS_KEY_ID=... AWS_SECRET_ACCESS_KEY=...
//!
//! # Join as viewer
//! cargo run --bin kvs-peer -- --role viewer --channel demo --region us-west-2
//!
//! # Join as master with tuned options
//! cargo run --bin kvs-peer -- --role master --channel demo --options ./kvs.yaml
//! ```

use clap::Parser;
use remotemedia_kvs_webrtc::{
    Credentials, EngineOptions, EngineState, NegotiationEngine, Role, SessionConfig,
};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// KVS WebRTC peer
///
/// Credentials are read from AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY and
/// (optionally) AWS_SESSION_TOKEN.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Role on the channel
    #[arg(short, long, default_value = "viewer", env = "KVS_ROLE")]
    role: RoleArg,

    /// Signaling channel name
    #[arg(short, long, env = "KVS_CHANNEL_NAME")]
    channel: String,

    /// AWS region
    #[arg(long, default_value = "us-west-2", env = "AWS_REGION")]
    region: String,

    /// YAML file with engine options
    #[arg(long, env = "KVS_OPTIONS_FILE")]
    options: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum RoleArg {
    /// Stream producer; answers viewer offers
    Master,
    /// Stream consumer; sends the offer
    Viewer,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Master => Role::Publisher,
            RoleArg::Viewer => Role::Subscriber,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        role = ?args.role,
        channel = %args.channel,
        region = %args.region,
        "KVS peer starting"
    );

    let options = match &args.options {
        Some(path) => EngineOptions::from_yaml_file(path)?,
        None => EngineOptions::default(),
    };

    let config = SessionConfig::new(&args.region, Credentials::from_env()?, &args.channel);
    let engine = NegotiationEngine::kvs(config, args.role.into(), options)?;

    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    engine.on_state_change(move |state| {
        let _ = state_tx.send(state);
    });
    engine.on_connection_state(|state| info!("Peer connection {}", state));
    engine.on_error(|e| error!("Session error: {}", e));
    engine.on_remote_media(|media| {
        for track in media.tracks() {
            info!(
                kind = ?track.kind,
                stream = %track.stream_id,
                "Receiving track {}", track.id
            );
        }
    });

    engine.connect(Vec::new()).await?;
    info!("Signaling open. Press Ctrl+C to disconnect.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, cleaning up...");
                break;
            }
            Some(state) = state_rx.recv() => {
                if state == EngineState::Failed {
                    warn!("Session failed");
                    break;
                }
            }
        }
    }

    if let Some(stats) = engine.stats().await {
        info!(collected_at = %stats.collected_at, "Final stats: {}", stats.report);
    }

    engine.disconnect().await;
    info!("Disconnected");

    Ok(())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
