mod user_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    hookgate_channels::loopback::LoopbackBackend,
    hookgate_config::{GatewayConfig, ProtocolLogLevel},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "hookgate", about = "hookgate: multi-tenant messaging webhook gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable. Also stops pairing
    /// codes from being drawn on the console.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file. Without it, hookgate.{toml,yaml,yml,json} is discovered.
    #[arg(long, global = true, env = "HOOKGATE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and relaunch previously connected sessions.
    Gateway {
        /// Protocol client verbosity: "", INFO or DEBUG.
        #[arg(long, env = "HOOKGATE_WA_DEBUG")]
        wa_debug: Option<ProtocolLogLevel>,
    },
    /// User management.
    Users {
        #[command(subcommand)]
        action: user_commands::UserAction,
    },
}

fn init_telemetry(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => hookgate_config::load_config(path)?,
        None => hookgate_config::discover_and_load(),
    };
    config.logging.json |= cli.json_logs;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    init_telemetry(&cli.log_level, config.logging.json);

    info!(version = env!("CARGO_PKG_VERSION"), "hookgate starting");

    match cli.command {
        Commands::Gateway { wa_debug } => {
            if let Some(level) = wa_debug {
                config.protocol.debug = level;
            }
            let backend = Arc::new(LoopbackBackend::new());
            hookgate_gateway::server::start_gateway(config, backend).await
        },
        Commands::Users { action } => user_commands::handle_users(action, &config).await,
    }
}
