//! agora: a host for persistent, event-driven agents
//!
//! Usage:
//!   agora run --config agora.toml        → run every configured agent until Ctrl-C
//!   agora dump-config                    → print the effective configuration
//!   agora version                        → show version

use agora_agent::{AgoraConfig, AgoraHost, Stores};
use agora_llm::AnthropicProvider;
use agora_store::FileConsciousnessRepo;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agora",
    about = "Persistent agents that wake on events, think, act, and sleep",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file (TOML)
    #[arg(short, long, global = true, default_value = "agora.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host until interrupted
    Run {
        /// Anthropic API key (or set ANTHROPIC_API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Also write logs to daily files in this directory
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    DumpConfig,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("agora v{}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::DumpConfig) => {
            let config = AgoraConfig::load(&cli.config);
            print!("{}", config.to_toml());
        }
        Some(Commands::Run { api_key, log_file }) => {
            let _guard = init_tracing(log_file.as_ref());
            run(&cli.config, api_key).await?;
        }
        None => {
            let _guard = init_tracing(None);
            run(&cli.config, None).await?;
        }
    }

    Ok(())
}

/// Stderr always; a non-blocking daily file too when asked. The returned
/// guard flushes the file writer on drop.
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agora=info,agora_agent=info,agora_store=info".into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "agora.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

async fn run(config_path: &PathBuf, api_key: Option<String>) -> anyhow::Result<()> {
    let api_key = api_key
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
        .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;

    let config = AgoraConfig::load(config_path);
    if config.agents.is_empty() {
        anyhow::bail!("no agents configured in {}", config_path.display());
    }

    let mut stores = Stores::in_memory();
    if let Some(dir) = &config.storage.consciousness_dir {
        std::fs::create_dir_all(dir)?;
        stores = stores.with_consciousness(Arc::new(FileConsciousnessRepo::new(dir)));
    }

    let host = AgoraHost::new(config, stores, Arc::new(AnthropicProvider::new(api_key)));
    host.start().await?;
    tracing::info!("agora v{} running, Ctrl-C to stop", env!("CARGO_PKG_VERSION"));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    host.shutdown().await;
    Ok(())
}
