use agora_node::{api, config::NodeConfig, logging, node};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::RngCore;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "agora")]
#[command(about = "agora - task marketplace node with x402 escrowed payments", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agora node
    Start {
        /// Data directory
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Port for the HTTP API
        #[arg(long, default_value = "3402")]
        api_port: u16,
    },

    /// Write a default configuration file
    Init {
        /// Output directory for the configuration
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Generate a new escrow authority secret
    Keygen {
        /// Output file for the key; printed to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (ignore if it doesn't)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load config early to get logging settings
    let temp_config = if let Some(ref config_path) = cli.config {
        NodeConfig::from_file(config_path).ok()
    } else if Path::new("./agora-config.toml").exists() {
        NodeConfig::from_file(Path::new("./agora-config.toml")).ok()
    } else {
        None
    };

    let logging_config = temp_config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(|| NodeConfig::default().logging);

    logging::init_logging(&logging_config, cli.verbose)?;

    match cli.command {
        Commands::Start { data_dir, api_port } => {
            // Priority order: CLI args > ENV vars > Config file > Defaults

            let mut config = if let Some(config_path) = cli.config {
                NodeConfig::from_file(&config_path)?
            } else if Path::new("./agora-config.toml").exists() {
                NodeConfig::from_file(Path::new("./agora-config.toml"))?
            } else {
                NodeConfig::default()
            };

            config.apply_env_overrides();

            // Only override when the CLI args differ from their defaults.
            if data_dir != PathBuf::from("./data") {
                config.node.data_dir = data_dir;
            }
            if api_port != 3402 {
                config.api.port = api_port;
            }

            // Fatal without the authority secret: every escrow address and
            // release signature depends on it.
            let authority_secret = node::load_authority_secret(&config)
                .context("cannot serve traffic without the escrow authority secret")?;

            info!(
                name = %config.node.name,
                api_port = config.api.port,
                network = %config.ledger.network,
                "🚀 Starting agora node"
            );

            let node = node::AgoraNode::new(config.clone(), authority_secret).await?;

            let api_handle =
                api::start_api_server(&node, config.api.host.clone(), config.api.port);
            let worker_handle = node.spawn_worker();

            info!("✅ Node initialized successfully");

            tokio::signal::ctrl_c().await?;
            info!("🛑 Shutting down");

            api_handle.abort();
            if let Some(worker) = worker_handle {
                worker.abort();
            }
            Ok(())
        }

        Commands::Init { output } => {
            std::fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create output directory {:?}", output))?;
            let path = output.join("agora-config.toml");
            NodeConfig::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }

        Commands::Keygen { output } => {
            let mut secret = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            let encoded = hex::encode(secret);

            let authority = agora_crypto::Keypair::from_seed(&secret);
            match output {
                Some(path) => {
                    std::fs::write(&path, &encoded)
                        .with_context(|| format!("Failed to write key to {:?}", path))?;
                    println!("Wrote authority secret to {}", path.display());
                }
                None => println!("{}", encoded),
            }
            println!("Platform address: {}", authority.address());
            Ok(())
        }
    }
}
