use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub api: ApiConfig,
    pub ledger: LedgerConfig,
    pub escrow: EscrowConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub data_dir: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// "memory" for the in-process ledger, "rpc" for a remote node.
    pub backend: String,
    pub rpc_url: String,
    pub network: String,
    pub currency: String,
    pub confirm_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Platform cut in basis points (1000 = 10%).
    pub platform_fee_bps: u16,
    /// Base units withheld at release to cover settlement transfer fees.
    pub fee_reserve_base_units: u64,
    /// Optional explicit path to the authority key file; defaults to
    /// `<data_dir>/authority.key`.
    pub authority_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Simulated work latency of the built-in executor.
    pub work_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty", "compact" or "json".
    pub format: String,
    pub file_output: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings {
                data_dir: PathBuf::from("./data"),
                name: "agora-node".to_string(),
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3402,
            },
            ledger: LedgerConfig {
                backend: "memory".to_string(),
                rpc_url: "http://127.0.0.1:8899".to_string(),
                network: "agora-devnet".to_string(),
                currency: "AGR".to_string(),
                confirm_timeout_secs: 30,
            },
            escrow: EscrowConfig {
                platform_fee_bps: 1_000,
                fee_reserve_base_units: 10_000,
                authority_key_path: None,
            },
            worker: WorkerConfig {
                enabled: true,
                poll_interval_secs: 10,
                work_delay_secs: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                file_output: None,
            },
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        // Env overrides are applied by the caller, which controls precedence.
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = env::var("AGORA_DATA_DIR") {
            self.node.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(host) = env::var("AGORA_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = env::var("AGORA_API_PORT") {
            if let Ok(port) = port.parse() {
                self.api.port = port;
            }
        }
        if let Ok(backend) = env::var("AGORA_LEDGER_BACKEND") {
            self.ledger.backend = backend;
        }
        if let Ok(url) = env::var("AGORA_LEDGER_RPC_URL") {
            self.ledger.rpc_url = url;
        }
        if let Ok(network) = env::var("AGORA_LEDGER_NETWORK") {
            self.ledger.network = network;
        }
        if let Ok(bps) = env::var("AGORA_PLATFORM_FEE_BPS") {
            if let Ok(bps) = bps.parse() {
                self.escrow.platform_fee_bps = bps;
            }
        }
        if let Ok(enabled) = env::var("AGORA_WORKER_ENABLED") {
            if let Ok(enabled) = enabled.parse() {
                self.worker.enabled = enabled;
            }
        }
        if let Ok(level) = env::var("AGORA_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Where the authority key file lives when the secret is not provided via
    /// environment.
    pub fn authority_key_path(&self) -> PathBuf {
        self.escrow
            .authority_key_path
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("authority.key"))
    }
}
