use crate::config::NodeConfig;
use agora_escrow::{
    EscrowContext, FeePolicy, HeuristicExecutor, LifecycleEngine, MemoryStore, TaskStore,
    TaskWorker,
};
use agora_ledger::{LedgerClient, MemoryLedger, RpcLedger};
use agora_types::NativeAmount;
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// The assembled service: one store, one ledger handle, one lifecycle engine,
/// all built at startup and shared by the API server and the worker.
pub struct AgoraNode {
    pub config: NodeConfig,
    pub store: Arc<dyn TaskStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub engine: Arc<LifecycleEngine>,
}

impl AgoraNode {
    pub async fn new(config: NodeConfig, authority_secret: [u8; 32]) -> Result<Self> {
        let ledger: Arc<dyn LedgerClient> = match config.ledger.backend.as_str() {
            "memory" => Arc::new(MemoryLedger::new()),
            "rpc" => Arc::new(RpcLedger::new(
                config.ledger.rpc_url.clone(),
                Duration::from_secs(config.ledger.confirm_timeout_secs),
            )),
            other => bail!("Unknown ledger backend: {}", other),
        };

        Self::with_ledger(config, authority_secret, ledger).await
    }

    /// Assemble against a caller-provided ledger handle. Integration tests
    /// use this to keep faucet access to the in-memory ledger.
    pub async fn with_ledger(
        config: NodeConfig,
        authority_secret: [u8; 32],
        ledger: Arc<dyn LedgerClient>,
    ) -> Result<Self> {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());

        let fee_policy = FeePolicy {
            platform_fee_bps: config.escrow.platform_fee_bps,
            fee_reserve: NativeAmount::from_base_units(config.escrow.fee_reserve_base_units),
        };
        let ctx = Arc::new(EscrowContext::new(
            authority_secret,
            ledger.clone(),
            fee_policy,
        ));

        info!(
            platform_address = %ctx.platform_address(),
            network = %config.ledger.network,
            backend = %config.ledger.backend,
            fee_bps = config.escrow.platform_fee_bps,
            "🔐 Escrow authority loaded"
        );

        let engine = Arc::new(LifecycleEngine::new(store.clone(), ctx));

        Ok(Self {
            config,
            store,
            ledger,
            engine,
        })
    }

    /// Start the background worker if enabled.
    pub fn spawn_worker(&self) -> Option<JoinHandle<()>> {
        if !self.config.worker.enabled {
            info!("Task worker disabled by configuration");
            return None;
        }

        let executor = Arc::new(HeuristicExecutor::new(Duration::from_secs(
            self.config.worker.work_delay_secs,
        )));
        let worker = TaskWorker::new(
            self.engine.clone(),
            executor,
            Duration::from_secs(self.config.worker.poll_interval_secs),
        );
        Some(worker.spawn())
    }
}

/// Load the authority secret: environment first, then the key file. The
/// process cannot serve traffic without it.
pub fn load_authority_secret(config: &NodeConfig) -> Result<[u8; 32]> {
    let hex_secret = match std::env::var("AGORA_AUTHORITY_SECRET") {
        Ok(value) => value,
        Err(_) => {
            let path = config.authority_key_path();
            std::fs::read_to_string(&path).with_context(|| {
                format!(
                    "authority secret not found: set AGORA_AUTHORITY_SECRET or provision {:?}",
                    path
                )
            })?
        }
    };

    parse_authority_secret(hex_secret.trim())
}

pub fn parse_authority_secret(hex_secret: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_secret).context("authority secret must be hex-encoded")?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("authority secret must be exactly 32 bytes"))
}
