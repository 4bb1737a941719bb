use crate::client::{LedgerClient, LedgerError, Result, TransactionInfo};
use agora_crypto::Keypair;
use agora_types::{AccountAddress, NativeAmount, TxRef};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// JSON-RPC client for a remote ledger node. Implements the same
/// query/submit contract as [`crate::MemoryLedger`]; every failure to reach
/// or parse the endpoint is a transport error, distinct from the ledger
/// rejecting a request.
pub struct RpcLedger {
    http: reqwest::Client,
    endpoint: String,
    confirm_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    account_keys: Vec<String>,
    pre_balances: Vec<u64>,
    post_balances: Vec<u64>,
    err: Option<String>,
    #[serde(default)]
    finalized: bool,
}

impl RpcLedger {
    pub fn new(endpoint: impl Into<String>, confirm_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            endpoint: endpoint.into(),
            confirm_timeout,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(LedgerError::Rejected(error.to_string()));
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    fn parse_transaction(reference: &TxRef, raw: Value) -> Result<TransactionInfo> {
        let tx: RpcTransaction = serde_json::from_value(raw)
            .map_err(|e| LedgerError::Transport(format!("malformed transaction: {}", e)))?;

        let mut account_keys = Vec::with_capacity(tx.account_keys.len());
        for key in &tx.account_keys {
            let address = AccountAddress::from_string(key)
                .map_err(|e| LedgerError::Transport(format!("malformed account key: {}", e)))?;
            account_keys.push(address);
        }

        Ok(TransactionInfo {
            reference: reference.clone(),
            account_keys,
            pre_balances: tx.pre_balances,
            post_balances: tx.post_balances,
            err: tx.err,
            finalized: tx.finalized,
        })
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn get_transaction(&self, reference: &TxRef) -> Result<Option<TransactionInfo>> {
        let result = self
            .call("getTransaction", json!([reference.as_str()]))
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        Self::parse_transaction(reference, result).map(Some)
    }

    async fn get_balance(&self, address: AccountAddress) -> Result<NativeAmount> {
        let result = self
            .call("getBalance", json!([address.to_string()]))
            .await?;

        let units = result
            .get("value")
            .and_then(Value::as_u64)
            .ok_or_else(|| LedgerError::Transport("malformed balance response".to_string()))?;

        Ok(NativeAmount::from_base_units(units))
    }

    async fn submit_transfer(
        &self,
        signer: &Keypair,
        to: AccountAddress,
        amount: NativeAmount,
    ) -> Result<TxRef> {
        // Nanosecond nonce keeps repeated identical transfers distinct.
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let payload = json!({
            "from": signer.address().to_string(),
            "to": to.to_string(),
            "amount": amount.to_base_units(),
            "nonce": nonce,
        })
        .to_string();

        let signature = signer.sign(payload.as_bytes());

        let result = self
            .call(
                "sendTransfer",
                json!([
                    payload,
                    hex::encode(signature.as_bytes()),
                    signer.public_key().to_string(),
                ]),
            )
            .await?;

        let reference = result
            .as_str()
            .map(TxRef::new)
            .ok_or_else(|| LedgerError::Transport("malformed submit response".to_string()))?;

        debug!(reference = %reference, "Transfer submitted, awaiting confirmation");

        // The submission is already irrevocable; from here on a timeout means
        // "fate unknown", never "safe to resubmit".
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            match self.get_transaction(&reference).await {
                Ok(Some(tx)) if tx.finalized => {
                    return match tx.err {
                        Some(err) => Err(LedgerError::Rejected(err)),
                        None => Ok(reference),
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(reference = %reference, error = %e, "Confirmation poll failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(LedgerError::ConfirmationTimeout { reference });
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }
}
