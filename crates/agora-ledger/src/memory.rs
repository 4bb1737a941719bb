use crate::client::{LedgerClient, LedgerError, Result, TransactionInfo};
use agora_crypto::Keypair;
use agora_types::{AccountAddress, NativeAmount, TxRef};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Flat per-transaction fee charged to the sender, in base units.
pub const TRANSFER_FEE: u64 = 5_000;

/// An in-process ledger with real transfer semantics: balances, a flat
/// transaction fee, and queryable transaction effects. Backs the `memory`
/// ledger backend and every test that exercises payment verification or
/// settlement.
pub struct MemoryLedger {
    balances: Arc<RwLock<HashMap<AccountAddress, u64>>>,
    transactions: Arc<RwLock<HashMap<TxRef, TransactionInfo>>>,
    sequence: AtomicU64,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            balances: Arc::new(RwLock::new(HashMap::new())),
            transactions: Arc::new(RwLock::new(HashMap::new())),
            sequence: AtomicU64::new(0),
        }
    }

    /// Credit an account out of thin air (faucet). Dev/test only.
    pub async fn credit(&self, address: AccountAddress, amount: NativeAmount) {
        let mut balances = self.balances.write().await;
        let entry = balances.entry(address).or_insert(0);
        *entry = entry.saturating_add(amount.to_base_units());

        info!(
            address = %address,
            amount = amount.to_native(),
            balance_after = *entry,
            "💰 Account credited"
        );
    }

    /// Number of transfers executed so far.
    pub async fn transaction_count(&self) -> usize {
        self.transactions.read().await.len()
    }

    fn next_reference(&self, from: AccountAddress, to: AccountAddress, amount: u64) -> TxRef {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(from.as_bytes());
        hasher.update(to.as_bytes());
        hasher.update(&amount.to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        TxRef::new(hex::encode(hasher.finalize().as_bytes()))
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn get_transaction(&self, reference: &TxRef) -> Result<Option<TransactionInfo>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(reference).cloned())
    }

    async fn get_balance(&self, address: AccountAddress) -> Result<NativeAmount> {
        let balances = self.balances.read().await;
        Ok(NativeAmount::from_base_units(
            balances.get(&address).copied().unwrap_or(0),
        ))
    }

    async fn submit_transfer(
        &self,
        signer: &Keypair,
        to: AccountAddress,
        amount: NativeAmount,
    ) -> Result<TxRef> {
        let from = signer.address();
        let units = amount.to_base_units();

        let mut balances = self.balances.write().await;

        let from_pre = balances.get(&from).copied().unwrap_or(0);
        let to_pre = balances.get(&to).copied().unwrap_or(0);

        let debit = units
            .checked_add(TRANSFER_FEE)
            .ok_or_else(|| LedgerError::Rejected("transfer amount overflow".to_string()))?;
        if from_pre < debit {
            return Err(LedgerError::Rejected(format!(
                "insufficient funds: balance {}, needed {}",
                from_pre, debit
            )));
        }

        let from_post = from_pre - debit;
        let to_post = to_pre.saturating_add(units);
        balances.insert(from, from_post);
        balances.insert(to, to_post);
        drop(balances);

        let reference = self.next_reference(from, to, units);
        let tx = TransactionInfo {
            reference: reference.clone(),
            account_keys: vec![from, to],
            pre_balances: vec![from_pre, to_pre],
            post_balances: vec![from_post, to_post],
            err: None,
            finalized: true,
        };

        let mut transactions = self.transactions.write().await;
        transactions.insert(reference.clone(), tx);

        info!(
            from = %from,
            to = %to,
            amount = amount.to_native(),
            fee = TRANSFER_FEE,
            reference = %reference,
            "💸 Transfer executed"
        );

        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transfer_moves_funds_and_charges_fee() {
        let ledger = MemoryLedger::new();
        let sender = Keypair::generate();
        let recipient = Keypair::generate().address();

        ledger
            .credit(sender.address(), NativeAmount::from_native(1.0))
            .await;

        let amount = NativeAmount::from_native(0.25);
        let reference = ledger
            .submit_transfer(&sender, recipient, amount)
            .await
            .unwrap();

        assert_eq!(ledger.get_balance(recipient).await.unwrap(), amount);
        assert_eq!(
            ledger.get_balance(sender.address()).await.unwrap(),
            NativeAmount::from_base_units(
                NativeAmount::from_native(0.75).to_base_units() - TRANSFER_FEE
            )
        );

        let tx = ledger.get_transaction(&reference).await.unwrap().unwrap();
        assert!(tx.finalized);
        assert!(tx.err.is_none());
        assert_eq!(tx.signer(), Some(sender.address()));
        assert_eq!(tx.balance_delta(recipient), Some(amount.to_base_units() as i128));
    }

    #[tokio::test]
    async fn test_insufficient_funds_rejected_without_effects() {
        let ledger = MemoryLedger::new();
        let sender = Keypair::generate();
        let recipient = Keypair::generate().address();

        ledger
            .credit(sender.address(), NativeAmount::from_base_units(100))
            .await;

        let err = ledger
            .submit_transfer(&sender, recipient, NativeAmount::from_base_units(100))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Rejected(_)));
        assert_eq!(ledger.transaction_count().await, 0);
        assert_eq!(
            ledger.get_balance(sender.address()).await.unwrap(),
            NativeAmount::from_base_units(100)
        );
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_none_not_error() {
        let ledger = MemoryLedger::new();
        let lookup = ledger
            .get_transaction(&TxRef::new("does-not-exist"))
            .await
            .unwrap();

        assert!(lookup.is_none());
    }
}
