use agora_crypto::Keypair;
use agora_types::{AccountAddress, NativeAmount, TxRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// The ledger endpoint could not be reached or answered too slowly.
    /// Retryable: nothing was necessarily submitted.
    #[error("Ledger transport failure: {0}")]
    Transport(String),

    /// The ledger accepted the request and rejected it (insufficient funds,
    /// malformed transfer). Not retryable without changing the request.
    #[error("Transfer rejected by ledger: {0}")]
    Rejected(String),

    /// A transfer was submitted but its confirmation was not observed in
    /// time. The transaction may still land; callers must re-query the
    /// reference before treating this as a failure.
    #[error("Confirmation timed out for transaction {reference}")]
    ConfirmationTimeout { reference: TxRef },
}

impl LedgerError {
    /// True when retrying carries no double-submission risk.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// The effects of a ledger transaction, as needed for payment verification:
/// which accounts it touched and their balances before and after. The first
/// account key is the fee payer / primary signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub reference: TxRef,
    pub account_keys: Vec<AccountAddress>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub err: Option<String>,
    pub finalized: bool,
}

impl TransactionInfo {
    pub fn index_of(&self, address: AccountAddress) -> Option<usize> {
        self.account_keys.iter().position(|k| *k == address)
    }

    /// Balance change (post − pre) for an account touched by this
    /// transaction, in base units. Negative for net senders.
    pub fn balance_delta(&self, address: AccountAddress) -> Option<i128> {
        let idx = self.index_of(address)?;
        let pre = *self.pre_balances.get(idx)? as i128;
        let post = *self.post_balances.get(idx)? as i128;
        Some(post - pre)
    }

    /// The primary signer (fee payer) of the transaction.
    pub fn signer(&self) -> Option<AccountAddress> {
        self.account_keys.first().copied()
    }
}

/// Query/submit contract against the settlement layer. The core never builds
/// ledger transactions itself; it only reads effects and requests transfers.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Look up a transaction by reference. `Ok(None)` means the ledger does
    /// not (yet) know it — an expected condition, not an error.
    async fn get_transaction(&self, reference: &TxRef) -> Result<Option<TransactionInfo>>;

    /// Current balance of an account, in base units.
    async fn get_balance(&self, address: AccountAddress) -> Result<NativeAmount>;

    /// Transfer `amount` from the signer's account to `to`, returning the
    /// confirmed transaction reference. Once this has been submitted it
    /// cannot be cancelled.
    async fn submit_transfer(
        &self,
        signer: &Keypair,
        to: AccountAddress,
        amount: NativeAmount,
    ) -> Result<TxRef>;
}
