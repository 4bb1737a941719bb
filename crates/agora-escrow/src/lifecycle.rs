use crate::error::{EscrowError, Result};
use crate::release::{FeePolicy, ReleaseEngine, Settlement};
use crate::store::{TaskChanges, TaskStore};
use crate::task::{ListingStatus, Task, TaskStatus};
use crate::verify::{PaymentVerifier, VerifyOutcome};
use agora_crypto::{derive_escrow_keypair, Keypair};
use agora_ledger::LedgerClient;
use agora_types::{AccountAddress, ListingId, NativeAmount, TaskId, TxRef};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide escrow state, built exactly once at startup and passed by
/// reference into everything that needs it. Nothing re-reads ambient/global
/// scope for the authority secret or the ledger handle.
pub struct EscrowContext {
    authority_secret: [u8; 32],
    authority: Keypair,
    pub ledger: Arc<dyn LedgerClient>,
    pub fee_policy: FeePolicy,
}

impl EscrowContext {
    pub fn new(
        authority_secret: [u8; 32],
        ledger: Arc<dyn LedgerClient>,
        fee_policy: FeePolicy,
    ) -> Self {
        let authority = Keypair::from_seed(&authority_secret);
        Self {
            authority_secret,
            authority,
            ledger,
            fee_policy,
        }
    }

    /// Platform fees pay out to the authority's own account.
    pub fn platform_address(&self) -> AccountAddress {
        self.authority.address()
    }

    /// Signing keypair for a task's escrow account.
    pub fn escrow_keypair(&self, task_id: TaskId) -> Keypair {
        derive_escrow_keypair(&self.authority_secret, task_id)
    }

    pub fn escrow_address(&self, task_id: TaskId) -> AccountAddress {
        self.escrow_keypair(task_id).address()
    }
}

/// Live escrow state of one task, for read-only projections.
#[derive(Debug, Clone)]
pub struct EscrowInfo {
    pub task_id: TaskId,
    pub escrow_address: AccountAddress,
    pub balance: NativeAmount,
    pub status: TaskStatus,
}

/// The lifecycle orchestrator: validates and performs every state
/// transition, invoking the verifier and the release engine at the right
/// points. All transitions go through the store's conditional update, so any
/// number of HTTP handlers and the background worker can call in
/// concurrently.
pub struct LifecycleEngine {
    store: Arc<dyn TaskStore>,
    ctx: Arc<EscrowContext>,
    verifier: PaymentVerifier,
    release: ReleaseEngine,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn TaskStore>, ctx: Arc<EscrowContext>) -> Self {
        let verifier = PaymentVerifier::new(ctx.ledger.clone());
        let release = ReleaseEngine::new(
            ctx.ledger.clone(),
            ctx.fee_policy,
            ctx.platform_address(),
        );
        Self {
            store,
            ctx,
            verifier,
            release,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn context(&self) -> &Arc<EscrowContext> {
        &self.ctx
    }

    /// Allocate a task against an active listing. The escrow amount is the
    /// listing's price at this moment; the escrow address is derived from the
    /// freshly allocated id. The task starts Pending — funding always comes
    /// first.
    pub async fn create_task(
        &self,
        listing_id: ListingId,
        description: String,
        requester: Option<AccountAddress>,
    ) -> Result<Task> {
        if description.trim().is_empty() {
            return Err(EscrowError::Validation(
                "description must not be empty".to_string(),
            ));
        }

        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("listing {}", listing_id)))?;
        if listing.status != ListingStatus::Active {
            return Err(EscrowError::Validation(format!(
                "listing {} is inactive",
                listing_id
            )));
        }

        let id = self.store.allocate_task_id().await?;
        let escrow_address = self.ctx.escrow_address(id);
        let task = Task::new(
            id,
            listing_id,
            description,
            requester,
            listing.price,
            escrow_address,
        );
        self.store.insert_task(task.clone()).await?;

        info!(
            task_id = %id,
            listing_id = %listing_id,
            escrow_address = %escrow_address,
            amount = listing.price.to_native(),
            "🧾 Task created, awaiting payment"
        );
        Ok(task)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("task {}", id)))
    }

    /// Verify a claimed payment proof and fund the task. Verification is
    /// read-only; the recording is a Pending-guarded conditional update, so
    /// duplicate submissions flip the state at most once. Replaying the proof
    /// a funded task already bears returns that task unchanged.
    pub async fn submit_payment(&self, id: TaskId, proof: &TxRef) -> Result<Task> {
        let task = self.get_task(id).await?;

        if task.status != TaskStatus::Pending {
            if task.status == TaskStatus::Funded && task.payment_proof.as_ref() == Some(proof) {
                return Ok(task);
            }
            return Err(EscrowError::state_conflict(
                task.status,
                &[TaskStatus::Pending],
            ));
        }

        let outcome = self
            .verifier
            .verify(proof, task.escrow_amount, task.escrow_address, task.requester)
            .await?;

        let payment = match outcome {
            VerifyOutcome::Verified(payment) => payment,
            VerifyOutcome::NotVerified { reason } => {
                return Err(EscrowError::PaymentNotVerified(reason))
            }
        };

        let changes = TaskChanges {
            status: Some(TaskStatus::Funded),
            payment_proof: Some(proof.clone()),
            payment_verified_at: Some(Utc::now()),
            requester: task.requester.or(Some(payment.sender)),
            ..Default::default()
        };

        match self
            .store
            .update_task_if(id, &[TaskStatus::Pending], false, changes)
            .await
        {
            Ok(funded) => {
                info!(
                    task_id = %id,
                    proof = %proof,
                    requester = %payment.sender,
                    received = payment.received.to_native(),
                    "💰 Task funded"
                );
                Ok(funded)
            }
            Err(EscrowError::StateConflict { .. }) => {
                // A duplicate submission won the race; re-read and report the
                // resulting state.
                let current = self.get_task(id).await?;
                if current.status == TaskStatus::Funded
                    && current.payment_proof.as_ref() == Some(proof)
                {
                    Ok(current)
                } else {
                    Err(EscrowError::state_conflict(
                        current.status,
                        &[TaskStatus::Pending],
                    ))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Worker pickup: Funded → InProgress.
    pub async fn begin_work(&self, id: TaskId) -> Result<Task> {
        self.store
            .update_task_if(
                id,
                &[TaskStatus::Funded],
                false,
                TaskChanges {
                    status: Some(TaskStatus::InProgress),
                    ..Default::default()
                },
            )
            .await
    }

    /// Drive a task to Completed: claim the release, pay out, record the
    /// outcome. Exactly one caller can win the claim, so an explicit
    /// `complete` racing the worker produces exactly one settlement.
    pub async fn finish_work(&self, id: TaskId, result: Option<String>) -> Result<Task> {
        // The claim is the exclusivity token for the whole release path.
        let task = self
            .store
            .update_task_if(
                id,
                &[TaskStatus::Funded, TaskStatus::InProgress],
                true,
                TaskChanges {
                    status: Some(TaskStatus::InProgress),
                    release_claimed: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let listing = self
            .store
            .get_listing(task.listing_id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("listing {}", task.listing_id)))?;

        let signer = self.ctx.escrow_keypair(id);
        let settlement = match self
            .release
            .release(&task, &signer, listing.payout_address)
            .await
        {
            Ok(settlement) => settlement,
            Err(e) => {
                // Nothing was submitted (transient) or the submission was
                // rejected outright; either way no funds moved, so the claim
                // can be handed back for a later retry.
                self.unclaim_release(id).await;
                return Err(e);
            }
        };

        self.finalize(id, &listing, result, settlement).await
    }

    async fn finalize(
        &self,
        id: TaskId,
        listing: &crate::task::Listing,
        result: Option<String>,
        settlement: Settlement,
    ) -> Result<Task> {
        let result_at = result.as_ref().map(|_| Utc::now());
        let changes = TaskChanges {
            status: Some(TaskStatus::Completed),
            result,
            result_at,
            settlement_ref: Some(settlement.reference.clone()),
            settlement: Some(settlement.outcome),
            ..Default::default()
        };

        // We hold the claim; no other actor can have moved the task.
        let done = self
            .store
            .update_task_if(id, &[TaskStatus::InProgress], false, changes)
            .await?;
        self.store.record_listing_completion(listing.id).await?;

        info!(
            task_id = %id,
            listing_id = %listing.id,
            settlement_ref = %settlement.reference,
            "✅ Task completed"
        );
        Ok(done)
    }

    async fn unclaim_release(&self, id: TaskId) {
        let outcome = self
            .store
            .update_task_if(
                id,
                &[TaskStatus::InProgress],
                false,
                TaskChanges {
                    release_claimed: Some(false),
                    ..Default::default()
                },
            )
            .await;

        if let Err(e) = outcome {
            warn!(task_id = %id, error = %e, "Failed to hand back release claim");
        }
    }

    /// Funded/InProgress → Disputed. Refused once a release is in flight:
    /// funds already moving cannot be disputed here.
    pub async fn dispute(&self, id: TaskId) -> Result<Task> {
        let task = self
            .store
            .update_task_if(
                id,
                &[TaskStatus::Funded, TaskStatus::InProgress],
                true,
                TaskChanges {
                    status: Some(TaskStatus::Disputed),
                    ..Default::default()
                },
            )
            .await?;

        info!(task_id = %id, "⚖️ Task disputed");
        Ok(task)
    }

    /// Pending → Cancelled, before any funding arrived.
    pub async fn cancel(&self, id: TaskId) -> Result<Task> {
        let task = self
            .store
            .update_task_if(
                id,
                &[TaskStatus::Pending],
                false,
                TaskChanges {
                    status: Some(TaskStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await?;

        info!(task_id = %id, "🚫 Task cancelled");
        Ok(task)
    }

    /// Escrow address and live balance for a task.
    pub async fn escrow_info(&self, id: TaskId) -> Result<EscrowInfo> {
        let task = self.get_task(id).await?;
        let balance = self
            .ctx
            .ledger
            .get_balance(task.escrow_address)
            .await
            .map_err(|e| EscrowError::LedgerTransient(e.to_string()))?;

        Ok(EscrowInfo {
            task_id: task.id,
            escrow_address: task.escrow_address,
            balance,
            status: task.status,
        })
    }
}
