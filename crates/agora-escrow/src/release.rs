use crate::error::{EscrowError, Result};
use crate::task::{SettlementOutcome, Task};
use agora_crypto::Keypair;
use agora_ledger::{LedgerClient, LedgerError};
use agora_types::{AccountAddress, NativeAmount, TxRef};
use std::sync::Arc;
use tracing::{info, warn};

/// Platform economics applied at release time.
#[derive(Debug, Clone, Copy)]
pub struct FeePolicy {
    /// Platform cut in basis points (1000 = 10%).
    pub platform_fee_bps: u16,
    /// Base units withheld to cover the settlement transfers' own ledger
    /// fees. Escrow amounts at or below this cannot be settled.
    pub fee_reserve: NativeAmount,
}

/// The fee split for one settlement. Pure arithmetic over base units;
/// `performer_payout + platform_cut == transferable` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPlan {
    pub transferable: NativeAmount,
    pub performer_payout: NativeAmount,
    pub platform_cut: NativeAmount,
}

impl SettlementPlan {
    pub fn compute(escrow_amount: NativeAmount, policy: &FeePolicy) -> Result<Self> {
        let transferable = escrow_amount
            .checked_sub(policy.fee_reserve)
            .filter(|t| !t.is_zero())
            .ok_or_else(|| {
                EscrowError::SettlementFailed(format!(
                    "escrow amount {} does not cover the fee reserve {}",
                    escrow_amount, policy.fee_reserve
                ))
            })?;

        let units = transferable.to_base_units() as u128;
        let cut = ((units * policy.platform_fee_bps as u128 + 5_000) / 10_000) as u64;
        let platform_cut = NativeAmount::from_base_units(cut);
        let performer_payout = NativeAmount::from_base_units(transferable.to_base_units() - cut);

        Ok(Self {
            transferable,
            performer_payout,
            platform_cut,
        })
    }
}

/// A completed (or partially completed) settlement: the primary transfer's
/// reference plus how the split actually went.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub reference: TxRef,
    pub outcome: SettlementOutcome,
}

/// Drives escrowed funds to their final recipients: the performer payout
/// first (the commit point), then the platform cut. The two transfers are
/// not atomic with respect to each other; a failed fee transfer is recorded,
/// never blindly retried.
pub struct ReleaseEngine {
    ledger: Arc<dyn LedgerClient>,
    policy: FeePolicy,
    platform_address: AccountAddress,
}

impl ReleaseEngine {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        policy: FeePolicy,
        platform_address: AccountAddress,
    ) -> Self {
        Self {
            ledger,
            policy,
            platform_address,
        }
    }

    pub fn policy(&self) -> &FeePolicy {
        &self.policy
    }

    /// Pay out a task's escrow. The caller must hold the task's release claim
    /// and must not call this for a task already bearing a settlement
    /// reference.
    pub async fn release(
        &self,
        task: &Task,
        signer: &Keypair,
        performer: AccountAddress,
    ) -> Result<Settlement> {
        if task.settlement_ref.is_some() {
            return Err(EscrowError::SettlementFailed(format!(
                "task {} already bears a settlement reference",
                task.id
            )));
        }

        let plan = SettlementPlan::compute(task.escrow_amount, &self.policy)?;

        let reference = match self
            .ledger
            .submit_transfer(signer, performer, plan.performer_payout)
            .await
        {
            Ok(reference) => reference,
            Err(LedgerError::ConfirmationTimeout { reference }) => {
                return self
                    .resolve_uncertain_payout(task, signer, reference, &plan)
                    .await;
            }
            Err(e) if e.is_transient() => {
                return Err(EscrowError::LedgerTransient(e.to_string()));
            }
            Err(e) => {
                return Err(EscrowError::SettlementFailed(e.to_string()));
            }
        };

        let outcome = self.transfer_platform_cut(task, signer, &plan).await;

        info!(
            task_id = %task.id,
            performer = %performer,
            payout = plan.performer_payout.to_native(),
            platform_cut = plan.platform_cut.to_native(),
            reference = %reference,
            "💸 Escrow released"
        );

        Ok(Settlement { reference, outcome })
    }

    async fn transfer_platform_cut(
        &self,
        task: &Task,
        signer: &Keypair,
        plan: &SettlementPlan,
    ) -> SettlementOutcome {
        if plan.platform_cut.is_zero() {
            return SettlementOutcome::Full {
                performer_payout: plan.performer_payout,
                platform_cut: plan.platform_cut,
            };
        }

        match self
            .ledger
            .submit_transfer(signer, self.platform_address, plan.platform_cut)
            .await
        {
            Ok(_) => SettlementOutcome::Full {
                performer_payout: plan.performer_payout,
                platform_cut: plan.platform_cut,
            },
            Err(e) => {
                warn!(
                    task_id = %task.id,
                    unpaid_cut = plan.platform_cut.to_native(),
                    error = %e,
                    "⚠️ Platform fee transfer failed; recorded, not retried"
                );
                SettlementOutcome::FeeTransferFailed {
                    performer_payout: plan.performer_payout,
                    unpaid_platform_cut: plan.platform_cut,
                }
            }
        }
    }

    /// A payout submission timed out waiting for confirmation. Re-query the
    /// ledger for its actual fate before deciding anything: resubmitting a
    /// transfer that did land would pay the performer twice.
    async fn resolve_uncertain_payout(
        &self,
        task: &Task,
        signer: &Keypair,
        reference: TxRef,
        plan: &SettlementPlan,
    ) -> Result<Settlement> {
        match self.ledger.get_transaction(&reference).await {
            Ok(Some(tx)) if tx.finalized && tx.err.is_none() => {
                info!(
                    task_id = %task.id,
                    reference = %reference,
                    "Payout confirmed on re-query after timeout"
                );
                let outcome = self.transfer_platform_cut(task, signer, plan).await;
                Ok(Settlement { reference, outcome })
            }
            Ok(Some(tx)) if tx.err.is_some() => Err(EscrowError::SettlementFailed(format!(
                "payout transaction failed on ledger: {}",
                tx.err.unwrap_or_default()
            ))),
            // Visible but not yet finalized counts as unknown fate too:
            // it will probably land, so resubmission is off the table.
            _ => {
                warn!(
                    task_id = %task.id,
                    reference = %reference,
                    "Payout fate unknown after timeout; recording unconfirmed, not resubmitting"
                );
                Ok(Settlement {
                    reference,
                    outcome: SettlementOutcome::Unconfirmed {
                        performer_payout: plan.performer_payout,
                    },
                })
            }
        }
    }
}
