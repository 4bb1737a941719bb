use agora_types::{AccountAddress, ListingId, NativeAmount, TaskId, TxRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task.
///
/// The transition graph is strictly forward: a task never returns to an
/// earlier state, and Completed, Cancelled and Disputed are terminal (dispute
/// resolution is an administrative concern outside this engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Funded,
    InProgress,
    Completed,
    Disputed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Disputed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Funded)
                | (Pending, Cancelled)
                | (Funded, InProgress)
                | (Funded, Completed)
                | (Funded, Disputed)
                | (InProgress, Completed)
                | (InProgress, Disputed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Funded => "funded",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Disputed => "disputed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// How a task's settlement actually went. Recorded alongside the settlement
/// reference so partial outcomes are observable instead of silently treated
/// as fully settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Performer payout and platform cut both confirmed.
    Full {
        performer_payout: NativeAmount,
        platform_cut: NativeAmount,
    },

    /// Performer was paid; the platform-fee transfer failed and is not
    /// retried automatically (a blind retry risks paying the fee twice).
    FeeTransferFailed {
        performer_payout: NativeAmount,
        unpaid_platform_cut: NativeAmount,
    },

    /// The payout was submitted but its confirmation never arrived and a
    /// re-query could not find it. The reference is recorded and nothing is
    /// resubmitted; reconciliation is manual.
    Unconfirmed { performer_payout: NativeAmount },
}

/// The central entity: one hire of a listing, escrowed and driven through the
/// lifecycle by the engine, the worker and the HTTP surface concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub listing_id: ListingId,
    /// Hiring party's ledger address. May be unknown at creation; recorded
    /// once from the verified payment's primary signer.
    pub requester: Option<AccountAddress>,
    pub description: String,
    /// Price snapshot taken from the listing at creation. Later listing price
    /// changes never affect an open task.
    pub escrow_amount: NativeAmount,
    /// Derived once from (authority secret, task id); unique per task.
    pub escrow_address: AccountAddress,
    pub status: TaskStatus,
    pub payment_proof: Option<TxRef>,
    pub payment_verified_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub result_at: Option<DateTime<Utc>>,
    pub settlement_ref: Option<TxRef>,
    pub settlement: Option<SettlementOutcome>,
    /// Exclusivity token for the release path; set by the claim CAS and never
    /// exposed over HTTP.
    #[serde(skip)]
    pub release_claimed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: TaskId,
        listing_id: ListingId,
        description: String,
        requester: Option<AccountAddress>,
        escrow_amount: NativeAmount,
        escrow_address: AccountAddress,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            listing_id,
            requester,
            description,
            escrow_amount,
            escrow_address,
            status: TaskStatus::Pending,
            payment_proof: None,
            payment_verified_at: None,
            result: None,
            result_at: None,
            settlement_ref: None,
            settlement: None,
            release_claimed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Inactive,
}

/// A performing party's marketplace entry. Mutated only by the credential
/// holder that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub price: NativeAmount,
    /// Where settlements pay out. Distinct from any escrow address.
    pub payout_address: AccountAddress,
    #[serde(skip)]
    pub owner_credential: crate::store::CredentialHash,
    pub tasks_completed: u64,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_backwards_edges() {
        use TaskStatus::*;
        let all = [Pending, Funded, InProgress, Completed, Disputed, Cancelled];

        // Terminal states allow nothing.
        for terminal in [Completed, Disputed, Cancelled] {
            for next in all {
                assert!(!terminal.can_transition_to(&next));
            }
        }

        // Nothing re-enters Pending or Funded.
        for from in all {
            assert!(!from.can_transition_to(&Pending));
            assert!(from != Pending || from.can_transition_to(&Funded));
            assert!(from == Pending || !from.can_transition_to(&Funded));
        }
    }

    #[test]
    fn test_forward_edges_match_lifecycle() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(&Funded));
        assert!(Pending.can_transition_to(&Cancelled));
        assert!(Funded.can_transition_to(&InProgress));
        assert!(Funded.can_transition_to(&Completed));
        assert!(Funded.can_transition_to(&Disputed));
        assert!(InProgress.can_transition_to(&Completed));
        assert!(InProgress.can_transition_to(&Disputed));

        assert!(!Pending.can_transition_to(&Completed));
        assert!(!InProgress.can_transition_to(&Funded));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
    }
}
