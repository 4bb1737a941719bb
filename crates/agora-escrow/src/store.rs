use crate::error::{EscrowError, Result};
use crate::task::{Listing, ListingStatus, SettlementOutcome, Task, TaskStatus};
use agora_types::{AccountAddress, ListingId, NativeAmount, TaskId, TxRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// SHA-256 hash of an issued credential. The raw secret is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialHash(pub String);

impl CredentialHash {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub hash: CredentialHash,
    pub owner_name: String,
    pub created_at: DateTime<Utc>,
}

/// Field updates applied atomically by [`TaskStore::update_task_if`].
/// Unset fields are left untouched; `updated_at` is always refreshed.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub status: Option<TaskStatus>,
    pub payment_proof: Option<TxRef>,
    pub payment_verified_at: Option<DateTime<Utc>>,
    pub requester: Option<AccountAddress>,
    pub result: Option<String>,
    pub result_at: Option<DateTime<Utc>>,
    pub settlement_ref: Option<TxRef>,
    pub settlement: Option<SettlementOutcome>,
    pub release_claimed: Option<bool>,
}

impl TaskChanges {
    fn apply(self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(proof) = self.payment_proof {
            task.payment_proof = Some(proof);
        }
        if let Some(at) = self.payment_verified_at {
            task.payment_verified_at = Some(at);
        }
        if let Some(requester) = self.requester {
            task.requester = Some(requester);
        }
        if let Some(result) = self.result {
            task.result = Some(result);
        }
        if let Some(at) = self.result_at {
            task.result_at = Some(at);
        }
        if let Some(reference) = self.settlement_ref {
            task.settlement_ref = Some(reference);
        }
        if let Some(settlement) = self.settlement {
            task.settlement = Some(settlement);
        }
        if let Some(claimed) = self.release_claimed {
            task.release_claimed = claimed;
        }
        task.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub price: NativeAmount,
    pub payout_address: AccountAddress,
    pub owner_credential: CredentialHash,
}

/// Partial update for a listing; ownership is checked by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub price: Option<NativeAmount>,
    pub payout_address: Option<AccountAddress>,
    pub status: Option<ListingStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub active_only: bool,
    pub tag: Option<String>,
    pub search: Option<String>,
}

/// Durable record of tasks, listings and credentials.
///
/// The store is the single synchronization point of the system: every task
/// transition goes through [`update_task_if`](TaskStore::update_task_if), a
/// compare-and-swap keyed on the current status (and optionally on the
/// release claim). There is no plain write path for task state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Reserve the next task id. Ids are monotonic and never reused.
    async fn allocate_task_id(&self) -> Result<TaskId>;
    async fn insert_task(&self, task: Task) -> Result<()>;
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn count_tasks(&self) -> Result<usize>;
    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>>;
    async fn tasks_by_requester(&self, requester: AccountAddress) -> Result<Vec<Task>>;
    async fn tasks_by_listing(&self, listing: ListingId) -> Result<Vec<Task>>;

    /// Conditional update: succeeds only if the task's current status is one
    /// of `expected` (and, when `unclaimed_only`, its release is unclaimed).
    /// Guard failure returns [`EscrowError::StateConflict`] with the actual
    /// status — "someone else already transitioned it", not a fault.
    async fn update_task_if(
        &self,
        id: TaskId,
        expected: &[TaskStatus],
        unclaimed_only: bool,
        changes: TaskChanges,
    ) -> Result<Task>;

    async fn insert_listing(&self, new: NewListing) -> Result<Listing>;
    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>>;
    async fn list_listings(&self, filter: ListingFilter) -> Result<Vec<Listing>>;
    async fn update_listing(&self, id: ListingId, changes: ListingChanges) -> Result<Listing>;
    /// Bump the listing's completed-task counter.
    async fn record_listing_completion(&self, id: ListingId) -> Result<()>;

    async fn insert_credential(&self, credential: Credential) -> Result<()>;
    async fn credential_owner(&self, hash: &CredentialHash) -> Result<Option<String>>;
}

/// In-memory store backend. The per-collection write lock makes each
/// conditional update atomic, which is all the concurrency discipline in §5
/// of the lifecycle design relies on.
pub struct MemoryStore {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
    listings: Arc<RwLock<HashMap<ListingId, Listing>>>,
    credentials: Arc<RwLock<HashMap<CredentialHash, Credential>>>,
    next_task_id: AtomicU64,
    next_listing_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            listings: Arc::new(RwLock::new(HashMap::new())),
            credentials: Arc::new(RwLock::new(HashMap::new())),
            next_task_id: AtomicU64::new(1),
            next_listing_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn allocate_task_id(&self) -> Result<TaskId> {
        Ok(TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn insert_task(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(EscrowError::Store(format!(
                "task {} already exists",
                task.id
            )));
        }

        info!(
            task_id = %task.id,
            listing_id = %task.listing_id,
            escrow_address = %task.escrow_address,
            amount = task.escrow_amount.to_native(),
            "📦 Task stored"
        );
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id).cloned())
    }

    async fn count_tasks(&self) -> Result<usize> {
        let tasks = self.tasks.read().await;
        Ok(tasks.len())
    }

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.id);
        Ok(found)
    }

    async fn tasks_by_requester(&self, requester: AccountAddress) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|t| t.requester == Some(requester))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.id);
        Ok(found)
    }

    async fn tasks_by_listing(&self, listing: ListingId) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|t| t.listing_id == listing)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.id);
        Ok(found)
    }

    async fn update_task_if(
        &self,
        id: TaskId,
        expected: &[TaskStatus],
        unclaimed_only: bool,
        changes: TaskChanges,
    ) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| EscrowError::NotFound(format!("task {}", id)))?;

        if !expected.contains(&task.status) || (unclaimed_only && task.release_claimed) {
            debug!(
                task_id = %id,
                current = %task.status,
                claimed = task.release_claimed,
                "Conditional update guard failed"
            );
            return Err(EscrowError::state_conflict(task.status, expected));
        }

        let old_status = task.status;
        changes.apply(task);

        if old_status != task.status {
            info!(
                task_id = %id,
                old_status = %old_status,
                new_status = %task.status,
                "🔄 Task transitioned"
            );
        }

        Ok(task.clone())
    }

    async fn insert_listing(&self, new: NewListing) -> Result<Listing> {
        let id = ListingId(self.next_listing_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        let listing = Listing {
            id,
            name: new.name,
            description: new.description,
            tags: new.tags,
            price: new.price,
            payout_address: new.payout_address,
            owner_credential: new.owner_credential,
            tasks_completed: 0,
            status: ListingStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let mut listings = self.listings.write().await;
        listings.insert(id, listing.clone());

        info!(
            listing_id = %id,
            name = %listing.name,
            price = listing.price.to_native(),
            "📦 Listing stored"
        );
        Ok(listing)
    }

    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>> {
        let listings = self.listings.read().await;
        Ok(listings.get(&id).cloned())
    }

    async fn list_listings(&self, filter: ListingFilter) -> Result<Vec<Listing>> {
        let listings = self.listings.read().await;
        let mut found: Vec<Listing> = listings
            .values()
            .filter(|l| !filter.active_only || l.status == ListingStatus::Active)
            .filter(|l| {
                filter
                    .tag
                    .as_ref()
                    .map(|tag| l.tags.iter().any(|t| t == tag))
                    .unwrap_or(true)
            })
            .filter(|l| {
                filter
                    .search
                    .as_ref()
                    .map(|needle| {
                        let needle = needle.to_lowercase();
                        l.name.to_lowercase().contains(&needle)
                            || l.description.to_lowercase().contains(&needle)
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        found.sort_by_key(|l| l.id);
        Ok(found)
    }

    async fn update_listing(&self, id: ListingId, changes: ListingChanges) -> Result<Listing> {
        let mut listings = self.listings.write().await;
        let listing = listings
            .get_mut(&id)
            .ok_or_else(|| EscrowError::NotFound(format!("listing {}", id)))?;

        if let Some(name) = changes.name {
            listing.name = name;
        }
        if let Some(description) = changes.description {
            listing.description = description;
        }
        if let Some(tags) = changes.tags {
            listing.tags = tags;
        }
        if let Some(price) = changes.price {
            listing.price = price;
        }
        if let Some(payout_address) = changes.payout_address {
            listing.payout_address = payout_address;
        }
        if let Some(status) = changes.status {
            listing.status = status;
        }
        listing.updated_at = Utc::now();

        Ok(listing.clone())
    }

    async fn record_listing_completion(&self, id: ListingId) -> Result<()> {
        let mut listings = self.listings.write().await;
        let listing = listings
            .get_mut(&id)
            .ok_or_else(|| EscrowError::NotFound(format!("listing {}", id)))?;

        listing.tasks_completed += 1;
        listing.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_credential(&self, credential: Credential) -> Result<()> {
        let mut credentials = self.credentials.write().await;
        credentials.insert(credential.hash.clone(), credential);
        Ok(())
    }

    async fn credential_owner(&self, hash: &CredentialHash) -> Result<Option<String>> {
        let credentials = self.credentials.read().await;
        Ok(credentials.get(hash).map(|c| c.owner_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(id: TaskId) -> Task {
        Task::new(
            id,
            ListingId(1),
            "do the thing".to_string(),
            None,
            NativeAmount::from_native(0.5),
            AccountAddress::from_bytes([id.as_u64() as u8; 32]),
        )
    }

    #[tokio::test]
    async fn test_conditional_update_succeeds_on_expected_status() {
        let store = MemoryStore::new();
        let id = store.allocate_task_id().await.unwrap();
        store.insert_task(sample_task(id)).await.unwrap();

        let updated = store
            .update_task_if(
                id,
                &[TaskStatus::Pending],
                false,
                TaskChanges {
                    status: Some(TaskStatus::Funded),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, TaskStatus::Funded);
    }

    #[tokio::test]
    async fn test_conditional_update_reports_actual_status_on_conflict() {
        let store = MemoryStore::new();
        let id = store.allocate_task_id().await.unwrap();
        store.insert_task(sample_task(id)).await.unwrap();

        let err = store
            .update_task_if(
                id,
                &[TaskStatus::Funded],
                false,
                TaskChanges {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        match err {
            EscrowError::StateConflict { current, .. } => {
                assert_eq!(current, TaskStatus::Pending)
            }
            other => panic!("expected StateConflict, got {:?}", other),
        }

        // Nothing was applied.
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_unclaimed_guard_blocks_claimed_tasks() {
        let store = MemoryStore::new();
        let id = store.allocate_task_id().await.unwrap();
        let mut task = sample_task(id);
        task.status = TaskStatus::InProgress;
        task.release_claimed = true;
        store.insert_task(task).await.unwrap();

        let err = store
            .update_task_if(
                id,
                &[TaskStatus::InProgress],
                true,
                TaskChanges {
                    status: Some(TaskStatus::Disputed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EscrowError::StateConflict { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_cas_has_exactly_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let id = store.allocate_task_id().await.unwrap();
        store.insert_task(sample_task(id)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_task_if(
                        id,
                        &[TaskStatus::Pending],
                        false,
                        TaskChanges {
                            status: Some(TaskStatus::Funded),
                            ..Default::default()
                        },
                    )
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_listing_filters() {
        let store = MemoryStore::new();
        let owner = CredentialHash::new("h1");

        store
            .insert_listing(NewListing {
                name: "Research bot".to_string(),
                description: "deep market research".to_string(),
                tags: vec!["research".to_string()],
                price: NativeAmount::from_native(0.05),
                payout_address: AccountAddress::from_bytes([1; 32]),
                owner_credential: owner.clone(),
            })
            .await
            .unwrap();
        let second = store
            .insert_listing(NewListing {
                name: "Code bot".to_string(),
                description: "writes scripts".to_string(),
                tags: vec!["code".to_string()],
                price: NativeAmount::from_native(0.1),
                payout_address: AccountAddress::from_bytes([2; 32]),
                owner_credential: owner,
            })
            .await
            .unwrap();

        store
            .update_listing(
                second.id,
                ListingChanges {
                    status: Some(ListingStatus::Inactive),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let active = store
            .list_listings(ListingFilter {
                active_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Research bot");

        let by_search = store
            .list_listings(ListingFilter {
                search: Some("scripts".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_search.len(), 1);
        assert_eq!(by_search[0].id, second.id);
    }
}
