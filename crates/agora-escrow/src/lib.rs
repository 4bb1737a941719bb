pub mod error;
pub mod lifecycle;
pub mod release;
pub mod store;
pub mod task;
pub mod verify;
pub mod worker;

pub use error::{EscrowError, Result};
pub use lifecycle::{EscrowContext, LifecycleEngine};
pub use release::{FeePolicy, ReleaseEngine, Settlement, SettlementPlan};
pub use store::{
    Credential, CredentialHash, ListingChanges, ListingFilter, MemoryStore, NewListing,
    TaskChanges, TaskStore,
};
pub use task::{Listing, ListingStatus, SettlementOutcome, Task, TaskStatus};
pub use verify::{PaymentVerifier, VerifiedPayment, VerifyOutcome};
pub use worker::{HeuristicExecutor, TaskWorker, WorkExecutor};
