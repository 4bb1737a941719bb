pub mod client;
pub mod memory;
pub mod rpc;

pub use client::{LedgerClient, LedgerError, TransactionInfo};
pub use memory::MemoryLedger;
pub use rpc::RpcLedger;
