pub mod address;
pub mod address_encoding;
pub mod amount;
pub mod id;
pub mod keys;

pub use address::AccountAddress;
pub use amount::{NativeAmount, NATIVE_BASE_UNIT, NATIVE_DECIMALS};
pub use id::{ListingId, TaskId, TxRef};
pub use keys::{PublicKey, Signature};
