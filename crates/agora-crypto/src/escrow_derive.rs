use crate::Keypair;
use agora_types::{AccountAddress, TaskId};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Domain separation tag for escrow key derivation. Versioned so a future
/// scheme change cannot collide with addresses already derived.
const ESCROW_DOMAIN_TAG: &[u8] = b"agora-escrow-v1:";

/// Derive the signing keypair for a task's escrow account.
///
/// HMAC-SHA256 keyed by the authority secret over the domain tag plus the
/// decimal task id, with the MAC output used as the ed25519 seed. The mapping
/// is deterministic and, without the authority secret, unpredictable — nobody
/// can compute (or pre-fund) a task's escrow address before creation
/// discloses it.
pub fn derive_escrow_keypair(authority_secret: &[u8; 32], task_id: TaskId) -> Keypair {
    let mut mac = HmacSha256::new_from_slice(authority_secret)
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(ESCROW_DOMAIN_TAG);
    mac.update(task_id.to_string().as_bytes());

    let seed: [u8; 32] = mac.finalize().into_bytes().into();
    Keypair::from_seed(&seed)
}

/// Address-only form of [`derive_escrow_keypair`].
pub fn derive_escrow_address(authority_secret: &[u8; 32], task_id: TaskId) -> AccountAddress {
    derive_escrow_keypair(authority_secret, task_id).address()
}
