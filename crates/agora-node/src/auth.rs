use agora_escrow::{CredentialHash, EscrowError, TaskStore};
use axum::http::HeaderMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const API_KEY_HEADER: &str = "x-api-key";

/// Hash a raw credential for storage/lookup. Only the hash is ever persisted.
pub fn hash_credential(raw: &str) -> CredentialHash {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    CredentialHash::new(hex::encode(hasher.finalize()))
}

/// Issue a fresh opaque credential. Shown to the caller exactly once.
pub fn generate_credential() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("agr-{}", hex::encode(bytes))
}

/// Resolve the `x-api-key` header to a stored credential. A missing header
/// and an unknown key are distinct authorization failures.
pub async fn require_credential(
    headers: &HeaderMap,
    store: &Arc<dyn TaskStore>,
) -> Result<(CredentialHash, String), EscrowError> {
    let raw = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EscrowError::Unauthorized("missing x-api-key header".to_string()))?;

    let hash = hash_credential(raw);
    let owner = store
        .credential_owner(&hash)
        .await?
        .ok_or_else(|| EscrowError::Unauthorized("invalid API key".to_string()))?;

    Ok((hash, owner))
}
