pub mod escrow_derive;

use agora_types::{AccountAddress, PublicKey, Signature};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

pub use escrow_derive::{derive_escrow_address, derive_escrow_keypair};

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// A keypair for signing and verification
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    public_key: PublicKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = PublicKey::from_bytes(signing_key.verifying_key().to_bytes());

        Self {
            signing_key,
            public_key,
        }
    }

    /// Create a keypair from a fixed 32-byte seed. Deterministic: the same
    /// seed always yields the same keypair.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let public_key = PublicKey::from_bytes(signing_key.verifying_key().to_bytes());

        Self {
            signing_key,
            public_key,
        }
    }

    /// Create a keypair from bytes (32 bytes for private key)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(bytes);

        Ok(Self::from_seed(&key_bytes))
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The ledger address controlled by this keypair.
    pub fn address(&self) -> AccountAddress {
        AccountAddress::from_public_key(&self.public_key)
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        let signature = self.signing_key.sign(message);
        Signature::new(signature.to_bytes().to_vec())
    }

    /// Export keypair as bytes (private key only, public can be derived)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

/// Verify a detached signature against a public key.
pub fn verify_signature(pubkey: &PublicKey, message: &[u8], signature: &Signature) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(pubkey.as_bytes())
        .map_err(|_| CryptoError::SignatureVerificationFailed)?;

    let sig_bytes: [u8; 64] = signature
        .as_bytes()
        .try_into()
        .map_err(|_| CryptoError::SignatureVerificationFailed)?;
    let signature = DalekSignature::from_bytes(&sig_bytes);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}
