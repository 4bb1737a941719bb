use crate::address_encoding;
use crate::keys::PublicKey;
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A ledger account address: the 32 bytes of an ed25519 public key, rendered
/// as bech32 (`agora1...`) on every external surface. Hex is accepted on
/// input for compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress([u8; 32]);

impl AccountAddress {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_public_key(pubkey: &PublicKey) -> Self {
        Self(*pubkey.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bech32(&self) -> Result<String> {
        address_encoding::encode_address(&self.0)
    }

    pub fn from_bech32(address: &str) -> Result<Self> {
        let bytes = address_encoding::decode_address(address)?;
        Ok(Self(bytes))
    }

    pub fn from_string(address: &str) -> Result<Self> {
        // Try bech32 format first
        if address.starts_with("agora") {
            Self::from_bech32(address)
        } else if address_encoding::is_hex_address(address) {
            let bytes = address_encoding::from_hex_address(address)?;
            Ok(Self(bytes))
        } else {
            Err(anyhow::anyhow!("Invalid address format"))
        }
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bech32() {
            Ok(addr) => write!(f, "{}", addr),
            // Fall back to hex if encoding fails (shouldn't happen in practice)
            Err(_) => write!(f, "0x{}", hex::encode(self.0)),
        }
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AccountAddress::from_string(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        let addr = AccountAddress::from_bytes([7; 32]);
        let rendered = addr.to_string();

        assert!(rendered.starts_with("agora1"));
        assert_eq!(AccountAddress::from_string(&rendered).unwrap(), addr);
    }

    #[test]
    fn test_hex_input_accepted() {
        let addr = AccountAddress::from_bytes([9; 32]);
        let hex = format!("0x{}", hex::encode(addr.as_bytes()));

        assert_eq!(AccountAddress::from_string(&hex).unwrap(), addr);
    }

    #[test]
    fn test_serde_as_string() {
        let addr = AccountAddress::from_bytes([3; 32]);
        let json = serde_json::to_string(&addr).unwrap();

        assert!(json.starts_with("\"agora1"));

        let back: AccountAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
