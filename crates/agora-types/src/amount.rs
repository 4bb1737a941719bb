use serde::{Deserialize, Serialize};
use std::fmt;

pub const NATIVE_DECIMALS: u32 = 9;
pub const NATIVE_BASE_UNIT: u64 = 1_000_000_000; // 10^9

/// An amount of the ledger's native token, held as base units (the minimal
/// atomic denomination). All arithmetic happens on base units; floating point
/// appears only at the display/parse boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NativeAmount(u64);

impl NativeAmount {
    pub const ZERO: Self = Self(0);

    pub fn from_native(native: f64) -> Self {
        Self((native * NATIVE_BASE_UNIT as f64).round() as u64)
    }

    pub fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    pub fn to_native(&self) -> f64 {
        self.0 as f64 / NATIVE_BASE_UNIT as f64
    }

    pub fn to_base_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}", self.to_native())
    }
}
