//! Fee rates and fee sanity checks

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Default fee rate (photons per byte)
pub const DEFAULT_FEE_RATE: u64 = 10_000;

/// Outputs at or below this value are not worth creating as change
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

/// Highest accepted ratio of actual fee to size-based expected fee
pub const MAX_FEE_RATIO: f64 = 1.2;

// =============================================================================
// Fee Rate
// =============================================================================

/// Fee rate in photons per byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeeRate(pub u64);

impl FeeRate {
    pub fn from_photons_per_byte(rate: u64) -> Self {
        Self(rate)
    }

    /// Create from total fee and transaction size
    pub fn from_fee_and_size(fee: u64, size_bytes: usize) -> Self {
        if size_bytes == 0 {
            Self(0)
        } else {
            Self(fee / size_bytes as u64)
        }
    }

    /// Calculate fee for a given size
    pub fn fee_for_size(&self, size_bytes: usize) -> u64 {
        self.0 * size_bytes as u64
    }

    pub fn as_photons_per_byte(&self) -> u64 {
        self.0
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self(DEFAULT_FEE_RATE)
    }
}

/// Whether `actual` stays within the accepted margin over `expected`
pub fn fee_within_tolerance(actual: u64, expected: u64) -> bool {
    actual as f64 <= expected as f64 * MAX_FEE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_for_size() {
        let rate = FeeRate::from_photons_per_byte(2);
        assert_eq!(rate.fee_for_size(226), 452);
        assert_eq!(FeeRate::from_fee_and_size(452, 226), rate);
        assert_eq!(FeeRate::from_fee_and_size(1, 0), FeeRate(0));
    }

    #[test]
    fn test_tolerance() {
        assert!(fee_within_tolerance(120, 100));
        assert!(!fee_within_tolerance(121, 100));
        assert!(fee_within_tolerance(0, 0));
    }
}
