//! aserti3-2d difficulty retargeting
//!
//! The target of the next block is the anchor's target scaled by
//! `2^((time_delta - spacing * (height_delta + 1)) / half_life)`. The exponent
//! is computed in 16.16 fixed point; the fractional power uses a cubic
//! approximation and the integer part becomes a shift.

use primitive_types::{U256, U512};
use serde::{Deserialize, Serialize};

/// Seconds between blocks
pub const TARGET_SPACING: i64 = 300;
/// Two days
pub const HALF_LIFE: i64 = 2 * 24 * 60 * 60;

/// Block the schedule is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsertAnchor {
    pub height: u32,
    pub bits: u32,
    /// Timestamp of the anchor's parent
    pub prev_time: u32,
}

/// Easiest allowed mainnet target, compact `0x1d00ffff`
pub fn mainnet_pow_limit() -> U256 {
    U256::MAX >> 32
}

/// Decode compact `nBits`; negative or overflowing encodings give zero
pub fn target_from_bits(bits: u32) -> U256 {
    let size = (bits >> 24) as usize;
    let word = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 && word != 0 {
        return U256::zero();
    }
    if size <= 3 {
        return U256::from(word >> (8 * (3 - size)));
    }
    let overflow = word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
    if overflow {
        return U256::zero();
    }
    U256::from(word) << (8 * (size - 3))
}

/// Encode a target as compact `nBits`
pub fn bits_from_target(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | ((size as u32) << 24)
}

fn low_u256(value: U512) -> U256 {
    let mut bytes = [0u8; 64];
    value.to_little_endian(&mut bytes);
    U256::from_little_endian(&bytes[..32])
}

/// Retarget schedule of one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsertParams {
    pub anchor: AsertAnchor,
    pub pow_limit: U256,
    pub target_spacing: i64,
    pub half_life: i64,
}

impl AsertParams {
    pub fn new(anchor: AsertAnchor) -> Self {
        Self {
            anchor,
            pow_limit: mainnet_pow_limit(),
            target_spacing: TARGET_SPACING,
            half_life: HALF_LIFE,
        }
    }

    pub fn with_pow_limit(mut self, pow_limit: U256) -> Self {
        self.pow_limit = pow_limit;
        self
    }

    /// Target required of the block following one at `prev_height` with timestamp `prev_time`
    pub fn next_target(&self, prev_height: u32, prev_time: u32) -> U256 {
        let anchor_target = target_from_bits(self.anchor.bits);
        let time_delta = i64::from(prev_time) - i64::from(self.anchor.prev_time);
        let height_delta = i64::from(prev_height) - i64::from(self.anchor.height);

        let exponent = ((time_delta - self.target_spacing * (height_delta + 1)) * 65536) / self.half_life;
        // arithmetic shift floors, so frac stays in [0, 65536)
        let shifts = exponent >> 16;
        let frac = (exponent - shifts * 65536) as u128;
        let factor = 65536
            + ((195_766_423_245_049u128 * frac
                + 971_821_376u128 * frac * frac
                + 5_127u128 * frac * frac * frac
                + (1u128 << 47))
                >> 48);

        let scaled = U512::from(anchor_target) * U512::from(factor as u64);
        let shifts = shifts - 16;
        let pow_limit = U512::from(self.pow_limit);
        let next = if shifts <= 0 {
            scaled >> ((-shifts).min(512) as usize)
        } else if shifts >= 256 {
            pow_limit
        } else {
            scaled << (shifts as usize)
        };

        if next.is_zero() {
            U256::one()
        } else if next > pow_limit {
            self.pow_limit
        } else {
            low_u256(next)
        }
    }

    pub fn next_bits(&self, prev_height: u32, prev_time: u32) -> u32 {
        bits_from_target(self.next_target(prev_height, prev_time))
    }
}
