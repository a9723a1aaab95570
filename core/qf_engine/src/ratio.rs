//! Fixed-point ratio allocation.
//!
//! A multi-token donation is submitted as one transaction in which every grant
//! receives a ratio of its token's swapped output. Ratios are integers scaled by
//! [`RATIO_SCALE`]; the contract requires that the ratios of all donations
//! sharing a token sum to exactly the scale.
//!
//! Floor division truncates, so each group's naive sum can fall short of the
//! scale by at most one unit per item. The whole shortfall goes to the first
//! item of the group in input order.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

// The expansion names `Result<T, E>` unqualified; keep it clear of the
// crate's one-argument alias.
mod wide {
    use uint::construct_uint;

    construct_uint! {
        /// 256-bit unsigned integer for `amount * scale` products.
        pub struct U256(4);
    }
}

use wide::U256;

/// Fixed-point whole (1e18).
pub const RATIO_SCALE: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioInput<K> {
    pub group_key: K,
    /// Amount in base units of the group's token.
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioOutput<K> {
    pub group_key: K,
    pub ratio: u128,
}

/// Compute per-item ratios so that every group sums to [`RATIO_SCALE`].
///
/// Output preserves input order. Fails with [`EngineError::InvalidAmount`] for a
/// group whose amounts are all zero, and with [`EngineError::InvariantViolation`]
/// if a group's truncated sum somehow exceeds the scale.
pub fn allocate_ratios<K>(items: &[RatioInput<K>]) -> Result<Vec<RatioOutput<K>>>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    let mut totals: HashMap<&K, U256> = HashMap::new();
    for item in items {
        *totals.entry(&item.group_key).or_insert_with(U256::zero) += U256::from(item.amount);
    }

    let scale = U256::from(RATIO_SCALE);
    let mut first_index: HashMap<&K, usize> = HashMap::new();
    let mut sums: HashMap<&K, u128> = HashMap::new();
    let mut out = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        let total = totals[&item.group_key];
        if total.is_zero() {
            return Err(EngineError::InvalidAmount(format!(
                "group {:?} has no positive amount",
                item.group_key
            )));
        }

        // amount <= total, so the quotient is <= scale and fits in u128.
        let ratio = (U256::from(item.amount) * scale / total).low_u128();

        first_index.entry(&item.group_key).or_insert(i);
        let sum = sums.entry(&item.group_key).or_insert(0);
        *sum = sum
            .checked_add(ratio)
            .ok_or_else(|| EngineError::Overflow("ratio sum".to_string()))?;

        out.push(RatioOutput {
            group_key: item.group_key.clone(),
            ratio,
        });
    }

    for (key, sum) in sums {
        if sum > RATIO_SCALE {
            return Err(EngineError::InvariantViolation(format!(
                "ratios for group {key:?} sum to {sum}, above scale {RATIO_SCALE}"
            )));
        }
        out[first_index[key]].ratio += RATIO_SCALE - sum;
    }

    Ok(out)
}

/// Check that every group in a finished allocation sums to exactly [`RATIO_SCALE`].
pub fn verify_ratio_sums<K>(ratios: &[RatioOutput<K>]) -> Result<()>
where
    K: Eq + Hash + std::fmt::Debug,
{
    let mut sums: HashMap<&K, u128> = HashMap::new();
    for r in ratios {
        let sum = sums.entry(&r.group_key).or_insert(0);
        *sum = sum
            .checked_add(r.ratio)
            .ok_or_else(|| EngineError::Overflow("ratio sum".to_string()))?;
    }
    match sums.into_iter().find(|(_, sum)| *sum != RATIO_SCALE) {
        Some((key, sum)) => Err(EngineError::InvariantViolation(format!(
            "ratios for group {key:?} sum to {sum}, expected {RATIO_SCALE}"
        ))),
        None => Ok(()),
    }
}
