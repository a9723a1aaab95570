//! Donation event types emitted by the round manager contract.
//!
//! ```text
//! event GrantDonation(
//!     uint96 indexed grantId,
//!     IERC20 indexed tokenIn,
//!     uint256 donationAmount,   // in the rounds' donation token, after swap
//!     GrantRound[] rounds,
//!     uint256 time
//! );
//! ```

use qf_engine::units::format_units;
use qf_engine::{Address, Contribution, GrantId};
use serde::{Deserialize, Serialize};

use crate::errors::{IndexerError, Result};

/// `keccak256("GrantDonation(uint96,address,uint256,address[],uint256)")`
pub const GRANT_DONATION_TOPIC: &str =
    "0x78b71dd1d58c0cf560eaa84d9d3f2be04d36ba599d928ba35ba2d96871b92107";

/// A decoded `GrantDonation` log. The payer is not part of the log and is
/// resolved from the transaction afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDonationLog {
    pub grant_id: GrantId,
    pub token_in: Address,
    pub donation_amount: u128,
    pub rounds: Vec<Address>,
    pub time: i64,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
}

/// A donation log with its payer, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDonation {
    pub log: GrantDonationLog,
    pub payer: Address,
}

/// A contribution row as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContributionRecord {
    pub id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub grant_id: i64,
    pub payer: String,
    pub token_in: String,
    pub amount_raw: String,
    /// Comma-separated round addresses.
    pub rounds: String,
    pub time: i64,
    pub created_at: i64,
}

impl ContributionRecord {
    /// Convert into an engine contribution, scaling the raw amount by the
    /// donation token's decimals.
    pub fn to_contribution(&self, donation_decimals: u8) -> Result<Contribution> {
        let raw: u128 = self.amount_raw.parse().map_err(|_| {
            IndexerError::EventParse(format!("bad stored amount {:?}", self.amount_raw))
        })?;
        let rounds = self
            .rounds
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<std::result::Result<Vec<Address>, _>>()?;

        Ok(Contribution {
            tx_hash: self.tx_hash.clone(),
            payer: self.payer.parse()?,
            grant_id: GrantId(self.grant_id as u64),
            rounds,
            amount: format_units(raw, donation_decimals)?,
        })
    }
}

pub fn join_rounds(rounds: &[Address]) -> String {
    rounds
        .iter()
        .map(Address::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_converts_to_contribution() {
        let round_a = Address::from_bytes([0xaa; 20]);
        let round_b = Address::from_bytes([0xbb; 20]);
        let record = ContributionRecord {
            id: 1,
            tx_hash: "0x01".into(),
            log_index: 0,
            block_number: 10,
            grant_id: 7,
            payer: Address::from_bytes([1; 20]).to_string(),
            token_in: Address::from_bytes([2; 20]).to_string(),
            amount_raw: "2500000".into(),
            rounds: join_rounds(&[round_a, round_b]),
            time: 1_700_000_000,
            created_at: 0,
        };
        let c = record.to_contribution(6).unwrap();
        assert_eq!(c.amount, 2.5);
        assert_eq!(c.grant_id, GrantId(7));
        assert_eq!(c.rounds, vec![round_a, round_b]);
    }

    #[test]
    fn malformed_amount_is_rejected() {
        let record = ContributionRecord {
            id: 1,
            tx_hash: "0x01".into(),
            log_index: 0,
            block_number: 10,
            grant_id: 7,
            payer: Address::ZERO.to_string(),
            token_in: Address::ZERO.to_string(),
            amount_raw: "lots".into(),
            rounds: String::new(),
            time: 0,
            created_at: 0,
        };
        assert!(record.to_contribution(18).is_err());
    }
}
