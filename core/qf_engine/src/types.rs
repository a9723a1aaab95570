//! # Types
//!
//! Shared data structures used across all modules of the engine.
//!
//! ## Identifiers
//!
//! - [`GrantId`] is the registry's integer grant identifier.
//! - [`Address`] is a validated 20-byte account or token identifier. It parses
//!   from and serializes to the usual `0x`-prefixed hex form, lowercased.
//!
//! ## Round status
//!
//! [`RoundStatus`] is a pure function of wall-clock time:
//!
//! ```text
//! Upcoming ──► Active ──► Completed
//!        now >= start   now >= end
//! ```
//!
//! It is never stored; [`GrantRound::status`] recomputes it on every read.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{EngineError, Result};

// ── Identifiers ──────────────────────────────────────────────────────

/// Grant identifier as assigned by the on-chain grant registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantId(pub u64);

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 20-byte account, contract or token address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 20]);

/// Token addresses share the account address format.
pub type TokenAddress = Address;

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Take the low 20 bytes of a 32-byte ABI word (indexed address topics).
    pub fn from_word(word: &[u8; 32]) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&word[12..]);
        Self(out)
    }
}

impl FromStr for Address {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if body.len() != 40 {
            return Err(EngineError::InvalidAddress(s.to_string()));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(body, &mut out)
            .map_err(|_| EngineError::InvalidAddress(s.to_string()))?;
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Contributions and trust ─────────────────────────────────────────

/// A confirmed donation to one grant, credited to one or more rounds.
///
/// `amount` is already expressed in the round's donation token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub tx_hash: String,
    pub payer: Address,
    pub grant_id: GrantId,
    pub rounds: Vec<Address>,
    pub amount: f64,
}

impl Contribution {
    pub fn counts_for_round(&self, round: &Address) -> bool {
        self.rounds.iter().any(|r| r == round)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustBonusScore {
    pub address: Address,
    pub score: f64,
}

/// Per-payer trust multipliers, looked up with a caller-chosen default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrustScores {
    scores: HashMap<Address, f64>,
}

impl TrustScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from score records. Scores are clamped into `[0, 1]`; a repeated
    /// address keeps its last score.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TrustBonusScore>,
    {
        let scores = records
            .into_iter()
            .map(|r| (r.address, clamp_score(r.score)))
            .collect();
        Self { scores }
    }

    pub fn insert(&mut self, address: Address, score: f64) {
        self.scores.insert(address, clamp_score(score));
    }

    pub fn get(&self, address: &Address) -> Option<f64> {
        self.scores.get(address).copied()
    }

    pub fn score_or(&self, address: &Address, default: f64) -> f64 {
        self.get(address).unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

// ── Rounds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: TokenAddress,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Upcoming,
    Active,
    Completed,
}

impl RoundStatus {
    /// Status of a `[start, end)` window at unix time `now`.
    pub fn at(start_time: i64, end_time: i64, now: i64) -> Self {
        if now < start_time {
            Self::Upcoming
        } else if now < end_time {
            Self::Active
        } else {
            Self::Completed
        }
    }
}

/// A time-boxed matching pool and the grants admitted to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantRound {
    pub address: Address,
    pub name: String,
    /// Unix seconds, inclusive.
    pub start_time: i64,
    /// Unix seconds, exclusive.
    pub end_time: i64,
    pub donation_token: TokenInfo,
    pub matching_token: TokenInfo,
    /// Matching pool in whole matching-token units.
    pub matching_funds: f64,
    pub grants: Vec<GrantId>,
}

impl GrantRound {
    pub fn status(&self, now: i64) -> RoundStatus {
        RoundStatus::at(self.start_time, self.end_time, now)
    }

    pub fn includes_grant(&self, grant_id: GrantId) -> bool {
        self.grants.contains(&grant_id)
    }
}

// ── Predictions ──────────────────────────────────────────────────────

/// Hypothetical extra donations used to sample the matching curve.
pub const PREDICTION_POINTS: [f64; 6] = [0.0, 1.0, 10.0, 100.0, 1_000.0, 10_000.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSample {
    pub prediction_point: f64,
    pub predicted_grant_match: f64,
    /// Increase over the zero-point baseline.
    pub prediction_diff: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantPrediction {
    pub grant_id: GrantId,
    pub samples: Vec<PredictionSample>,
}

impl GrantPrediction {
    pub fn sample_at(&self, point: f64) -> Option<&PredictionSample> {
        self.samples.iter().find(|s| s.prediction_point == point)
    }

    /// Match at the zero point, i.e. with no hypothetical donation added.
    pub fn current_match(&self) -> Option<f64> {
        self.sample_at(0.0).map(|s| s.predicted_grant_match)
    }
}
