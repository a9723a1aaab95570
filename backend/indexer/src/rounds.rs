//! Rounds registry loaded from a JSON file.
//!
//! ```json
//! {
//!   "tokens": [{ "address": "0x…", "symbol": "DAI", "decimals": 18 }],
//!   "grants": [{ "grant_id": 1, "name": "…", "payee": "0x…" }],
//!   "rounds": [{ "address": "0x…", "name": "…", "start_time": 0, "end_time": 0,
//!                "donation_token": {…}, "matching_token": {…},
//!                "matching_funds": 50000.0, "grants": [1, 2] }]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use qf_engine::cart::{GrantCatalog, GrantMetadata, TokenCatalog};
use qf_engine::units::MAX_DECIMALS;
use qf_engine::{Address, GrantId, GrantRound, RoundStatus, TokenInfo};
use serde::Deserialize;
use tracing::info;

use crate::errors::{IndexerError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct GrantEntry {
    pub grant_id: GrantId,
    pub name: String,
    pub payee: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub tokens: Vec<TokenInfo>,
    #[serde(default)]
    pub grants: Vec<GrantEntry>,
    pub rounds: Vec<GrantRound>,
}

#[derive(Debug, Clone)]
pub struct RoundRegistry {
    tokens: Vec<TokenInfo>,
    grants: Vec<GrantEntry>,
    rounds: Vec<GrantRound>,
}

impl RoundRegistry {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let registry = Self::from_json(&raw)?;
        info!(
            "Loaded {} rounds, {} grants, {} tokens from {}",
            registry.rounds.len(),
            registry.grants.len(),
            registry.tokens.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        validate(&file)?;
        Ok(Self {
            tokens: file.tokens,
            grants: file.grants,
            rounds: file.rounds,
        })
    }

    pub fn rounds(&self) -> &[GrantRound] {
        &self.rounds
    }

    pub fn round(&self, address: &Address) -> Option<&GrantRound> {
        self.rounds.iter().find(|r| &r.address == address)
    }

    /// Listed in the grants table or admitted to any round.
    pub fn has_grant(&self, grant_id: GrantId) -> bool {
        self.grants.iter().any(|g| g.grant_id == grant_id)
            || self.rounds.iter().any(|r| r.includes_grant(grant_id))
    }

    pub fn rounds_for_grant(&self, grant_id: GrantId) -> Vec<GrantRound> {
        self.rounds
            .iter()
            .filter(|r| r.includes_grant(grant_id))
            .cloned()
            .collect()
    }

    /// Grants keyed by id, each credited to the rounds active at `now`.
    pub fn grant_catalog(&self, now: i64) -> GrantCatalog {
        self.grants
            .iter()
            .map(|g| {
                let rounds = self
                    .rounds
                    .iter()
                    .filter(|r| r.includes_grant(g.grant_id) && r.status(now) == RoundStatus::Active)
                    .map(|r| r.address)
                    .collect();
                (
                    g.grant_id,
                    GrantMetadata {
                        grant_id: g.grant_id,
                        name: g.name.clone(),
                        payee: g.payee,
                        rounds,
                    },
                )
            })
            .collect()
    }

    /// Listed tokens plus every round's donation and matching token.
    pub fn token_catalog(&self) -> TokenCatalog {
        self.tokens
            .iter()
            .chain(self.rounds.iter().flat_map(|r| [&r.donation_token, &r.matching_token]))
            .map(|t| (t.address, t.clone()))
            .collect()
    }
}

fn validate(file: &RegistryFile) -> Result<()> {
    let mut seen = HashSet::new();
    for round in &file.rounds {
        let bad = |why: &str| IndexerError::Config(format!("round {}: {why}", round.address));
        if !seen.insert(round.address) {
            return Err(bad("listed twice"));
        }
        if round.end_time <= round.start_time {
            return Err(bad("end_time must be after start_time"));
        }
        if !round.matching_funds.is_finite() || round.matching_funds < 0.0 {
            return Err(bad("matching_funds must be a non-negative number"));
        }
        if round.donation_token.decimals > MAX_DECIMALS
            || round.matching_token.decimals > MAX_DECIMALS
        {
            return Err(bad("token decimals out of range"));
        }
    }
    let mut grant_ids = HashSet::new();
    for grant in &file.grants {
        if !grant_ids.insert(grant.grant_id) {
            return Err(IndexerError::Config(format!(
                "grant {} listed twice",
                grant.grant_id
            )));
        }
    }
    Ok(())
}
