//! Per-grant, per-round summaries combining contribution totals with
//! prediction output.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{
    Address, Contribution, GrantId, GrantPrediction, GrantRound, RoundStatus, TokenInfo,
};

/// Prediction points reported in round summaries.
pub const SUMMARY_POINTS: [f64; 4] = [1.0, 10.0, 100.0, 1_000.0];

/// Predictions for every grant of a round, keyed by round address.
pub type RoundPredictions = HashMap<Address, Vec<GrantPrediction>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionDelta {
    pub point: f64,
    /// Match increase over the baseline, two decimal places.
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantRoundDetails {
    pub grant_id: GrantId,
    pub round_address: Address,
    pub round_name: String,
    pub status: RoundStatus,
    pub donation_token: TokenInfo,
    pub matching_token: TokenInfo,
    pub contribution_total: f64,
    pub contribution_count: usize,
    pub contributor_count: usize,
    /// `None` means predictions were not computed, not that the match is zero.
    pub matching: Option<f64>,
    pub predictions: Option<Vec<PredictionDelta>>,
}

/// Summarise `grant_id` in every round that lists it.
///
/// Rounds the grant does not belong to are skipped. `now` is unix seconds and
/// only feeds the status field.
pub fn aggregate(
    grant_id: GrantId,
    rounds: &[GrantRound],
    round_predictions: &RoundPredictions,
    contributions: &[Contribution],
    now: i64,
) -> Vec<GrantRoundDetails> {
    rounds
        .iter()
        .filter(|round| round.includes_grant(grant_id))
        .map(|round| {
            let own: Vec<&Contribution> = contributions
                .iter()
                .filter(|c| c.grant_id == grant_id && c.counts_for_round(&round.address))
                .collect();
            let contributor_count = own.iter().map(|c| c.payer).collect::<HashSet<_>>().len();

            let prediction = round_predictions
                .get(&round.address)
                .and_then(|all| all.iter().find(|p| p.grant_id == grant_id));

            GrantRoundDetails {
                grant_id,
                round_address: round.address,
                round_name: round.name.clone(),
                status: round.status(now),
                donation_token: round.donation_token.clone(),
                matching_token: round.matching_token.clone(),
                contribution_total: own.iter().map(|c| c.amount).sum(),
                contribution_count: own.len(),
                contributor_count,
                matching: prediction.and_then(GrantPrediction::current_match),
                predictions: prediction.map(summary_deltas),
            }
        })
        .collect()
}

fn summary_deltas(prediction: &GrantPrediction) -> Vec<PredictionDelta> {
    SUMMARY_POINTS
        .iter()
        .filter_map(|&point| {
            prediction.sample_at(point).map(|s| PredictionDelta {
                point,
                diff: format!("{:.2}", s.prediction_diff),
            })
        })
        .collect()
}
