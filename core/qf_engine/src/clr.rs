//! Capped-linear quadratic-funding (CLR) match prediction.
//!
//! A grant's weight is the trust-weighted quadratic-funding term
//!
//! ```text
//! w_g = (Σ √(c_i · t_i))² − Σ c_i · t_i
//! ```
//!
//! and its match is its share of the pool, `pot · w_g / Σ w`. The pool is
//! fixed, so a grant's match can never exceed it.
//!
//! Predictions add one synthetic contribution of each prediction point to the
//! target grant, recompute the full weight vector, and report the match and its
//! increase over the zero-point baseline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Contribution, GrantId, GrantPrediction, PredictionSample, TrustScores};

/// Weights at or below this fraction of the linear sum are treated as zero.
/// Absorbs `√x · √x − x` rounding for single-contributor grants.
pub const WEIGHT_EPSILON: f64 = 1e-12;

/// Fractional digits kept on predicted matches; `f64` is not reliable past this
/// for pool-sized values.
pub const MAX_MATCH_DECIMALS: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Trust score of the synthetic payer behind each prediction point.
    pub synthetic_trust: f64,
    /// Trust score for payers missing from the score table.
    pub default_trust: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            synthetic_trust: 1.0,
            default_trust: 0.0,
        }
    }
}

/// Running sums for one grant's weight.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct WeightSums {
    sum_sqrt: f64,
    sum_linear: f64,
}

impl WeightSums {
    fn add(&mut self, amount: f64, trust: f64) {
        let value = amount * trust;
        if value > 0.0 && value.is_finite() {
            self.sum_sqrt += value.sqrt();
            self.sum_linear += value;
        }
    }

    fn with(mut self, amount: f64, trust: f64) -> Self {
        self.add(amount, trust);
        self
    }

    fn weight(&self) -> f64 {
        let w = self.sum_sqrt * self.sum_sqrt - self.sum_linear;
        if w <= self.sum_linear * WEIGHT_EPSILON {
            0.0
        } else {
            w
        }
    }
}

/// Per-grant weight sums for one round, keyed in grant order.
#[derive(Debug, Clone, Default)]
pub struct RoundWeights {
    grants: BTreeMap<GrantId, WeightSums>,
}

impl RoundWeights {
    /// Accumulate the contributions credited to a round.
    pub fn from_contributions(
        contributions: &[Contribution],
        trust_scores: &TrustScores,
        config: &PredictionConfig,
    ) -> Self {
        let mut grants: BTreeMap<GrantId, WeightSums> = BTreeMap::new();
        for c in contributions {
            let trust = trust_scores.score_or(&c.payer, config.default_trust);
            grants.entry(c.grant_id).or_default().add(c.amount, trust);
        }
        Self { grants }
    }

    /// Current weight of `grant_id`, zero when it has no contributions.
    pub fn weight(&self, grant_id: GrantId) -> f64 {
        self.grants.get(&grant_id).map(WeightSums::weight).unwrap_or(0.0)
    }

    pub fn total_weight(&self) -> f64 {
        self.grants.values().map(WeightSums::weight).sum()
    }

    fn weight_of_others(&self, grant_id: GrantId) -> f64 {
        self.grants
            .iter()
            .filter(|(id, _)| **id != grant_id)
            .map(|(_, sums)| sums.weight())
            .sum()
    }

    /// Match for `grant_id` if one extra contribution of `point` were made by
    /// the synthetic payer.
    fn match_at(
        &self,
        grant_id: GrantId,
        point: f64,
        total_pot: f64,
        decimals: u8,
        config: &PredictionConfig,
    ) -> f64 {
        let own = self
            .grants
            .get(&grant_id)
            .copied()
            .unwrap_or_default()
            .with(point, config.synthetic_trust)
            .weight();
        let denominator = self.weight_of_others(grant_id) + own;
        if denominator <= 0.0 || total_pot <= 0.0 {
            return 0.0;
        }
        truncate_to_decimals(total_pot * own / denominator, decimals)
    }

    /// Sample the matching curve of `grant_id` at each prediction point.
    pub fn predict(
        &self,
        grant_id: GrantId,
        total_pot: f64,
        matching_token_decimals: u8,
        prediction_points: &[f64],
        config: &PredictionConfig,
    ) -> GrantPrediction {
        let baseline = self.match_at(grant_id, 0.0, total_pot, matching_token_decimals, config);
        let samples = prediction_points
            .iter()
            .map(|&point| {
                let predicted = if point == 0.0 {
                    baseline
                } else {
                    self.match_at(grant_id, point, total_pot, matching_token_decimals, config)
                };
                PredictionSample {
                    prediction_point: point,
                    predicted_grant_match: predicted,
                    prediction_diff: predicted - baseline,
                }
            })
            .collect();

        GrantPrediction { grant_id, samples }
    }
}

/// Predict matching for one grant from the round's contributions.
///
/// Grants without contributions get a zero baseline; the call never fails.
pub fn predict(
    grant_id: GrantId,
    round_contributions: &[Contribution],
    trust_scores: &TrustScores,
    total_pot: f64,
    matching_token_decimals: u8,
    prediction_points: &[f64],
    config: &PredictionConfig,
) -> GrantPrediction {
    RoundWeights::from_contributions(round_contributions, trust_scores, config).predict(
        grant_id,
        total_pot,
        matching_token_decimals,
        prediction_points,
        config,
    )
}

/// Predict matching for every listed grant, sharing one weight pass.
pub fn predict_round(
    grants: &[GrantId],
    round_contributions: &[Contribution],
    trust_scores: &TrustScores,
    total_pot: f64,
    matching_token_decimals: u8,
    prediction_points: &[f64],
    config: &PredictionConfig,
) -> Vec<GrantPrediction> {
    let weights = RoundWeights::from_contributions(round_contributions, trust_scores, config);
    grants
        .iter()
        .map(|&g| weights.predict(g, total_pot, matching_token_decimals, prediction_points, config))
        .collect()
}

/// Present match of every grant that has contributions in the round.
pub fn current_matches(
    round_contributions: &[Contribution],
    trust_scores: &TrustScores,
    total_pot: f64,
    matching_token_decimals: u8,
    config: &PredictionConfig,
) -> BTreeMap<GrantId, f64> {
    let weights = RoundWeights::from_contributions(round_contributions, trust_scores, config);
    let total = weights.total_weight();
    weights
        .grants
        .iter()
        .map(|(id, sums)| {
            let m = if total > 0.0 && total_pot > 0.0 {
                truncate_to_decimals(total_pot * sums.weight() / total, matching_token_decimals)
            } else {
                0.0
            };
            (*id, m)
        })
        .collect()
}

fn truncate_to_decimals(value: f64, decimals: u8) -> f64 {
    let factor = 10f64.powi(i32::from(decimals.min(MAX_MATCH_DECIMALS)));
    (value * factor).floor() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    fn payer(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn contribution(grant: u64, from: u8, amount: f64) -> Contribution {
        Contribution {
            tx_hash: format!("0x{grant:02x}{from:02x}"),
            payer: payer(from),
            grant_id: GrantId(grant),
            rounds: vec![],
            amount,
        }
    }

    fn full_trust(payers: &[u8]) -> TrustScores {
        let mut t = TrustScores::new();
        for p in payers {
            t.insert(payer(*p), 1.0);
        }
        t
    }

    #[test]
    fn single_small_contribution_never_goes_negative() {
        for amount in [0.1, 0.3, 1e-7, 3.3, 7.77e-3, 123.456] {
            let w = RoundWeights::from_contributions(
                &[contribution(1, 1, amount)],
                &full_trust(&[1]),
                &PredictionConfig::default(),
            );
            assert_eq!(w.weight(GrantId(1)), 0.0, "amount {amount}");
        }
    }

    #[test]
    fn missing_trust_uses_default() {
        let contributions = [contribution(1, 1, 100.0), contribution(1, 2, 100.0)];
        let config = PredictionConfig::default();
        let none = RoundWeights::from_contributions(&contributions, &TrustScores::new(), &config);
        assert_eq!(none.weight(GrantId(1)), 0.0);

        let half = PredictionConfig {
            default_trust: 0.5,
            ..config
        };
        let w = RoundWeights::from_contributions(&contributions, &TrustScores::new(), &half);
        // (2·√50)² − 100 = 100
        assert!((w.weight(GrantId(1)) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn curve_is_monotonic_in_prediction_point() {
        let contributions = [
            contribution(1, 1, 5.0),
            contribution(1, 2, 20.0),
            contribution(2, 3, 50.0),
            contribution(2, 4, 50.0),
        ];
        let p = predict(
            GrantId(1),
            &contributions,
            &full_trust(&[1, 2, 3, 4]),
            10_000.0,
            18,
            &crate::types::PREDICTION_POINTS,
            &PredictionConfig::default(),
        );
        let matches: Vec<f64> = p.samples.iter().map(|s| s.predicted_grant_match).collect();
        assert!(matches.windows(2).all(|w| w[0] <= w[1]), "{matches:?}");
        assert_eq!(p.samples[0].prediction_diff, 0.0);
        assert!(matches.iter().all(|m| *m <= 10_000.0));
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let contributions = [
            contribution(1, 1, 3.0),
            contribution(1, 2, 11.0),
            contribution(2, 3, 7.0),
            contribution(2, 1, 2.0),
        ];
        let trust = full_trust(&[1, 2, 3]);
        let run = || {
            predict_round(
                &[GrantId(1), GrantId(2)],
                &contributions,
                &trust,
                777.0,
                6,
                &crate::types::PREDICTION_POINTS,
                &PredictionConfig::default(),
            )
        };
        let a = serde_json::to_vec(&run()).unwrap();
        let b = serde_json::to_vec(&run()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_pot_predicts_zero() {
        let contributions = [contribution(1, 1, 10.0), contribution(1, 2, 10.0)];
        let p = predict(
            GrantId(1),
            &contributions,
            &full_trust(&[1, 2]),
            0.0,
            18,
            &[0.0, 100.0],
            &PredictionConfig::default(),
        );
        assert!(p.samples.iter().all(|s| s.predicted_grant_match == 0.0));
    }

    #[test]
    fn current_matches_split_pool_by_weight() {
        let contributions = [
            contribution(1, 1, 100.0),
            contribution(1, 2, 100.0),
            contribution(2, 1, 100.0),
            contribution(2, 2, 100.0),
        ];
        let m = current_matches(
            &contributions,
            &full_trust(&[1, 2]),
            1000.0,
            18,
            &PredictionConfig::default(),
        );
        assert_eq!(m[&GrantId(1)], 500.0);
        assert_eq!(m[&GrantId(2)], 500.0);
    }

    #[test]
    fn matches_truncate_to_token_decimals() {
        assert_eq!(truncate_to_decimals(1.23456, 2), 1.23);
        assert_eq!(truncate_to_decimals(1000.0, 18), 1000.0);
        assert_eq!(truncate_to_decimals(0.999, 0), 0.0);
    }
}
