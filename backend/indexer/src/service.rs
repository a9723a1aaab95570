//! Read-side computations behind the API: round predictions and per-grant
//! round summaries, built from indexed contributions.

use std::collections::BTreeSet;
use std::sync::Arc;

use qf_engine::{
    aggregate, predict_round, Address, Contribution, GrantId, GrantPrediction, GrantRound,
    GrantRoundDetails, RoundPredictions, PREDICTION_POINTS,
};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::api::ApiState;
use crate::cache::load_or_compute;
use crate::db;
use crate::errors::{IndexerError, Result};
use crate::events::ContributionRecord;
use crate::trust::fetch_trust_scores;

pub fn prediction_cache_key(round: &Address) -> String {
    format!("predictions:{round}")
}

/// Stored records as engine contributions, amounts in the round's donation
/// token.
pub fn to_contributions(
    records: &[ContributionRecord],
    round: &GrantRound,
) -> Result<Vec<Contribution>> {
    records
        .iter()
        .map(|r| r.to_contribution(round.donation_token.decimals))
        .collect()
}

pub async fn round_contributions(
    state: &ApiState,
    round: &GrantRound,
) -> Result<Vec<Contribution>> {
    let records = db::get_contributions_for_round(&state.pool, &round.address).await?;
    to_contributions(&records, round)
}

/// Predictions for every grant of `round`, cached at the indexed height.
pub async fn round_predictions(
    state: &ApiState,
    round: &GrantRound,
) -> Result<Vec<GrantPrediction>> {
    let height = db::get_indexed_height(&state.pool).await?;
    let key = prediction_cache_key(&round.address);

    load_or_compute(state.cache.as_ref(), &state.locks, &key, height, || async {
        let contributions = round_contributions(state, round).await?;
        let payers: Vec<Address> = contributions
            .iter()
            .map(|c| c.payer)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let trust = fetch_trust_scores(
            &state.client,
            state.config.trust_api_url.as_deref(),
            &payers,
        )
        .await?;

        debug!(
            "Computing predictions for round {} ({} contributions, {} payers)",
            round.address,
            contributions.len(),
            payers.len()
        );
        Ok::<_, IndexerError>(predict_round(
            &round.grants,
            &contributions,
            &trust,
            round.matching_funds,
            round.matching_token.decimals,
            &PREDICTION_POINTS,
            &state.config.prediction_config(),
        ))
    })
    .await
}

/// Summaries of `grant_id` in every round that lists it. A known grant in no
/// round gets an empty list; an unknown grant is `NotFound`.
///
/// Rounds are processed concurrently. A round whose predictions fail is still
/// reported, with its matching fields left empty.
pub async fn grant_round_details(
    state: Arc<ApiState>,
    grant_id: GrantId,
) -> Result<Vec<GrantRoundDetails>> {
    if !state.registry.has_grant(grant_id) {
        return Err(IndexerError::NotFound(format!("grant {grant_id}")));
    }
    let rounds = state.registry.rounds_for_grant(grant_id);
    let now = chrono::Utc::now().timestamp();

    let mut tasks = JoinSet::new();
    for (index, round) in rounds.into_iter().enumerate() {
        let state = state.clone();
        tasks.spawn(async move {
            let contributions: Vec<Contribution> = round_contributions(&state, &round)
                .await?
                .into_iter()
                .filter(|c| c.grant_id == grant_id)
                .collect();

            let mut predictions = RoundPredictions::new();
            match round_predictions(&state, &round).await {
                Ok(p) => {
                    predictions.insert(round.address, p);
                }
                Err(e) => warn!("Predictions unavailable for round {}: {e}", round.address),
            }

            let details = aggregate(
                grant_id,
                std::slice::from_ref(&round),
                &predictions,
                &contributions,
                now,
            );
            Ok::<_, IndexerError>((index, details))
        });
    }

    let mut per_round = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, details) =
            joined.map_err(|e| IndexerError::Rpc(format!("round task failed: {e}")))??;
        per_round.push((index, details));
    }
    per_round.sort_by_key(|(index, _)| *index);

    Ok(per_round.into_iter().flat_map(|(_, d)| d).collect())
}
