//! Trust bonus scores for donors.
//!
//! The trust API takes `{"addresses": [...]}` and answers with
//! `[{"address": "0x…", "score": 0.5}, …]`. Addresses it does not return fall
//! back to the configured default score inside the predictor.

use qf_engine::{Address, TrustBonusScore, TrustScores};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{IndexerError, Result};

#[derive(Debug, Serialize)]
struct TrustRequest<'a> {
    addresses: &'a [Address],
}

#[derive(Debug, Deserialize)]
struct RawScore {
    address: String,
    score: Value,
}

/// Fetch scores for `payers`. Without a configured URL every payer is left to
/// the default.
pub async fn fetch_trust_scores(
    client: &Client,
    trust_api_url: Option<&str>,
    payers: &[Address],
) -> Result<TrustScores> {
    let Some(url) = trust_api_url else {
        return Ok(TrustScores::new());
    };
    if payers.is_empty() {
        return Ok(TrustScores::new());
    }

    let resp = client
        .post(url)
        .json(&TrustRequest { addresses: payers })
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(IndexerError::Rpc(format!(
            "trust API returned {}",
            resp.status()
        )));
    }
    let raw: Vec<RawScore> = resp.json().await?;
    let scores = decode_scores(raw);
    debug!("Fetched {} trust scores for {} payers", scores.len(), payers.len());
    Ok(scores)
}

/// Scores may arrive as numbers or numeric strings; unparseable rows are
/// skipped.
fn decode_scores(raw: Vec<RawScore>) -> TrustScores {
    TrustScores::from_records(raw.into_iter().filter_map(|r| {
        let address = match r.address.parse::<Address>() {
            Ok(a) => a,
            Err(e) => {
                warn!("Ignoring trust score row: {e}");
                return None;
            }
        };
        let score = match &r.score {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }?;
        Some(TrustBonusScore { address, score })
    }))
}
