//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qf_engine::cart::{build_donations, cart_total, derive_cart, Donation, RawCartItem};
use qf_engine::{
    Address, EngineError, GrantId, GrantPrediction, GrantRound, GrantRoundDetails, RoundStatus,
    TokenAddress, TokenInfo,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, warn};

use crate::cache::{CacheStore, KeyedLocks};
use crate::config::Config;
use crate::errors::IndexerError;
use crate::quotes::{fetch_quotes, QuoteProvider};
use crate::rounds::RoundRegistry;
use crate::service;

pub struct ApiState {
    pub pool: SqlitePool,
    pub client: Client,
    pub config: Config,
    pub registry: RoundRegistry,
    pub cache: Arc<dyn CacheStore>,
    pub locks: Arc<KeyedLocks>,
    pub quotes: Arc<dyn QuoteProvider>,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct RoundView {
    pub address: Address,
    pub name: String,
    pub status: RoundStatus,
    pub start_time: i64,
    pub end_time: i64,
    pub donation_token: TokenInfo,
    pub matching_token: TokenInfo,
    pub matching_funds: f64,
    pub grants: Vec<GrantId>,
}

impl RoundView {
    fn new(round: &GrantRound, now: i64) -> Self {
        Self {
            address: round.address,
            name: round.name.clone(),
            status: round.status(now),
            start_time: round.start_time,
            end_time: round.end_time,
            donation_token: round.donation_token.clone(),
            matching_token: round.matching_token.clone(),
            matching_funds: round.matching_funds,
            grants: round.grants.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct RoundsResponse {
    pub count: usize,
    pub rounds: Vec<RoundView>,
}

#[derive(Serialize)]
pub struct PredictionsResponse {
    pub round_address: Address,
    pub count: usize,
    pub predictions: Vec<GrantPrediction>,
}

#[derive(Serialize)]
pub struct GrantRoundsResponse {
    pub grant_id: GrantId,
    pub count: usize,
    pub rounds: Vec<GrantRoundDetails>,
}

#[derive(Deserialize)]
pub struct QuotesQuery {
    /// Comma-separated token addresses.
    pub tokens: String,
}

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<RawCartItem>,
    /// When set, the response carries the cart total in this token.
    #[serde(default)]
    pub display_token: Option<TokenAddress>,
}

/// Base-unit amounts and ratios exceed JSON's safe integer range, so they go
/// out as decimal strings.
#[derive(Debug, Serialize)]
pub struct DonationView {
    pub grant_id: GrantId,
    pub payee: Address,
    pub token: TokenAddress,
    pub amount: String,
    pub ratio: String,
    pub rounds: Vec<Address>,
}

impl From<Donation> for DonationView {
    fn from(d: Donation) -> Self {
        Self {
            grant_id: d.grant_id,
            payee: d.payee,
            token: d.token,
            amount: d.amount.to_string(),
            ratio: d.ratio.to_string(),
            rounds: d.rounds,
        }
    }
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub count: usize,
    pub donations: Vec<DonationView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

// ─────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────

pub fn status_for(err: &IndexerError) -> StatusCode {
    match err {
        IndexerError::Engine(EngineError::InvariantViolation(_) | EngineError::Overflow(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        IndexerError::Engine(_) => StatusCode::BAD_REQUEST,
        IndexerError::NotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_retryable() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: IndexerError) -> Response {
    let status = status_for(&err);
    let message = match &err {
        IndexerError::Engine(EngineError::InvariantViolation(_) | EngineError::Overflow(_)) => {
            warn!("Donation preparation aborted: {err}");
            "could not prepare donation".to_string()
        }
        _ => {
            if status.is_server_error() {
                error!("Request failed: {err}");
            }
            err.to_string()
        }
    };
    (status, Json(serde_json::json!(ErrorResponse { error: message }))).into_response()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /rounds`
///
/// Lists every configured round with its status at request time.
pub async fn list_rounds(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let now = now();
    let rounds: Vec<RoundView> = state
        .registry
        .rounds()
        .iter()
        .map(|r| RoundView::new(r, now))
        .collect();
    (
        StatusCode::OK,
        Json(serde_json::json!(RoundsResponse {
            count: rounds.len(),
            rounds,
        })),
    )
        .into_response()
}

/// `GET /rounds/:address/predictions`
///
/// Matching predictions for every grant in the round.
pub async fn get_round_predictions(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let round_address: Address = match address.parse() {
        Ok(a) => a,
        Err(e) => return error_response(IndexerError::Engine(e)),
    };
    let Some(round) = state.registry.round(&round_address) else {
        return error_response(IndexerError::NotFound(format!("round {round_address}")));
    };

    match service::round_predictions(&state, round).await {
        Ok(predictions) => (
            StatusCode::OK,
            Json(serde_json::json!(PredictionsResponse {
                round_address,
                count: predictions.len(),
                predictions,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /grants/:id/rounds`
///
/// Per-round contribution totals and matching for one grant.
pub async fn get_grant_rounds(
    State(state): State<Arc<ApiState>>,
    Path(grant_id): Path<u64>,
) -> impl IntoResponse {
    let grant_id = GrantId(grant_id);
    match service::grant_round_details(state.clone(), grant_id).await {
        Ok(rounds) => (
            StatusCode::OK,
            Json(serde_json::json!(GrantRoundsResponse {
                grant_id,
                count: rounds.len(),
                rounds,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /quotes?tokens=0x…,0x…`
pub async fn get_quotes(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<QuotesQuery>,
) -> impl IntoResponse {
    let tokens = match parse_token_list(&query.tokens) {
        Ok(t) => t,
        Err(e) => return error_response(e),
    };
    match fetch_quotes(state.quotes.clone(), &tokens).await {
        Ok(quotes) => (StatusCode::OK, Json(serde_json::json!(quotes))).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /checkout`
///
/// Derives the cart against the rounds active now and returns one donation per
/// grant, with ratios summing to 1e18 per token.
pub async fn checkout(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CheckoutRequest>,
) -> impl IntoResponse {
    match prepare_checkout(&state, request).await {
        Ok(response) => (StatusCode::OK, Json(serde_json::json!(response))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn prepare_checkout(
    state: &ApiState,
    request: CheckoutRequest,
) -> crate::errors::Result<CheckoutResponse> {
    let tokens = state.registry.token_catalog();
    let cart = derive_cart(&request.items, &state.registry.grant_catalog(now()), &tokens)?;
    let donations = build_donations(&cart)?;

    let total = match request.display_token {
        Some(display) => {
            let mut wanted: Vec<TokenAddress> = cart.iter().map(|i| i.token.address).collect();
            wanted.push(display);
            let quotes = fetch_quotes(state.quotes.clone(), &wanted).await?;
            Some(cart_total(&cart, &quotes, &display)?)
        }
        None => None,
    };

    Ok(CheckoutResponse {
        count: donations.len(),
        donations: donations.into_iter().map(DonationView::from).collect(),
        total,
    })
}

fn parse_token_list(raw: &str) -> crate::errors::Result<Vec<TokenAddress>> {
    let tokens = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<TokenAddress>())
        .collect::<Result<Vec<_>, _>>()?;
    if tokens.is_empty() {
        return Err(IndexerError::Engine(EngineError::InvalidAddress(
            "no tokens requested".to_string(),
        )));
    }
    Ok(tokens)
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::db;
    use crate::quotes::fixed::FixedQuotes;

    pub const DAI: &str = "0x0000000000000000000000000000000000000da1";
    pub const USDC: &str = "0x0000000000000000000000000000000000000c01";
    pub const WETH: &str = "0x0000000000000000000000000000000000000e77";
    pub const ROUND: &str = "0x00000000000000000000000000000000000000a1";

    /// One round open until 2100 with grants 1 and 2; grant 3 is listed but
    /// in no round.
    pub const REGISTRY: &str = r#"{
        "tokens": [
            { "address": "0x0000000000000000000000000000000000000c01", "symbol": "USDC", "decimals": 6 },
            { "address": "0x0000000000000000000000000000000000000e77", "symbol": "WETH", "decimals": 18 }
        ],
        "grants": [
            { "grant_id": 1, "name": "Clients", "payee": "0x0000000000000000000000000000000000000001" },
            { "grant_id": 2, "name": "Tooling", "payee": "0x0000000000000000000000000000000000000002" },
            { "grant_id": 3, "name": "Docs", "payee": "0x0000000000000000000000000000000000000003" }
        ],
        "rounds": [
            {
                "address": "0x00000000000000000000000000000000000000a1",
                "name": "Infra",
                "start_time": 0,
                "end_time": 4102444800,
                "donation_token": { "address": "0x0000000000000000000000000000000000000da1", "symbol": "DAI", "decimals": 18 },
                "matching_token": { "address": "0x0000000000000000000000000000000000000da1", "symbol": "DAI", "decimals": 18 },
                "matching_funds": 1000.0,
                "grants": [1, 2]
            }
        ]
    }"#;

    pub fn token(raw: &str) -> TokenAddress {
        raw.parse().unwrap()
    }

    /// API state over an in-memory database, an in-memory cache and fixed
    /// quotes for DAI (1.0) and USDC (2.0). WETH has no quote.
    pub async fn state() -> Arc<ApiState> {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        let quotes = FixedQuotes::new([(token(DAI), 1.0), (token(USDC), 2.0)]);
        Arc::new(ApiState {
            pool,
            client: Client::new(),
            config: Config::for_tests("http://127.0.0.1:1"),
            registry: RoundRegistry::from_json(REGISTRY).unwrap(),
            cache: Arc::new(MemoryCache::default()),
            locks: Arc::new(KeyedLocks::new()),
            quotes: Arc::new(quotes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{state, token, DAI, USDC, WETH};
    use super::*;
    use crate::errors::Result;
    use std::collections::HashMap;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn item(grant: u64, token_raw: &str, amount: &str) -> RawCartItem {
        RawCartItem {
            grant_id: GrantId(grant),
            token: token(token_raw),
            amount: amount.to_string(),
        }
    }

    fn ratio_sums(donations: &[DonationView]) -> HashMap<TokenAddress, u128> {
        let mut sums = HashMap::new();
        for d in donations {
            *sums.entry(d.token).or_insert(0) += d.ratio.parse::<u128>().unwrap();
        }
        sums
    }

    #[tokio::test]
    async fn broken_invariants_hide_details_behind_generic_message() {
        for err in [
            EngineError::InvariantViolation("ratio sum 1000000000000000001".into()),
            EngineError::Overflow("amount".into()),
        ] {
            let resp = error_response(IndexerError::Engine(err));
            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(body_json(resp).await["error"], "could not prepare donation");
        }
    }

    #[tokio::test]
    async fn missing_quote_body_names_the_token() {
        let resp = error_response(IndexerError::Engine(EngineError::MissingQuote(token(WETH))));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains(WETH));
    }

    #[tokio::test]
    async fn checkout_ratios_sum_to_scale_per_token() {
        let state = state().await;
        let request = CheckoutRequest {
            items: vec![item(1, DAI, "1"), item(2, DAI, "2"), item(3, USDC, "5")],
            display_token: Some(token(DAI)),
        };

        let response = prepare_checkout(&state, request).await.unwrap();

        assert_eq!(response.count, 3);
        let sums = ratio_sums(&response.donations);
        assert_eq!(sums[&token(DAI)], 1_000_000_000_000_000_000);
        assert_eq!(sums[&token(USDC)], 1_000_000_000_000_000_000);
        assert_eq!(response.donations[0].ratio, "333333333333333334");
        assert_eq!(response.donations[1].ratio, "666666666666666666");
        assert_eq!(response.donations[2].amount, "5000000");
        // 1 + 2 DAI, plus 5 USDC at 2.0 per DAI.
        assert_eq!(response.total, Some(13.0));
    }

    #[tokio::test]
    async fn checkout_credits_active_rounds_only() {
        let state = state().await;
        let request = CheckoutRequest {
            items: vec![item(1, DAI, "1"), item(3, DAI, "1")],
            display_token: None,
        };
        let response = prepare_checkout(&state, request).await.unwrap();
        assert_eq!(response.donations[0].rounds, vec![token(super::testing::ROUND)]);
        assert!(response.donations[1].rounds.is_empty());
        assert_eq!(response.total, None);
    }

    #[tokio::test]
    async fn checkout_without_display_quote_is_bad_request() {
        let state = state().await;
        let request = CheckoutRequest {
            items: vec![item(1, DAI, "1")],
            display_token: Some(token(WETH)),
        };
        let result: Result<CheckoutResponse> = prepare_checkout(&state, request).await;
        let err = match result {
            Err(e) => e,
            Ok(_) => panic!("expected a missing quote"),
        };
        assert!(matches!(
            err,
            IndexerError::Engine(EngineError::MissingQuote(t)) if t == token(WETH)
        ));
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn checkout_handler_rejects_zero_amounts() {
        let state = state().await;
        let request = CheckoutRequest {
            items: vec![item(1, DAI, "0")],
            display_token: None,
        };
        let resp = checkout(State(state), Json(request)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn engine_failures_map_to_client_statuses() {
        let invariant = IndexerError::Engine(EngineError::InvariantViolation("sum".into()));
        let overflow = IndexerError::Engine(EngineError::Overflow("amount".into()));
        let quote = IndexerError::Engine(EngineError::MissingQuote(Address::ZERO));
        assert_eq!(status_for(&invariant), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(&overflow), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(&quote), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_failures_are_bad_gateway() {
        assert_eq!(
            status_for(&IndexerError::Quote("429".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&IndexerError::NotFound("round".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&IndexerError::Config("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn token_list_is_trimmed_and_validated() {
        let a = Address::from_bytes([1; 20]);
        let b = Address::from_bytes([2; 20]);
        let parsed = parse_token_list(&format!(" {a}, {b} ,")).unwrap();
        assert_eq!(parsed, vec![a, b]);
        assert!(parse_token_list("0x12").is_err());
        assert!(parse_token_list(" , ").is_err());
    }

    #[test]
    fn donation_amounts_serialize_as_strings() {
        let view = DonationView::from(Donation {
            grant_id: GrantId(1),
            payee: Address::ZERO,
            token: Address::ZERO,
            amount: u128::MAX,
            ratio: 1_000_000_000_000_000_000,
            rounds: vec![],
        });
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["amount"], u128::MAX.to_string());
        assert_eq!(json["ratio"], "1000000000000000000");
    }
}
