// core/qf_engine/src/lib.rs

//! # QF Engine
//!
//! Pure computation behind the grants checkout and round dashboards:
//!
//! | Concern               | Entry Point(s)                                   |
//! |-----------------------|--------------------------------------------------|
//! | Checkout ratios       | [`ratio::allocate_ratios`], [`cart::build_donations`] |
//! | Token conversion      | [`convert::QuoteTable::convert`]                 |
//! | Matching prediction   | [`clr::predict`], [`clr::predict_round`]         |
//! | Round summaries       | [`aggregate::aggregate`]                         |
//! | Cart derivation       | [`cart::derive_cart`]                            |
//! | Amount parsing        | [`units::parse_units`]                           |
//!
//! ## Architecture
//!
//! Nothing here performs I/O, reads the clock, or holds global state.
//! Contributions, rounds, trust scores and quotes are passed in by the caller
//! and every operation returns fresh data. The `indexer` backend supplies
//! those inputs from the chain, a quote API and its block-height cache.

pub mod aggregate;
pub mod cart;
pub mod clr;
pub mod convert;
pub mod errors;
pub mod ratio;
pub mod types;
pub mod units;

#[cfg(test)]
mod test_scenarios;

pub use aggregate::{aggregate, GrantRoundDetails, PredictionDelta, RoundPredictions};
pub use clr::{predict, predict_round, PredictionConfig};
pub use convert::{Direction, QuoteTable};
pub use errors::{EngineError, Result};
pub use ratio::{allocate_ratios, RatioInput, RatioOutput, RATIO_SCALE};
pub use types::{
    Address, Contribution, GrantId, GrantPrediction, GrantRound, PredictionSample, RoundStatus,
    TokenAddress, TokenInfo, TrustBonusScore, TrustScores, PREDICTION_POINTS,
};
