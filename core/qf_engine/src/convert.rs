//! Token value conversion through a quote table.
//!
//! Quotes express `1 token = rate reference units`. The table is supplied by
//! the caller on every use and refreshed elsewhere.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::types::TokenAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Token units → reference units (multiply by the rate).
    ToReference,
    /// Reference units → token units (divide by the rate).
    FromReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteTable {
    rates: HashMap<TokenAddress, f64>,
}

impl QuoteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: TokenAddress, rate: f64) {
        self.rates.insert(token, rate);
    }

    /// Rate for `token`, or 0 when the token is unknown.
    pub fn rate(&self, token: &TokenAddress) -> f64 {
        self.rates.get(token).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, token: &TokenAddress) -> bool {
        self.rate(token) > 0.0
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Convert `amount` of `token` in the given direction.
    ///
    /// An unknown token, or one quoted at zero, is a [`EngineError::MissingQuote`]
    /// in either direction.
    pub fn convert(&self, amount: f64, token: &TokenAddress, direction: Direction) -> Result<f64> {
        let rate = self.rate(token);
        if rate <= 0.0 || !rate.is_finite() {
            return Err(EngineError::MissingQuote(*token));
        }
        Ok(match direction {
            Direction::ToReference => amount * rate,
            Direction::FromReference => amount / rate,
        })
    }

    /// Convert an amount of `from` into `to` via the reference unit.
    pub fn convert_between(&self, amount: f64, from: &TokenAddress, to: &TokenAddress) -> Result<f64> {
        if from == to {
            return Ok(amount);
        }
        let reference = self.convert(amount, from, Direction::ToReference)?;
        self.convert(reference, to, Direction::FromReference)
    }
}

impl FromIterator<(TokenAddress, f64)> for QuoteTable {
    fn from_iter<I: IntoIterator<Item = (TokenAddress, f64)>>(iter: I) -> Self {
        Self {
            rates: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;
    use proptest::prelude::*;

    fn token(b: u8) -> TokenAddress {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn converts_both_directions() {
        let quotes: QuoteTable = [(token(1), 2.5)].into_iter().collect();
        assert_eq!(quotes.convert(4.0, &token(1), Direction::ToReference).unwrap(), 10.0);
        assert_eq!(quotes.convert(10.0, &token(1), Direction::FromReference).unwrap(), 4.0);
    }

    #[test]
    fn missing_token_has_zero_rate_and_errors() {
        let quotes = QuoteTable::new();
        assert_eq!(quotes.rate(&token(9)), 0.0);
        assert_eq!(
            quotes.convert(1.0, &token(9), Direction::FromReference),
            Err(EngineError::MissingQuote(token(9)))
        );
        assert_eq!(
            quotes.convert(1.0, &token(9), Direction::ToReference),
            Err(EngineError::MissingQuote(token(9)))
        );
    }

    #[test]
    fn zero_rate_is_treated_as_missing() {
        let quotes: QuoteTable = [(token(3), 0.0)].into_iter().collect();
        assert!(!quotes.contains(&token(3)));
        assert!(quotes.convert(1.0, &token(3), Direction::FromReference).is_err());
    }

    #[test]
    fn convert_between_tokens() {
        let quotes: QuoteTable = [(token(1), 2000.0), (token(2), 1.0)].into_iter().collect();
        let dai = quotes.convert_between(0.5, &token(1), &token(2)).unwrap();
        assert_eq!(dai, 1000.0);
        assert_eq!(quotes.convert_between(3.0, &token(7), &token(7)).unwrap(), 3.0);
    }

    proptest! {
        #[test]
        fn to_and_from_reference_round_trips(x in 0.0f64..1e12, rate in 1e-6f64..1e6) {
            let quotes: QuoteTable = [(token(1), rate)].into_iter().collect();
            let there = quotes.convert(x, &token(1), Direction::ToReference).unwrap();
            let back = quotes.convert(there, &token(1), Direction::FromReference).unwrap();
            prop_assert!((back - x).abs() <= 1e-9 * x.max(1.0));
        }
    }
}
