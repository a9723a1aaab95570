//! Checkout cart derivation.
//!
//! The cart is rebuilt from its raw inputs whenever they change:
//! [`derive_cart`] joins raw items with grant and token metadata, and
//! [`build_donations`] turns the result into per-grant donations whose ratios
//! sum to [`RATIO_SCALE`](crate::ratio::RATIO_SCALE) for every token.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::convert::QuoteTable;
use crate::errors::{EngineError, Result};
use crate::ratio::{allocate_ratios, verify_ratio_sums, RatioInput};
use crate::types::{Address, GrantId, TokenAddress, TokenInfo};
use crate::units::{format_units, parse_units};

/// What the user put in the cart, before any lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCartItem {
    pub grant_id: GrantId,
    pub token: TokenAddress,
    /// Human-readable amount, e.g. `"12.5"`.
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantMetadata {
    pub grant_id: GrantId,
    pub name: String,
    pub payee: Address,
    /// Rounds a donation to this grant is credited to.
    pub rounds: Vec<Address>,
}

pub type GrantCatalog = HashMap<GrantId, GrantMetadata>;
pub type TokenCatalog = HashMap<TokenAddress, TokenInfo>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub grant_id: GrantId,
    pub grant_name: String,
    pub payee: Address,
    pub token: TokenInfo,
    pub amount: String,
    pub rounds: Vec<Address>,
}

/// One grant's share of the checkout transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    pub grant_id: GrantId,
    pub payee: Address,
    pub token: TokenAddress,
    /// Amount in the token's base units.
    pub amount: u128,
    /// Share of the token's swap output, scaled by 1e18.
    pub ratio: u128,
    pub rounds: Vec<Address>,
}

/// Join raw cart items with their grant and token metadata.
///
/// Items for grants missing from the catalog are dropped. A later item for the
/// same grant replaces an earlier one but keeps its position. An unknown token
/// is an error.
pub fn derive_cart(
    raw_items: &[RawCartItem],
    grants: &GrantCatalog,
    tokens: &TokenCatalog,
) -> Result<Vec<CartItem>> {
    let mut cart: Vec<CartItem> = Vec::with_capacity(raw_items.len());
    let mut positions: HashMap<GrantId, usize> = HashMap::new();

    for raw in raw_items {
        let Some(grant) = grants.get(&raw.grant_id) else {
            continue;
        };
        let token = tokens
            .get(&raw.token)
            .ok_or_else(|| EngineError::InvalidAddress(format!("unknown token {}", raw.token)))?;

        let item = CartItem {
            grant_id: grant.grant_id,
            grant_name: grant.name.clone(),
            payee: grant.payee,
            token: token.clone(),
            amount: raw.amount.trim().to_string(),
            rounds: grant.rounds.clone(),
        };

        match positions.get(&raw.grant_id).copied() {
            Some(i) => cart[i] = item,
            None => {
                positions.insert(raw.grant_id, cart.len());
                cart.push(item);
            }
        }
    }

    Ok(cart)
}

/// Parse cart amounts and allocate per-token ratios.
pub fn build_donations(cart: &[CartItem]) -> Result<Vec<Donation>> {
    let amounts = cart
        .iter()
        .map(|item| {
            let amount = parse_units(&item.amount, item.token.decimals)?;
            if amount == 0 {
                return Err(EngineError::InvalidAmount(format!(
                    "donation to grant {} must be positive",
                    item.grant_id
                )));
            }
            Ok(amount)
        })
        .collect::<Result<Vec<u128>>>()?;

    let inputs: Vec<RatioInput<TokenAddress>> = cart
        .iter()
        .zip(&amounts)
        .map(|(item, amount)| RatioInput {
            group_key: item.token.address,
            amount: *amount,
        })
        .collect();
    let ratios = allocate_ratios(&inputs)?;
    verify_ratio_sums(&ratios)?;

    Ok(cart
        .iter()
        .zip(amounts)
        .zip(ratios)
        .map(|((item, amount), ratio)| Donation {
            grant_id: item.grant_id,
            payee: item.payee,
            token: item.token.address,
            amount,
            ratio: ratio.ratio,
            rounds: item.rounds.clone(),
        })
        .collect())
}

/// Total value of the cart expressed in `display_token`.
pub fn cart_total(cart: &[CartItem], quotes: &QuoteTable, display_token: &TokenAddress) -> Result<f64> {
    cart.iter().try_fold(0.0, |acc, item| -> Result<f64> {
        let raw = parse_units(&item.amount, item.token.decimals)?;
        let amount = format_units(raw, item.token.decimals)?;
        Ok(acc + quotes.convert_between(amount, &item.token.address, display_token)?)
    })
}
