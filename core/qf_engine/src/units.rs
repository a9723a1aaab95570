//! Conversion between human-readable decimal strings and token base units.

use crate::errors::{EngineError, Result};

/// Largest decimals value whose scale fits in `u128`.
pub const MAX_DECIMALS: u8 = 38;

fn pow10(decimals: u8) -> Result<u128> {
    if decimals > MAX_DECIMALS {
        return Err(EngineError::InvalidAmount(format!(
            "unsupported token decimals: {decimals}"
        )));
    }
    Ok(10u128.pow(u32::from(decimals)))
}

/// Parse `"1.5"` with 18 decimals into `1_500_000_000_000_000_000`.
///
/// Exact: no floating point is involved. More fractional digits than the token
/// supports is an error rather than a silent truncation.
pub fn parse_units(amount: &str, decimals: u8) -> Result<u128> {
    let invalid = || EngineError::InvalidAmount(amount.to_string());
    let s = amount.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > usize::from(decimals) {
        return Err(EngineError::InvalidAmount(format!(
            "{amount} has more than {decimals} fractional digits"
        )));
    }

    let overflow = || EngineError::Overflow(format!("{amount} at {decimals} decimals"));
    let scale = pow10(decimals)?;
    let whole_value: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_value: u128 = if frac.is_empty() {
        0
    } else {
        // frac.len() <= decimals <= 38, so the padded value fits.
        let padding = pow10(decimals - frac.len() as u8)?;
        frac.parse::<u128>().map_err(|_| invalid())? * padding
    };

    whole_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(overflow)
}

/// Base units to a decimal amount. Lossy past `f64` precision.
pub fn format_units(raw: u128, decimals: u8) -> Result<f64> {
    let scale = pow10(decimals)?;
    let whole = (raw / scale) as f64;
    let frac = (raw % scale) as f64 / scale as f64;
    Ok(whole + frac)
}
