//! Parsing and validation of raw UI input.
//!
//! The UI hands this core plain strings from entry widgets. Everything is
//! parsed and range-checked here before a domain operation sees it; the
//! domain modules themselves only accept typed values.

use chrono::NaiveDate;

use crate::error::{PosError, PosResult};

/// Parse a money amount. Must be a finite, non-negative number.
pub fn parse_amount(raw: &str) -> PosResult<f64> {
    let trimmed = raw.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| PosError::invalid_arg(format!("not a valid amount: {trimmed:?}")))?;
    if !value.is_finite() {
        return Err(PosError::invalid_arg(format!(
            "not a valid amount: {trimmed:?}"
        )));
    }
    if value < 0.0 {
        return Err(PosError::invalid_arg(format!(
            "amount must not be negative: {value}"
        )));
    }
    Ok(value)
}

/// Parse a percentage rate in [0, 100].
pub fn parse_rate(raw: &str) -> PosResult<f64> {
    let trimmed = raw.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| PosError::invalid_arg(format!("not a valid rate: {trimmed:?}")))?;
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(PosError::invalid_arg(format!(
            "rate must be between 0 and 100: {trimmed:?}"
        )));
    }
    Ok(value)
}

/// Parse a positive whole quantity.
pub fn parse_quantity(raw: &str) -> PosResult<i64> {
    let trimmed = raw.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| PosError::invalid_arg(format!("not a valid quantity: {trimmed:?}")))?;
    if value <= 0 {
        return Err(PosError::invalid_arg(format!(
            "quantity must be positive: {value}"
        )));
    }
    Ok(value)
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> PosResult<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| PosError::invalid_arg(format!("not a valid date (YYYY-MM-DD): {trimmed:?}")))
}

/// Normalize a phone number to its digits. Rejects input with fewer than
/// four digits — too short to identify a customer.
pub fn normalize_phone(raw: &str) -> PosResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return Err(PosError::invalid_arg(format!(
            "not a valid phone number: {raw:?}"
        )));
    }
    Ok(digits)
}

// ===========================================================================
// Tests
// ===========================================================================
