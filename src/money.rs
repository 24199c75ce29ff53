//! Fixed-point money helpers.
//!
//! Prices are `Decimal` with two fractional digits. The gateway speaks integer
//! minor units (cents). Conversion rounds half up, once per unit price.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

/// Currency every checkout session is created in
pub const CHECKOUT_CURRENCY: &str = "EUR";

const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Rounds to cents and pins the scale to 2 so `10` and `10.0000` both read `10.00`.
pub fn normalize(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// `round(amount * 100)` with ties away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let scaled = amount
        .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is too large", amount)))?;

    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is too large", amount)))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Minor-unit total for one line: the rounded unit amount times the quantity.
pub fn line_total_minor(unit_amount_minor: i64, quantity: i32) -> Result<i64, ServiceError> {
    unit_amount_minor
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| ServiceError::ValidationError("line total overflows".to_string()))
}
