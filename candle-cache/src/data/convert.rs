//! Numeric conversions between the API's fixed-point quotations, decimals and cache text

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const NANO_SCALE: u32 = 9;
const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Fixed-point price as the API sends it: `units + nano * 1e-9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quotation {
    pub units: i64,
    pub nano: i32,
}

impl Quotation {
    pub fn new(units: i64, nano: i32) -> Self {
        Self { units, nano }
    }

    pub fn to_decimal(self) -> Decimal {
        let raw = self.units as i128 * NANOS_PER_UNIT + self.nano as i128;
        Decimal::from_i128_with_scale(raw, NANO_SCALE).normalize()
    }

    /// Returns `None` when the value needs more than 9 fractional digits or overflows `i64` units.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let scaled = value.checked_mul(Decimal::from(NANOS_PER_UNIT as i64))?;
        if scaled.fract() != Decimal::ZERO {
            return None;
        }
        let raw = scaled.to_i128()?;
        let units = i64::try_from(raw / NANOS_PER_UNIT).ok()?;
        let nano = (raw % NANOS_PER_UNIT) as i32;
        Some(Self { units, nano })
    }
}

impl From<Quotation> for Decimal {
    fn from(value: Quotation) -> Self {
        value.to_decimal()
    }
}

/// Parse a price column, accepting plain and scientific notation.
pub fn parse_price(value: &str) -> Option<Decimal> {
    let value = value.trim();
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
        .map(|d| d.normalize())
}

/// Render a price for the cache file without trailing zeros.
pub fn format_price(value: Decimal) -> String {
    value.normalize().to_string()
}
