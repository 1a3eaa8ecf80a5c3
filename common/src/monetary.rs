//! Currency definitions and minor-unit helpers.
//!
//! Balances and amounts are signed integers in the currency's minor units.
//! Floating point never touches money.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

/// Signed amount in minor currency units (cents, kopecks, ...).
pub type MinorUnits = i64;

/// Supported account currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
    #[serde(rename = "RUB")]
    Rub,
}

impl Currency {
    /// All currencies accepted by the ledger.
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Rub];

    /// Parse an ISO 4217 code.
    pub fn parse(code: &str) -> Result<Self, LedgerError> {
        match code {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "RUB" => Ok(Currency::Rub),
            other => Err(LedgerError::UnsupportedCurrency(other.to_string())),
        }
    }

    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Rub => "RUB",
        }
    }

    /// Number of minor-unit decimal places.
    pub fn decimal_places(&self) -> u32 {
        2
    }

    /// Render a minor-unit amount as a human readable string, e.g. `-12.05 USD`.
    pub fn format_minor(&self, units: MinorUnits) -> String {
        let scale = 10_i64.pow(self.decimal_places());
        let sign = if units < 0 { "-" } else { "" };
        let magnitude = units.unsigned_abs();
        let scale = scale as u64;
        format!(
            "{}{}.{:0width$} {}",
            sign,
            magnitude / scale,
            magnitude % scale,
            self.code(),
            width = self.decimal_places() as usize
        )
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::parse(s)
    }
}

/// Check whether a currency code is supported.
pub fn is_supported_currency(code: &str) -> bool {
    Currency::parse(code).is_ok()
}
