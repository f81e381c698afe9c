use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Format used for the ledger's timestamp column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Open stake in one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub asset_id: String,
    pub entry_price: f64,  // Base-asset units per token at acquisition
    pub token_amount: f64,
    pub near_target_notified: bool,
}

impl Position {
    pub fn new(asset_id: impl Into<String>, entry_price: f64, token_amount: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            entry_price,
            token_amount,
            near_target_notified: false,
        }
    }
}

/// Ledger event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade type '{}'", other)),
        }
    }
}

/// Asset ids end up as a bare CSV column
pub fn is_valid_asset_id(asset_id: &str) -> bool {
    !asset_id.is_empty()
        && !asset_id
            .chars()
            .any(|c| matches!(c, ',' | '"' | '\n' | '\r'))
}

/// One immutable row of the trade ledger
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub timestamp: NaiveDateTime, // Wall-clock in the ledger's configured zone
    pub asset_id: String,
    pub side: TradeSide,
    pub base_amount: f64,
    pub token_amount: f64,
    pub unit_price: f64,
    pub balance_after: f64,
}

impl LedgerEntry {
    /// Render the row's columns in header order
    pub fn to_record(&self) -> [String; 7] {
        let price = match self.side {
            TradeSide::Buy => format!("{:.9}", self.unit_price),
            TradeSide::Sell => self.unit_price.to_string(),
        };

        [
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.asset_id.clone(),
            self.side.to_string(),
            self.base_amount.to_string(),
            self.token_amount.to_string(),
            price,
            format!("{:.4}", self.balance_after),
        ]
    }

    /// Parse a positional row; `None` if any column is missing or malformed
    ///
    /// Token amount and price must be strictly positive. A BUY whose price
    /// rounded to `0.000000000` in the file cannot be resumed.
    pub fn from_record(record: &csv::StringRecord) -> Option<Self> {
        if record.len() != 7 {
            return None;
        }

        let number = |i: usize| -> Option<f64> {
            record.get(i)?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
        };
        let positive = |i: usize| number(i).filter(|v| *v > 0.0);

        let timestamp =
            NaiveDateTime::parse_from_str(record.get(0)?.trim(), TIMESTAMP_FORMAT).ok()?;
        let asset_id = record.get(1)?.trim();
        if !is_valid_asset_id(asset_id) {
            return None;
        }

        Some(Self {
            timestamp,
            asset_id: asset_id.to_string(),
            side: record.get(2)?.parse().ok()?,
            base_amount: number(3)?,
            token_amount: positive(4)?,
            unit_price: positive(5)?,
            balance_after: number(6)?,
        })
    }
}

/// Result of a committed BUY
#[derive(Debug, Clone, PartialEq)]
pub struct BuyFill {
    pub asset_id: String,
    pub entry_price: f64,
    pub token_amount: f64,
    pub cost: f64,          // Buy size plus fixed fee
    pub balance_after: f64,
}

/// Result of a committed SELL
#[derive(Debug, Clone, PartialEq)]
pub struct SellFill {
    pub asset_id: String,
    pub exit_price: f64,
    pub token_amount: f64,
    pub gross: f64,
    pub proceeds: f64,      // After proportional fee, as written to the ledger
    pub balance_after: f64,
}
