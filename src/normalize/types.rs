use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wrapped SOL mint, the quote asset for SOL-denominated amounts.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// True for mint strings that stand for native or wrapped SOL.
pub fn is_native_sol(mint: &str) -> bool {
    mint == WSOL_MINT || mint.eq_ignore_ascii_case("SOL") || mint.eq_ignore_ascii_case("WSOL")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapDirection {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

/// Where in the upstream record the swap was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    DirectField,
    EventParsed,
    DescriptionParsed,
    TokenTransferFallback,
}

/// Canonical swap record. `amount_sol` is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapEvent {
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub direction: SwapDirection,
    pub wallet: String,
    pub amount_sol: f64,
    pub source: EventSource,
}

impl SwapEvent {
    pub fn is_buy(&self) -> bool {
        matches!(self.direction, SwapDirection::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self.direction, SwapDirection::Sell)
    }
}

/// Reasons a raw record is rejected. Never fatal to a fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type, expected {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("field `{field}` is not a valid SOL amount: {value}")]
    InvalidAmount {
        field: String,
        value: String,
    },

    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}
