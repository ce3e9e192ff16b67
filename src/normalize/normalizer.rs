use chrono::{DateTime, Utc};
use serde_json::Value;

use super::description::DescribedSwap;
use super::shape::{amount_field, record_transfers, string_field, RawRecord, SwapLeg, SwapShape, TokenTransfer};
use super::types::{is_native_sol, NormalizeError, SwapDirection, SwapEvent};

/// Anything above this is a millisecond timestamp.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const WALLET_FIELDS: [&str; 3] = ["owner", "wallet", "feePayer"];

struct Resolved {
    direction: SwapDirection,
    amount_sol: f64,
    wallet: Option<String>,
}

/// Turns raw upstream records into [`SwapEvent`]s for one target token.
///
/// Normalization is pure: the same record and target always give the same
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNormalizer {
    target_mint: String,
    target_symbol: Option<String>,
}

impl EventNormalizer {
    pub fn new(target_mint: impl Into<String>) -> Self {
        Self {
            target_mint: target_mint.into(),
            target_symbol: None,
        }
    }

    /// Lets description records that name the token by symbol match.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        self.target_symbol = (!symbol.trim().is_empty()).then(|| symbol.trim().to_string());
        self
    }

    pub fn target_mint(&self) -> &str {
        &self.target_mint
    }

    pub fn target_symbol(&self) -> Option<&str> {
        self.target_symbol.as_deref()
    }

    /// `Ok(None)` means the record is well formed but is not a SOL swap of
    /// the target token.
    pub fn normalize(&self, raw: &Value) -> Result<Option<SwapEvent>, NormalizeError> {
        let record = raw.as_object().ok_or(NormalizeError::NotAnObject)?;

        let signature = match string_field(record, "signature")? {
            Some(signature) => signature,
            None => string_field(record, "txHash")?.ok_or(NormalizeError::MissingField("signature"))?,
        };
        let timestamp = record_timestamp(record)?;

        let Some(shape) = SwapShape::resolve(record)? else {
            return Ok(None);
        };

        let resolved = match &shape {
            SwapShape::Description(described) => self.resolve_description(record, described)?,
            SwapShape::TokenTransfers(transfers) => self.resolve_transfers(record, transfers)?,
            _ => match shape.legs() {
                Some((input, output)) => self.resolve_legs(input, output)?,
                None => None,
            },
        };
        let Some(resolved) = resolved else {
            return Ok(None);
        };

        let wallet = match resolved.wallet {
            Some(wallet) => wallet,
            None => record_wallet(record)?.ok_or(NormalizeError::MissingField("wallet"))?,
        };

        Ok(Some(SwapEvent {
            signature,
            timestamp,
            direction: resolved.direction,
            wallet,
            amount_sol: resolved.amount_sol,
            source: shape.source(),
        }))
    }

    fn resolve_legs(&self, input: &SwapLeg, output: &SwapLeg) -> Result<Option<Resolved>, NormalizeError> {
        let wallet = input.owner.clone().or_else(|| output.owner.clone());

        if is_native_sol(&input.mint) && output.mint == self.target_mint {
            let amount_sol = input.amount.ok_or(NormalizeError::MissingField("amount"))?;
            return Ok(Some(Resolved {
                direction: SwapDirection::Buy,
                amount_sol,
                wallet,
            }));
        }

        if input.mint == self.target_mint && is_native_sol(&output.mint) {
            let amount_sol = output.amount.ok_or(NormalizeError::MissingField("amount"))?;
            return Ok(Some(Resolved {
                direction: SwapDirection::Sell,
                amount_sol,
                wallet,
            }));
        }

        Ok(None)
    }

    /// The non-SOL side must name the target, by symbol or mint, or the
    /// record must carry a transfer of the target mint.
    fn resolve_description(
        &self,
        record: &RawRecord,
        described: &DescribedSwap,
    ) -> Result<Option<Resolved>, NormalizeError> {
        let (direction, side, other) = if is_native_sol(&described.given.asset) {
            (SwapDirection::Buy, &described.given, &described.received)
        } else if is_native_sol(&described.received.asset) {
            (SwapDirection::Sell, &described.received, &described.given)
        } else {
            return Ok(None);
        };

        if !self.names_target(&other.asset) && !self.has_target_transfer(record)? {
            return Ok(None);
        }

        let amount_sol = side.amount.ok_or(NormalizeError::MissingField("amount"))?;
        Ok(Some(Resolved {
            direction,
            amount_sol,
            wallet: described.actor.clone(),
        }))
    }

    /// Direction comes from the record's own wallet: receiving the target
    /// mint is a buy, sending it is a sell.
    fn resolve_transfers(
        &self,
        record: &RawRecord,
        transfers: &[TokenTransfer],
    ) -> Result<Option<Resolved>, NormalizeError> {
        let Some(wallet) = record_wallet(record)? else {
            return Ok(None);
        };

        for transfer in transfers.iter().filter(|t| t.mint == self.target_mint) {
            let direction = if transfer.to.as_deref() == Some(wallet.as_str()) {
                SwapDirection::Buy
            } else if transfer.from.as_deref() == Some(wallet.as_str()) {
                SwapDirection::Sell
            } else {
                continue;
            };
            return Ok(Some(Resolved {
                direction,
                amount_sol: 0.0,
                wallet: Some(wallet),
            }));
        }
        Ok(None)
    }

    fn names_target(&self, asset: &str) -> bool {
        asset == self.target_mint
            || self
                .target_symbol
                .as_deref()
                .is_some_and(|symbol| asset.eq_ignore_ascii_case(symbol))
    }

    fn has_target_transfer(&self, record: &RawRecord) -> Result<bool, NormalizeError> {
        Ok(record_transfers(record)?.iter().any(|t| t.mint == self.target_mint))
    }
}

fn record_timestamp(record: &RawRecord) -> Result<DateTime<Utc>, NormalizeError> {
    for field in ["timestamp", "blockTime", "blockUnixTime"] {
        if let Some(Value::String(text)) = record.get(field) {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.with_timezone(&Utc));
            }
        }

        let Some(raw) = amount_field(record, field)? else {
            continue;
        };
        let mut seconds = raw as i64;
        if seconds > MILLIS_THRESHOLD {
            seconds /= 1000;
        }
        return DateTime::from_timestamp(seconds, 0).ok_or(NormalizeError::InvalidTimestamp(seconds));
    }
    Err(NormalizeError::MissingField("timestamp"))
}

fn record_wallet(record: &RawRecord) -> Result<Option<String>, NormalizeError> {
    for field in WALLET_FIELDS {
        if let Some(wallet) = string_field(record, field)? {
            return Ok(Some(wallet));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::types::{EventSource, WSOL_MINT};
    use serde_json::json;

    const TOKEN: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    fn normalizer() -> EventNormalizer {
        EventNormalizer::new(TOKEN)
    }

    #[test]
    fn test_token_in_out_buy() {
        let record = json!({
            "txHash": "sig-1",
            "blockUnixTime": 1_700_000_000,
            "owner": "wallet-a",
            "tokenIn": { "address": WSOL_MINT, "amount": 1.25 },
            "tokenOut": { "address": TOKEN, "amount": 50_000 }
        });

        let event = normalizer().normalize(&record).unwrap().unwrap();
        assert_eq!(event.signature, "sig-1");
        assert_eq!(event.direction, SwapDirection::Buy);
        assert_eq!(event.wallet, "wallet-a");
        assert_eq!(event.amount_sol, 1.25);
        assert_eq!(event.source, EventSource::DirectField);
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_token_in_out_sell_uses_output_amount() {
        let record = json!({
            "signature": "sig-2",
            "timestamp": 1_700_000_100,
            "tokenIn": { "mint": TOKEN, "amount": "90000", "from": "wallet-b" },
            "tokenOut": { "mint": WSOL_MINT, "amount": "2.5" }
        });

        let event = normalizer().normalize(&record).unwrap().unwrap();
        assert_eq!(event.direction, SwapDirection::Sell);
        assert_eq!(event.wallet, "wallet-b");
        assert_eq!(event.amount_sol, 2.5);
    }

    #[test]
    fn test_source_destination_and_from_to_shapes() {
        let source_dest = json!({
            "signature": "sig-3",
            "timestamp": 1_700_000_000,
            "feePayer": "wallet-c",
            "sourceMint": WSOL_MINT,
            "destinationMint": TOKEN,
            "sourceAmount": 0.75
        });
        let event = normalizer().normalize(&source_dest).unwrap().unwrap();
        assert_eq!(event.direction, SwapDirection::Buy);
        assert_eq!(event.wallet, "wallet-c");
        assert_eq!(event.amount_sol, 0.75);

        let from_to = json!({
            "signature": "sig-4",
            "timestamp": 1_700_000_000,
            "wallet": "wallet-d",
            "fromMint": "SOL",
            "toMint": TOKEN,
            "fromAmount": "3"
        });
        let event = normalizer().normalize(&from_to).unwrap().unwrap();
        assert_eq!(event.direction, SwapDirection::Buy);
        assert_eq!(event.amount_sol, 3.0);
        assert_eq!(event.source, EventSource::DirectField);
    }

    #[test]
    fn test_sell_without_sol_amount_is_malformed() {
        let record = json!({
            "signature": "sig-5",
            "timestamp": 1_700_000_000,
            "owner": "wallet-e",
            "sourceMint": TOKEN,
            "destinationMint": WSOL_MINT,
            "sourceAmount": 1000
        });
        assert_eq!(
            normalizer().normalize(&record).unwrap_err(),
            NormalizeError::MissingField("amount")
        );
    }

    #[test]
    fn test_enhanced_swap_event_in_lamports() {
        let record = json!({
            "signature": "sig-6",
            "timestamp": 1_700_000_000,
            "feePayer": "payer",
            "description": "ignored swapped 99 SOL for 1 BONK",
            "events": {
                "swap": {
                    "nativeInput": { "account": "wallet-f", "amount": "1500000000" },
                    "tokenOutputs": [{
                        "userAccount": "wallet-f",
                        "mint": TOKEN,
                        "rawTokenAmount": { "tokenAmount": "1000000", "decimals": 5 }
                    }]
                }
            }
        });

        let event = normalizer().normalize(&record).unwrap().unwrap();
        assert_eq!(event.source, EventSource::EventParsed);
        assert_eq!(event.direction, SwapDirection::Buy);
        assert_eq!(event.wallet, "wallet-f");
        assert!((event.amount_sol - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_description_fallback() {
        let normalizer = normalizer().with_symbol("BONK");
        let record = json!({
            "signature": "sig-7",
            "timestamp": 1_700_000_000,
            "description": "wallet-g swapped 4.2 SOL for 1,000 BONK"
        });
        let event = normalizer.normalize(&record).unwrap().unwrap();
        assert_eq!(event.source, EventSource::DescriptionParsed);
        assert_eq!(event.direction, SwapDirection::Buy);
        assert_eq!(event.wallet, "wallet-g");
        assert_eq!(event.amount_sol, 4.2);

        let sell = json!({
            "signature": "sig-8",
            "timestamp": 1_700_000_000,
            "description": "wallet-h swapped 1,000 bonk for 0.3 SOL"
        });
        let event = normalizer.normalize(&sell).unwrap().unwrap();
        assert_eq!(event.direction, SwapDirection::Sell);
        assert_eq!(event.amount_sol, 0.3);
    }

    #[test]
    fn test_description_of_another_token_yields_nothing() {
        let record = json!({
            "signature": "sig-7b",
            "timestamp": 1_700_000_000,
            "description": "walletX swapped 5 SOL for 100 USDC"
        });
        assert_eq!(normalizer().normalize(&record).unwrap(), None);
        assert_eq!(normalizer().with_symbol("BONK").normalize(&record).unwrap(), None);
    }

    #[test]
    fn test_description_matched_by_target_transfer() {
        let record = json!({
            "signature": "sig-7c",
            "timestamp": 1_700_000_000,
            "description": "wallet-q swapped 2 SOL for 50 BONK",
            "tokenTransfers": [
                { "mint": TOKEN, "fromUserAccount": "pool", "toUserAccount": "wallet-q" }
            ]
        });
        let event = normalizer().normalize(&record).unwrap().unwrap();
        assert_eq!(event.source, EventSource::DescriptionParsed);
        assert_eq!(event.wallet, "wallet-q");
        assert_eq!(event.amount_sol, 2.0);
    }

    #[test]
    fn test_structured_fields_win_over_description() {
        let record = json!({
            "signature": "sig-9",
            "timestamp": 1_700_000_000,
            "owner": "wallet-i",
            "description": "wallet-i swapped 10 SOL for 5 BONK",
            "fromMint": WSOL_MINT,
            "toMint": TOKEN,
            "fromAmount": 2.0
        });
        let event = normalizer().normalize(&record).unwrap().unwrap();
        assert_eq!(event.source, EventSource::DirectField);
        assert_eq!(event.amount_sol, 2.0);
    }

    #[test]
    fn test_token_transfer_fallback_has_zero_amount() {
        let record = json!({
            "signature": "sig-10",
            "timestamp": 1_700_000_000,
            "feePayer": "wallet-j",
            "description": "wallet-j transferred tokens",
            "tokenTransfers": [
                { "mint": "OtherMint111", "fromUserAccount": "x", "toUserAccount": "y" },
                { "mint": TOKEN, "fromUserAccount": "pool", "toUserAccount": "wallet-j", "tokenAmount": 12.0 }
            ]
        });
        let event = normalizer().normalize(&record).unwrap().unwrap();
        assert_eq!(event.source, EventSource::TokenTransferFallback);
        assert_eq!(event.direction, SwapDirection::Buy);
        assert_eq!(event.wallet, "wallet-j");
        assert_eq!(event.amount_sol, 0.0);
    }

    #[test]
    fn test_token_transfer_sent_by_wallet_is_a_sell() {
        let record = json!({
            "signature": "sig-10b",
            "timestamp": 1_700_000_000,
            "feePayer": "user",
            "tokenTransfers": [
                { "mint": TOKEN, "fromUserAccount": "user", "toUserAccount": "pool" }
            ]
        });
        let event = normalizer().normalize(&record).unwrap().unwrap();
        assert_eq!(event.direction, SwapDirection::Sell);
        assert_eq!(event.wallet, "user");
    }

    #[test]
    fn test_token_transfer_not_touching_wallet_yields_nothing() {
        let record = json!({
            "signature": "sig-10c",
            "timestamp": 1_700_000_000,
            "owner": "user",
            "tokenTransfers": [
                { "mint": TOKEN, "fromUserAccount": "pool", "toUserAccount": "someone-else" }
            ]
        });
        assert_eq!(normalizer().normalize(&record).unwrap(), None);

        let no_wallet = json!({
            "signature": "sig-10d",
            "timestamp": 1_700_000_000,
            "tokenTransfers": [
                { "mint": TOKEN, "fromUserAccount": "pool", "toUserAccount": "user" }
            ]
        });
        assert_eq!(normalizer().normalize(&no_wallet).unwrap(), None);
    }

    #[test]
    fn test_unrelated_swap_yields_nothing() {
        let record = json!({
            "signature": "sig-11",
            "timestamp": 1_700_000_000,
            "owner": "wallet-k",
            "tokenIn": { "address": WSOL_MINT, "amount": 1.0 },
            "tokenOut": { "address": "SomeOtherMint", "amount": 5.0 }
        });
        assert_eq!(normalizer().normalize(&record).unwrap(), None);
        assert_eq!(normalizer().normalize(&json!({"signature": "s", "timestamp": 1})).unwrap(), None);
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        let bad_amount = json!({
            "signature": "sig-12",
            "timestamp": 1_700_000_000,
            "owner": "wallet-l",
            "tokenIn": { "address": WSOL_MINT, "amount": "lots" },
            "tokenOut": { "address": TOKEN }
        });
        assert!(matches!(
            normalizer().normalize(&bad_amount),
            Err(NormalizeError::InvalidAmount { .. })
        ));

        let wrong_type = json!({
            "signature": "sig-13",
            "timestamp": 1_700_000_000,
            "sourceMint": 42,
            "destinationMint": TOKEN
        });
        assert!(matches!(
            normalizer().normalize(&wrong_type),
            Err(NormalizeError::WrongType { .. })
        ));

        let negative = json!({
            "signature": "sig-14",
            "timestamp": 1_700_000_000,
            "owner": "wallet-m",
            "fromMint": WSOL_MINT,
            "toMint": TOKEN,
            "fromAmount": -1.0
        });
        assert!(normalizer().normalize(&negative).is_err());

        assert_eq!(normalizer().normalize(&json!([1, 2])), Err(NormalizeError::NotAnObject));
        assert_eq!(
            normalizer().normalize(&json!({"timestamp": 1})),
            Err(NormalizeError::MissingField("signature"))
        );
    }

    #[test]
    fn test_millisecond_timestamps_are_scaled() {
        let record = json!({
            "signature": "sig-15",
            "blockTime": 1_700_000_000_123_i64,
            "owner": "wallet-n",
            "fromMint": WSOL_MINT,
            "toMint": TOKEN,
            "fromAmount": 1.0
        });
        let event = normalizer().normalize(&record).unwrap().unwrap();
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let record = json!({
            "signature": "sig-16",
            "timestamp": 1_700_000_000,
            "owner": "wallet-o",
            "fromMint": WSOL_MINT,
            "toMint": TOKEN,
            "fromAmount": 0.4
        });
        let first = normalizer().normalize(&record);
        let second = normalizer().normalize(&record);
        assert_eq!(first, second);
    }
}
