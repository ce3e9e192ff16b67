use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::Duration;
use zeroize::Zeroizing;

use super::client::{read_json, TransactionSource};
use super::error::UpstreamError;
use super::rate_limit::RateLimiter;
use super::types::PageRequest;

pub const DEFAULT_HELIUS_RPC_URL: &str = "https://mainnet.helius-rpc.com";

/// `getSignaturesForAddress` returns at most this many entries per call.
const MAX_SIGNATURES_PER_CALL: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
struct SignatureInfo {
    signature: String,
    #[serde(rename = "blockTime")]
    block_time: Option<i64>,
    err: Option<Value>,
}

/// Reads a token's history over Solana JSON-RPC: signatures first, then
/// each transaction in `jsonParsed` encoding, rebuilt into swap records.
///
/// Every signature in a page yields one record so that page lengths keep
/// their meaning; records without a swap of the token carry no swap fields.
pub struct HeliusTransactionSource {
    rpc_url: String,
    api_key: Zeroizing<String>,
    http_client: reqwest::Client,
    next_id: AtomicU64,
    detail_limiter: Option<Arc<RateLimiter>>,
}

impl HeliusTransactionSource {
    pub fn new(
        rpc_url: impl Into<String>,
        api_key: Zeroizing<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            api_key,
            http_client,
            next_id: AtomicU64::new(1),
            detail_limiter: None,
        })
    }

    /// Rate limits the per-signature `getTransaction` calls.
    pub fn with_detail_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.detail_limiter = Some(limiter);
        self
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http_client
            .post(&self.rpc_url)
            .bearer_auth(self.api_key.as_str())
            .json(&rpc_request(id, method, params))
            .send()
            .await?;

        let body = read_json(response).await?;
        rpc_result(body)
    }

    async fn signatures(&self, page: &PageRequest) -> Result<Vec<SignatureInfo>, UpstreamError> {
        let wanted = page.offset + page.limit;
        let mut collected: Vec<SignatureInfo> = Vec::with_capacity(wanted);
        let mut before: Option<String> = None;

        while collected.len() < wanted {
            let requested = (wanted - collected.len()).min(MAX_SIGNATURES_PER_CALL);
            let mut options = json!({ "limit": requested, "commitment": "confirmed" });
            if let Some(before) = &before {
                options["before"] = json!(before);
            }

            let result = self
                .call("getSignaturesForAddress", json!([page.token, options]))
                .await?;
            let chunk: Vec<SignatureInfo> =
                serde_json::from_value(result).map_err(|e| UpstreamError::Decode(e.to_string()))?;

            let exhausted = chunk.len() < requested;
            before = chunk.last().map(|info| info.signature.clone());
            collected.extend(chunk);
            if exhausted || before.is_none() {
                break;
            }
        }

        Ok(collected.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn transaction(&self, signature: &str) -> Result<Option<Value>, UpstreamError> {
        let permit = match &self.detail_limiter {
            Some(limiter) => Some(limiter.acquire().await?),
            None => None,
        };
        let params = json!([
            signature,
            { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0, "commitment": "confirmed" }
        ]);
        let result = self.call("getTransaction", params).await;
        drop(permit);

        match result? {
            Value::Null => Ok(None),
            transaction => Ok(Some(transaction)),
        }
    }
}

#[async_trait]
impl TransactionSource for HeliusTransactionSource {
    async fn fetch_page(&self, page: &PageRequest) -> Result<Vec<Value>, UpstreamError> {
        let signatures = self.signatures(page).await?;
        debug!(
            "{} signatures for {} at offset {}",
            signatures.len(),
            page.token,
            page.offset
        );

        let mut records = Vec::with_capacity(signatures.len());
        for info in signatures {
            let in_range = info
                .block_time
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
                .map_or(true, |time| page.time_range.contains(time));
            if info.err.is_some() || !in_range {
                records.push(bare_record(&info));
                continue;
            }

            match self.transaction(&info.signature).await {
                Ok(Some(transaction)) => records.push(swap_record(&info, &transaction, &page.token)),
                Ok(None) => records.push(bare_record(&info)),
                Err(UpstreamError::RateLimited) => return Err(UpstreamError::RateLimited),
                Err(e) => {
                    warn!("transaction {} could not be loaded: {}", info.signature, e);
                    records.push(bare_record(&info));
                }
            }
        }
        Ok(records)
    }
}

fn rpc_request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

fn rpc_result(body: Value) -> Result<Value, UpstreamError> {
    let Value::Object(mut envelope) = body else {
        return Err(UpstreamError::Decode("rpc response is not an object".into()));
    };
    if let Some(error) = envelope.remove("error") {
        let message = match error.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => error.to_string(),
        };
        return Err(UpstreamError::Rejected(message));
    }
    envelope
        .remove("result")
        .ok_or_else(|| UpstreamError::Decode("rpc response has no result".into()))
}

fn bare_record(info: &SignatureInfo) -> Value {
    json!({ "signature": info.signature, "blockTime": info.block_time })
}

/// Rebuilds an enhanced swap record from the fee payer's balance changes:
/// lamports spent (fee excluded) against target tokens received is a buy,
/// the mirror is a sell. A token change without a SOL leg becomes a token
/// transfer.
fn swap_record(info: &SignatureInfo, transaction: &Value, token: &str) -> Value {
    let mut record = Map::new();
    record.insert("signature".into(), json!(info.signature));
    record.insert("blockTime".into(), json!(info.block_time));

    let Some(payer) = fee_payer(transaction) else {
        return Value::Object(record);
    };
    record.insert("feePayer".into(), json!(payer));

    let meta = &transaction["meta"];
    let lamports_delta = lamport_change(meta);
    let token_delta = token_balance(&meta["postTokenBalances"], token, &payer)
        - token_balance(&meta["preTokenBalances"], token, &payer);

    let lamports_moved = u64::try_from(lamports_delta.unsigned_abs()).unwrap_or(u64::MAX);
    if token_delta > 0.0 && lamports_delta < 0 {
        record.insert(
            "events".into(),
            json!({ "swap": {
                "nativeInput": { "account": payer, "amount": lamports_moved },
                "tokenOutputs": [{ "userAccount": payer, "mint": token, "tokenAmount": token_delta }]
            }}),
        );
    } else if token_delta < 0.0 && lamports_delta > 0 {
        record.insert(
            "events".into(),
            json!({ "swap": {
                "tokenInputs": [{ "userAccount": payer, "mint": token, "tokenAmount": -token_delta }],
                "nativeOutput": { "account": payer, "amount": lamports_moved }
            }}),
        );
    } else if token_delta > 0.0 {
        record.insert(
            "tokenTransfers".into(),
            json!([{ "mint": token, "toUserAccount": payer }]),
        );
    } else if token_delta < 0.0 {
        record.insert(
            "tokenTransfers".into(),
            json!([{ "mint": token, "fromUserAccount": payer }]),
        );
    }

    Value::Object(record)
}

fn fee_payer(transaction: &Value) -> Option<String> {
    let first = transaction["transaction"]["message"]["accountKeys"].get(0)?;
    match first {
        Value::String(key) => Some(key.clone()),
        Value::Object(key) => key.get("pubkey").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Change in the fee payer's lamports, with the fee added back.
fn lamport_change(meta: &Value) -> i128 {
    let balance = |field: &str| meta[field].get(0).and_then(Value::as_u64).map_or(0, i128::from);
    let fee = meta["fee"].as_u64().map_or(0, i128::from);
    balance("postBalances") - balance("preBalances") + fee
}

/// Sum of `owner`'s balances of `mint`, in UI units.
fn token_balance(balances: &Value, mint: &str, owner: &str) -> f64 {
    let Some(balances) = balances.as_array() else {
        return 0.0;
    };
    balances
        .iter()
        .filter(|b| b["mint"].as_str() == Some(mint) && b["owner"].as_str() == Some(owner))
        .map(|b| ui_amount(&b["uiTokenAmount"]))
        .sum()
}

fn ui_amount(amount: &Value) -> f64 {
    let raw = amount["amount"].as_str().and_then(|raw| raw.parse::<f64>().ok());
    let decimals = amount["decimals"].as_i64();
    match (raw, decimals) {
        (Some(raw), Some(decimals)) => raw / 10f64.powi(decimals as i32),
        _ => amount["uiAmount"].as_f64().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{EventNormalizer, EventSource, SwapDirection};

    const TOKEN: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    fn info(signature: &str) -> SignatureInfo {
        SignatureInfo {
            signature: signature.to_string(),
            block_time: Some(1_700_000_000),
            err: None,
        }
    }

    fn token_balance_entry(owner: &str, amount: &str) -> Value {
        json!({
            "accountIndex": 2,
            "mint": TOKEN,
            "owner": owner,
            "uiTokenAmount": { "amount": amount, "decimals": 5, "uiAmountString": "" }
        })
    }

    fn transaction(pre_lamports: u64, post_lamports: u64, pre_tokens: &str, post_tokens: &str) -> Value {
        json!({
            "slot": 231_000_000,
            "transaction": {
                "message": {
                    "accountKeys": [
                        { "pubkey": "buyer-wallet", "signer": true, "writable": true },
                        { "pubkey": "pool", "signer": false, "writable": true }
                    ]
                }
            },
            "meta": {
                "err": null,
                "fee": 5000,
                "preBalances": [pre_lamports, 10],
                "postBalances": [post_lamports, 10],
                "preTokenBalances": [token_balance_entry("buyer-wallet", pre_tokens)],
                "postTokenBalances": [token_balance_entry("buyer-wallet", post_tokens)]
            }
        })
    }

    #[test]
    fn test_buy_is_rebuilt_as_enhanced_swap() {
        // 1.5 SOL spent plus the fee, 100 tokens received
        let tx = transaction(3_000_000_000, 1_499_995_000, "0", "10000000");
        let record = swap_record(&info("sig-buy"), &tx, TOKEN);

        let event = EventNormalizer::new(TOKEN).normalize(&record).unwrap().unwrap();
        assert_eq!(event.source, EventSource::EventParsed);
        assert_eq!(event.direction, SwapDirection::Buy);
        assert_eq!(event.wallet, "buyer-wallet");
        assert!((event.amount_sol - 1.5).abs() < 1e-12);
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_sell_is_rebuilt_as_enhanced_swap() {
        let tx = transaction(1_000_000_000, 1_249_995_000, "5000000", "0");
        let record = swap_record(&info("sig-sell"), &tx, TOKEN);

        let event = EventNormalizer::new(TOKEN).normalize(&record).unwrap().unwrap();
        assert_eq!(event.direction, SwapDirection::Sell);
        assert!((event.amount_sol - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_token_change_without_sol_leg_is_a_transfer() {
        let tx = transaction(1_000_000_000, 999_995_000, "0", "700");
        let record = swap_record(&info("sig-airdrop"), &tx, TOKEN);

        let event = EventNormalizer::new(TOKEN).normalize(&record).unwrap().unwrap();
        assert_eq!(event.source, EventSource::TokenTransferFallback);
        assert_eq!(event.direction, SwapDirection::Buy);
        assert_eq!(event.amount_sol, 0.0);
    }

    #[test]
    fn test_unrelated_transaction_has_no_swap_fields() {
        let tx = transaction(1_000_000_000, 500_000_000, "100", "100");
        let record = swap_record(&info("sig-other"), &tx, TOKEN);
        assert!(record.get("events").is_none());
        assert!(record.get("tokenTransfers").is_none());
        assert_eq!(EventNormalizer::new(TOKEN).normalize(&record).unwrap(), None);

        assert_eq!(
            EventNormalizer::new(TOKEN).normalize(&bare_record(&info("sig-bare"))).unwrap(),
            None
        );
    }

    #[test]
    fn test_rpc_envelope() {
        let request = rpc_request(7, "getTransaction", json!(["sig"]));
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["id"], 7);
        assert_eq!(request["method"], "getTransaction");

        assert_eq!(rpc_result(json!({ "jsonrpc": "2.0", "id": 1, "result": [1, 2] })).unwrap(), json!([1, 2]));
        assert_eq!(rpc_result(json!({ "jsonrpc": "2.0", "id": 1, "result": null })).unwrap(), Value::Null);
        assert!(matches!(
            rpc_result(json!({ "error": { "code": -32602, "message": "Invalid param: WrongSize" } })),
            Err(UpstreamError::Rejected(m)) if m == "Invalid param: WrongSize"
        ));
        assert!(matches!(rpc_result(json!({ "id": 1 })), Err(UpstreamError::Decode(_))));
        assert!(matches!(rpc_result(json!([])), Err(UpstreamError::Decode(_))));
    }

    #[test]
    fn test_signature_list_decodes() {
        let result = json!([
            { "signature": "a", "slot": 1, "blockTime": 1_700_000_000, "err": null, "memo": null },
            { "signature": "b", "slot": 2, "blockTime": null, "err": { "InstructionError": [0, "Custom"] } }
        ]);
        let infos: Vec<SignatureInfo> = serde_json::from_value(result).unwrap();
        assert_eq!(infos[0].block_time, Some(1_700_000_000));
        assert!(infos[0].err.is_none());
        assert!(infos[1].err.is_some());
        assert_eq!(infos[1].block_time, None);
    }
}
