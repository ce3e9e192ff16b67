use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::Duration;
use zeroize::Zeroizing;

use super::error::UpstreamError;
use super::types::{PageRequest, TokenInfo};

pub const DEFAULT_BASE_URL: &str = "https://public-api.birdeye.so";

/// One page of raw swap records for a token.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn fetch_page(&self, page: &PageRequest) -> Result<Vec<Value>, UpstreamError>;
}

/// Token metadata lookup. `Ok(None)` means upstream knows no such token.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenInfoSource: Send + Sync {
    async fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, UpstreamError>;
}

pub struct HttpTransactionSource {
    base_url: String,
    api_key: Zeroizing<String>,
    http_client: reqwest::Client,
}

impl HttpTransactionSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Zeroizing<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client,
        })
    }

    fn query(page: &PageRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("address", page.token.clone()),
            ("offset", page.offset.to_string()),
            ("limit", page.limit.to_string()),
            ("tx_type", "swap".to_string()),
        ];
        if let Some(start) = page.time_range.start {
            query.push(("after_time", start.timestamp().to_string()));
        }
        if let Some(end) = page.time_range.end {
            query.push(("before_time", end.timestamp().to_string()));
        }
        query
    }
}

#[async_trait]
impl TransactionSource for HttpTransactionSource {
    async fn fetch_page(&self, page: &PageRequest) -> Result<Vec<Value>, UpstreamError> {
        let url = format!("{}/defi/txs/token", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .header("X-API-KEY", self.api_key.as_str())
            .header("x-chain", "solana")
            .query(&Self::query(page))
            .send()
            .await?;

        let body = read_json(response).await?;
        extract_records(body)
    }
}

#[async_trait]
impl TokenInfoSource for HttpTransactionSource {
    async fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, UpstreamError> {
        let url = format!("{}/defi/token_overview", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .header("X-API-KEY", self.api_key.as_str())
            .header("x-chain", "solana")
            .query(&[("address", token)])
            .send()
            .await?;

        let body = read_json(response).await?;
        extract_token_info(body, token)
    }
}

/// Maps 429 and other non-2xx statuses to errors, then decodes the body.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, UpstreamError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(UpstreamError::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<Value>().await?)
}

fn extract_token_info(body: Value, token: &str) -> Result<Option<TokenInfo>, UpstreamError> {
    let Value::Object(mut envelope) = body else {
        return Err(UpstreamError::Decode("token overview is not an object".into()));
    };
    if envelope.get("success") != Some(&Value::Bool(true)) {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message")
            .to_string();
        return Err(UpstreamError::Rejected(message));
    }

    match envelope.remove("data") {
        Some(Value::Null) | None => Ok(None),
        Some(data) => {
            let mut info: TokenInfo =
                serde_json::from_value(data).map_err(|e| UpstreamError::Decode(e.to_string()))?;
            info.address = token.to_string();
            Ok(Some(info))
        }
    }
}

/// Pulls the record list out of any of the accepted response envelopes.
pub(crate) fn extract_records(body: Value) -> Result<Vec<Value>, UpstreamError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut envelope) => {
            if envelope.get("success") == Some(&Value::Bool(false)) {
                let message = envelope
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no message")
                    .to_string();
                return Err(UpstreamError::Rejected(message));
            }

            if let Some(Value::Object(mut data)) = envelope.remove("data") {
                return match data.remove("items") {
                    Some(Value::Array(items)) => Ok(items),
                    Some(Value::Null) | None => Ok(Vec::new()),
                    Some(_) => Err(UpstreamError::Decode("data.items is not an array".into())),
                };
            }

            match envelope.remove("result") {
                Some(Value::Array(items)) => Ok(items),
                Some(_) => Err(UpstreamError::Decode("result is not an array".into())),
                None => Err(UpstreamError::Decode("no records in response body".into())),
            }
        }
        _ => Err(UpstreamError::Decode("response body is not an object or array".into())),
    }
}
