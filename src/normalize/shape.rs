use serde_json::{Map, Value};

use super::description::{self, DescribedSwap};
use super::types::{EventSource, NormalizeError, LAMPORTS_PER_SOL, WSOL_MINT};

pub type RawRecord = Map<String, Value>;

/// One side of a swap: what mint moved, how much of it, and who owned it.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapLeg {
    pub mint: String,
    pub amount: Option<f64>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenTransfer {
    pub mint: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// The upstream schema variants a record can take, in resolution order.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapShape {
    /// `tokenIn` / `tokenOut` objects.
    TokenInOut { token_in: SwapLeg, token_out: SwapLeg },
    /// `sourceMint` / `destinationMint` + `sourceAmount`.
    SourceDestination { source: SwapLeg, destination: SwapLeg },
    /// `fromMint` / `toMint` + `fromAmount`.
    FromTo { from: SwapLeg, to: SwapLeg },
    /// Enhanced-transaction `events.swap` block.
    EnhancedEvent { input: SwapLeg, output: SwapLeg },
    Description(DescribedSwap),
    TokenTransfers(Vec<TokenTransfer>),
}

impl SwapShape {
    /// Structured shapes win over the description, which wins over bare
    /// token transfers. A shape whose fields are present but mistyped is an
    /// error, not a reason to fall through.
    pub fn resolve(record: &RawRecord) -> Result<Option<Self>, NormalizeError> {
        if let Some(shape) = token_in_out(record)? {
            return Ok(Some(shape));
        }
        if let Some(shape) = mint_pair(record, "sourceMint", "destinationMint", "sourceAmount", "destinationAmount")? {
            let (source, destination) = shape;
            return Ok(Some(SwapShape::SourceDestination { source, destination }));
        }
        if let Some(shape) = mint_pair(record, "fromMint", "toMint", "fromAmount", "toAmount")? {
            let (from, to) = shape;
            return Ok(Some(SwapShape::FromTo { from, to }));
        }
        if let Some(shape) = enhanced_event(record)? {
            return Ok(Some(shape));
        }
        if let Some(text) = string_field(record, "description")? {
            if let Some(described) = description::parse(&text)? {
                return Ok(Some(SwapShape::Description(described)));
            }
        }
        token_transfers(record)
    }

    pub fn source(&self) -> EventSource {
        match self {
            SwapShape::TokenInOut { .. }
            | SwapShape::SourceDestination { .. }
            | SwapShape::FromTo { .. } => EventSource::DirectField,
            SwapShape::EnhancedEvent { .. } => EventSource::EventParsed,
            SwapShape::Description(_) => EventSource::DescriptionParsed,
            SwapShape::TokenTransfers(_) => EventSource::TokenTransferFallback,
        }
    }

    /// Input and output legs for the leg-based shapes.
    pub fn legs(&self) -> Option<(&SwapLeg, &SwapLeg)> {
        match self {
            SwapShape::TokenInOut { token_in, token_out } => Some((token_in, token_out)),
            SwapShape::SourceDestination { source, destination } => Some((source, destination)),
            SwapShape::FromTo { from, to } => Some((from, to)),
            SwapShape::EnhancedEvent { input, output } => Some((input, output)),
            SwapShape::Description(_) | SwapShape::TokenTransfers(_) => None,
        }
    }
}

fn token_in_out(record: &RawRecord) -> Result<Option<SwapShape>, NormalizeError> {
    let token_in = object_field(record, "tokenIn")?;
    let token_out = object_field(record, "tokenOut")?;
    match (token_in, token_out) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(NormalizeError::MissingField("tokenOut")),
        (None, Some(_)) => Err(NormalizeError::MissingField("tokenIn")),
        (Some(token_in), Some(token_out)) => Ok(Some(SwapShape::TokenInOut {
            token_in: leg_object(token_in, "from")?,
            token_out: leg_object(token_out, "to")?,
        })),
    }
}

fn leg_object(leg: &RawRecord, owner_alias: &str) -> Result<SwapLeg, NormalizeError> {
    let mint = match string_field(leg, "address")? {
        Some(mint) => mint,
        None => string_field(leg, "mint")?.ok_or(NormalizeError::MissingField("mint"))?,
    };
    let amount = match amount_field(leg, "amount")? {
        Some(amount) => Some(amount),
        None => amount_field(leg, "uiAmount")?,
    };
    let owner = match string_field(leg, "owner")? {
        Some(owner) => Some(owner),
        None => string_field(leg, owner_alias)?,
    };
    Ok(SwapLeg { mint, amount, owner })
}

fn mint_pair(
    record: &RawRecord,
    input_key: &'static str,
    output_key: &'static str,
    input_amount_key: &str,
    output_amount_key: &str,
) -> Result<Option<(SwapLeg, SwapLeg)>, NormalizeError> {
    let input = string_field(record, input_key)?;
    let output = string_field(record, output_key)?;
    match (input, output) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(NormalizeError::MissingField(output_key)),
        (None, Some(_)) => Err(NormalizeError::MissingField(input_key)),
        (Some(input_mint), Some(output_mint)) => Ok(Some((
            SwapLeg {
                mint: input_mint,
                amount: amount_field(record, input_amount_key)?,
                owner: None,
            },
            SwapLeg {
                mint: output_mint,
                amount: amount_field(record, output_amount_key)?,
                owner: None,
            },
        ))),
    }
}

fn enhanced_event(record: &RawRecord) -> Result<Option<SwapShape>, NormalizeError> {
    let Some(events) = object_field(record, "events")? else {
        return Ok(None);
    };
    let Some(swap) = object_field(events, "swap")? else {
        return Ok(None);
    };

    let input = match native_leg(swap, "nativeInput")? {
        Some(leg) => Some(leg),
        None => token_leg(swap, "tokenInputs")?,
    };
    let output = match native_leg(swap, "nativeOutput")? {
        Some(leg) => Some(leg),
        None => token_leg(swap, "tokenOutputs")?,
    };

    match (input, output) {
        (Some(input), Some(output)) => Ok(Some(SwapShape::EnhancedEvent { input, output })),
        _ => Ok(None),
    }
}

/// `{"account": ..., "amount": "<lamports>"}`
fn native_leg(swap: &RawRecord, key: &str) -> Result<Option<SwapLeg>, NormalizeError> {
    let Some(native) = object_field(swap, key)? else {
        return Ok(None);
    };
    let lamports = amount_field(native, "amount")?;
    Ok(Some(SwapLeg {
        mint: WSOL_MINT.to_string(),
        amount: lamports.map(|lamports| lamports / LAMPORTS_PER_SOL),
        owner: string_field(native, "account")?,
    }))
}

fn token_leg(swap: &RawRecord, key: &str) -> Result<Option<SwapLeg>, NormalizeError> {
    let Some(entries) = array_field(swap, key)? else {
        return Ok(None);
    };
    let Some(entry) = entries.first() else {
        return Ok(None);
    };
    let entry = entry.as_object().ok_or_else(|| NormalizeError::WrongType {
        field: key.to_string(),
        expected: "array of objects",
    })?;

    let mint = string_field(entry, "mint")?.ok_or(NormalizeError::MissingField("mint"))?;
    let amount = match object_field(entry, "rawTokenAmount")? {
        Some(raw) => {
            let units = amount_field(raw, "tokenAmount")?;
            let decimals = amount_field(raw, "decimals")?.unwrap_or(0.0);
            units.map(|units| units / 10f64.powi(decimals as i32))
        }
        None => amount_field(entry, "tokenAmount")?,
    };

    Ok(Some(SwapLeg {
        mint,
        amount,
        owner: string_field(entry, "userAccount")?,
    }))
}

fn token_transfers(record: &RawRecord) -> Result<Option<SwapShape>, NormalizeError> {
    let transfers = record_transfers(record)?;
    if transfers.is_empty() {
        return Ok(None);
    }
    Ok(Some(SwapShape::TokenTransfers(transfers)))
}

/// Every entry of `tokenTransfers`; empty when the field is absent.
pub(crate) fn record_transfers(record: &RawRecord) -> Result<Vec<TokenTransfer>, NormalizeError> {
    let Some(entries) = array_field(record, "tokenTransfers")? else {
        return Ok(Vec::new());
    };

    let mut transfers = Vec::with_capacity(entries.len());
    for entry in entries {
        let entry = entry.as_object().ok_or_else(|| NormalizeError::WrongType {
            field: "tokenTransfers".to_string(),
            expected: "array of objects",
        })?;
        transfers.push(TokenTransfer {
            mint: string_field(entry, "mint")?.ok_or(NormalizeError::MissingField("mint"))?,
            from: string_field(entry, "fromUserAccount")?,
            to: string_field(entry, "toUserAccount")?,
        });
    }
    Ok(transfers)
}

pub(crate) fn string_field(record: &RawRecord, field: &str) -> Result<Option<String>, NormalizeError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if value.trim().is_empty() => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(NormalizeError::WrongType {
            field: field.to_string(),
            expected: "string",
        }),
    }
}

/// Accepts JSON numbers and numeric strings; rejects negatives and non-finite values.
pub(crate) fn amount_field(record: &RawRecord, field: &str) -> Result<Option<f64>, NormalizeError> {
    let invalid = |value: String| NormalizeError::InvalidAmount {
        field: field.to_string(),
        value,
    };

    let amount = match record.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_f64().ok_or_else(|| invalid(number.to_string()))?,
        Some(Value::String(text)) => text.trim().parse::<f64>().map_err(|_| invalid(text.clone()))?,
        Some(_) => {
            return Err(NormalizeError::WrongType {
                field: field.to_string(),
                expected: "number or numeric string",
            })
        }
    };

    if !amount.is_finite() || amount < 0.0 {
        return Err(invalid(amount.to_string()));
    }
    Ok(Some(amount))
}

fn object_field<'a>(record: &'a RawRecord, field: &str) -> Result<Option<&'a RawRecord>, NormalizeError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(object)) => Ok(Some(object)),
        Some(_) => Err(NormalizeError::WrongType {
            field: field.to_string(),
            expected: "object",
        }),
    }
}

fn array_field<'a>(record: &'a RawRecord, field: &str) -> Result<Option<&'a Vec<Value>>, NormalizeError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(entries)) => Ok(Some(entries)),
        Some(_) => Err(NormalizeError::WrongType {
            field: field.to_string(),
            expected: "array",
        }),
    }
}
