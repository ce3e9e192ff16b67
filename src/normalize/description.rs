//! Parser for free-text swap descriptions such as
//! `"7xKX...sAsU swapped 1.5 SOL for 1,204,332.12 BONK"`.

use super::types::NormalizeError;

#[derive(Debug, Clone, PartialEq)]
pub struct DescribedAmount {
    pub amount: Option<f64>,
    pub asset: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescribedSwap {
    pub actor: Option<String>,
    pub given: DescribedAmount,
    pub received: DescribedAmount,
}

const SWAPPED: &str = "swapped ";

/// Returns `Ok(None)` when the text does not describe a swap at all, and an
/// error when it does but an amount cannot be read.
pub fn parse(text: &str) -> Result<Option<DescribedSwap>, NormalizeError> {
    let text = text.trim();
    let (actor, rest) = if let Some(rest) = text.strip_prefix(SWAPPED) {
        (None, rest)
    } else if let Some(idx) = text.find(" swapped ") {
        let actor = text[..idx].split_whitespace().last().map(str::to_string);
        (actor, &text[idx + " swapped ".len()..])
    } else {
        return Ok(None);
    };

    let Some((given, received)) = rest.split_once(" for ") else {
        return Ok(None);
    };

    let (Some(given), Some(received)) = (parse_side(given)?, parse_side(received)?) else {
        return Ok(None);
    };

    Ok(Some(DescribedSwap {
        actor,
        given,
        received,
    }))
}

fn parse_side(side: &str) -> Result<Option<DescribedAmount>, NormalizeError> {
    let mut words = side.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(None);
    };

    if !looks_numeric(first) {
        return Ok(Some(DescribedAmount {
            amount: None,
            asset: clean_asset(first),
        }));
    }

    let amount = parse_amount(first)?;
    let Some(asset) = words.next() else {
        return Ok(None);
    };

    Ok(Some(DescribedAmount {
        amount: Some(amount),
        asset: clean_asset(asset),
    }))
}

fn looks_numeric(word: &str) -> bool {
    word.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.' || c == '+')
}

fn parse_amount(word: &str) -> Result<f64, NormalizeError> {
    let invalid = || NormalizeError::InvalidAmount {
        field: "description".to_string(),
        value: word.to_string(),
    };
    let amount: f64 = word.replace(',', "").parse().map_err(|_| invalid())?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(invalid());
    }
    Ok(amount)
}

fn clean_asset(word: &str) -> String {
    word.trim_end_matches(|c: char| c == '.' || c == ',').to_string()
}
