//! Stablecoin amounts, bytes32 property strings and display helpers

use alloy::primitives::utils::parse_units;
use alloy_primitives::{Address, B256, U256};
use chrono::DateTime;
use thiserror::Error;

/// Decimals of the deposit stablecoin
pub const STABLECOIN_DECIMALS: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid amount {input:?}: {reason}")]
    InvalidAmount { input: String, reason: String },

    #[error("string of {len} bytes does not fit in bytes32 (max 31)")]
    TooLong { len: usize },
}

/// Render a smallest-unit amount with two decimals, rounding half up.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let cents = amount
        .saturating_mul(U256::from(100u64))
        .saturating_add(scale / U256::from(2u64))
        / scale;
    let hundred = U256::from(100u64);
    format!("{}.{:02}", cents / hundred, (cents % hundred).to::<u64>())
}

pub fn format_usdc(amount: U256) -> String {
    format_units(amount, STABLECOIN_DECIMALS)
}

/// Parse a decimal string such as `"1000.5"` into smallest units.
pub fn parse_amount(input: &str, decimals: u8) -> Result<U256, FormatError> {
    let trimmed = input.trim();
    let invalid = |reason: &str| FormatError::InvalidAmount {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }
    if trimmed.starts_with('-') {
        return Err(invalid("negative"));
    }

    parse_units(trimmed, decimals)
        .map(|parsed| parsed.get_absolute())
        .map_err(|e| invalid(&e.to_string()))
}

pub fn parse_usdc(input: &str) -> Result<U256, FormatError> {
    parse_amount(input, STABLECOIN_DECIMALS)
}

/// Encode a short string as a NUL-padded bytes32.
pub fn encode_bytes32(value: &str) -> Result<B256, FormatError> {
    let bytes = value.as_bytes();
    if bytes.len() > 31 {
        return Err(FormatError::TooLong { len: bytes.len() });
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(B256::from(out))
}

/// Decode a bytes32 string. All-zero, unterminated or non-UTF-8 input
/// decodes to the empty string.
pub fn decode_bytes32(value: &B256) -> String {
    if value.is_zero() || value[31] != 0 {
        return String::new();
    }
    let end = value.iter().position(|b| *b == 0).unwrap_or(32);
    std::str::from_utf8(&value[..end])
        .map(str::to_string)
        .unwrap_or_default()
}

/// `0x1234...abcd`
pub fn short_address(address: &Address) -> String {
    let full = address.to_checksum(None);
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// Calendar date (UTC) of a unix timestamp; empty for zero or out-of-range.
pub fn format_timestamp(ts: u64) -> String {
    if ts == 0 {
        return String::new();
    }
    i64::try_from(ts)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
