use ethers::types::{U256, U512};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parses a base-10 integer string into `U256`.
pub fn parse_u256(s: &str) -> Result<U256, ConversionError> {
    let trimmed = s.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConversionError::InvalidInteger(s.to_string()));
    }
    U256::from_dec_str(trimmed).map_err(|_| ConversionError::Overflow)
}

/// Parses an integer or decimal string, truncating any fractional part.
///
/// Analytics backends report USD volumes as decimals; the tiering only ever
/// compares whole units.
pub fn parse_u128_truncating(s: &str) -> Result<u128, ConversionError> {
    let trimmed = s.trim();
    if let Ok(value) = trimmed.parse::<u128>() {
        return Ok(value);
    }
    let decimal = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| ConversionError::InvalidDecimal(e.to_string()))?;
    if decimal.is_sign_negative() {
        return Err(ConversionError::Negative(s.to_string()));
    }
    decimal
        .trunc()
        .to_string()
        .parse::<u128>()
        .map_err(|_| ConversionError::Overflow)
}

/// Narrows a 512-bit intermediate back to 256 bits.
pub fn u512_to_u256(value: U512) -> Result<U256, ConversionError> {
    U256::try_from(value).map_err(|_| ConversionError::Overflow)
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),
    #[error("Negative quantity: {0}")]
    Negative(String),
    #[error("Overflow in conversion")]
    Overflow,
}

/// Serde adapter writing `U256` as a plain base-10 string.
///
/// The default `U256` encoding is hex, which would make the CSV caches
/// unreadable and incompatible with existing files.
pub mod serde_u256 {
    use ethers::types::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_u256(&raw).map_err(de::Error::custom)
    }
}
