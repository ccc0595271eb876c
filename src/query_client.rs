//! # Analytics Query Client
//!
//! Every off-chain data source in the pipeline (token balances, LP balances,
//! stakers, trader activity) comes from a SQL template executed by an
//! analytics backend at a snapshot block. This module defines the seam the
//! fetchers talk to: a [`Query`] goes in, a list of JSON [`Row`]s comes out.
//!
//! Rows are consumed by field name. The `row_*` helpers turn a missing or
//! malformed field into an error naming the field, so a schema drift in a
//! query surfaces at the first bad row rather than as a silent zero.
//!
//! The production implementation is [`crate::dune::DuneClient`]; tests provide
//! in-memory implementations.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use ethers::types::U256;
use serde::Serialize;
use serde_json::Value;

use crate::types::conversions::{parse_u128_truncating, parse_u256};
use crate::types::{Account, Network};

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Parameter substituted into a query template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryParameter {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl QueryParameter {
    pub fn number(key: &str, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            kind: "number".to_string(),
            value: value.to_string(),
        }
    }

    pub fn text(key: &str, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            kind: "text".to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Template file name without extension, e.g. `mainnet_holders`.
    pub template: String,
    pub network: Network,
    /// Human-readable description for logs.
    pub name: String,
    pub parameters: Vec<QueryParameter>,
}

impl Query {
    pub fn new(template: impl Into<String>, network: Network, name: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            network,
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: QueryParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn at_block(self, block: u64) -> Self {
        self.with_parameter(QueryParameter::number("BlockNumber", block))
    }
}

#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Executes `query` and returns every result row.
    async fn fetch(&self, query: &Query) -> Result<Vec<Row>>;
}

fn field<'a>(row: &'a Row, name: &str) -> Result<&'a Value> {
    row.get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| anyhow!("row is missing field \"{}\": {:?}", name, row))
}

pub fn row_str<'a>(row: &'a Row, name: &str) -> Result<&'a str> {
    field(row, name)?
        .as_str()
        .ok_or_else(|| anyhow!("field \"{}\" is not a string: {:?}", name, row.get(name)))
}

pub fn row_account(row: &Row, name: &str) -> Result<Account> {
    Ok(Account::new(row_str(row, name)?))
}

/// Integer field given either as a JSON number or as a base-10 string.
pub fn row_u256(row: &Row, name: &str) -> Result<U256> {
    match field(row, name)? {
        Value::Number(n) => match n.as_u64() {
            Some(v) => Ok(U256::from(v)),
            None => parse_u256(&n.to_string())
                .with_context(|| format!("field \"{}\" is not an unsigned integer", name)),
        },
        Value::String(s) => {
            parse_u256(s).with_context(|| format!("field \"{}\" is not an unsigned integer", name))
        }
        other => Err(anyhow!("field \"{}\" has unexpected type: {}", name, other)),
    }
}

/// Whole-unit quantity; decimal values are truncated.
pub fn row_u128(row: &Row, name: &str) -> Result<u128> {
    let raw = match field(row, name)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(anyhow!("field \"{}\" has unexpected type: {}", name, other)),
    };
    parse_u128_truncating(&raw).with_context(|| format!("field \"{}\" = {}", name, raw))
}

/// `%Y-%m-%d` date; a trailing time component is ignored.
pub fn row_date(row: &Row, name: &str) -> Result<NaiveDate> {
    let raw = row_str(row, name)?;
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("field \"{}\" is not a date: {}", name, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_row_u256_accepts_numbers_and_strings() {
        let r = row(json!({"a": 42, "b": "1000000000000000000000000", "c": -1, "d": null}));
        assert_eq!(row_u256(&r, "a").unwrap(), U256::from(42));
        assert_eq!(row_u256(&r, "b").unwrap(), U256::exp10(24));
        assert!(row_u256(&r, "c").is_err());
        assert!(row_u256(&r, "d").is_err());
        assert!(row_u256(&r, "missing").is_err());
    }

    #[test]
    fn test_row_u128_truncates() {
        let r = row(json!({"volume": 1999.99, "text": "12.5"}));
        assert_eq!(row_u128(&r, "volume").unwrap(), 1999);
        assert_eq!(row_u128(&r, "text").unwrap(), 12);
    }

    #[test]
    fn test_row_date_tolerates_time_suffix() {
        let r = row(json!({"d": "2021-03-01T00:00:00+00:00", "e": "2021-03-01"}));
        let expected = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        assert_eq!(row_date(&r, "d").unwrap(), expected);
        assert_eq!(row_date(&r, "e").unwrap(), expected);
    }

    #[test]
    fn test_row_account_normalizes() {
        let r = row(json!({"trader": "0xABC"}));
        assert_eq!(row_account(&r, "trader").unwrap().as_str(), "0xabc");
    }

    #[test]
    fn test_query_parameters_serialize_with_type_key() {
        let query = Query::new("mainnet_holders", Network::Mainnet, "GNO holders").at_block(13974427);
        let encoded = serde_json::to_value(&query.parameters).unwrap();
        assert_eq!(
            encoded,
            json!([{"key": "BlockNumber", "type": "number", "value": "13974427"}])
        );
    }
}
