use super::identity::{ChainId, EventId, EventPosition};
use alloy::primitives::Address;
use num_bigint::{BigInt, BigUint, Sign};
use std::{collections::BTreeMap, str::FromStr};

/// A decoded log as delivered by an event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub chain_id: ChainId,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: String,
    pub block_timestamp: u64,
    pub contract: String,
    pub event_name: String,
    pub params: Params,
}

impl RawEvent {
    pub fn id(&self) -> EventId {
        EventId::new(self.chain_id, self.block_number, self.log_index)
    }

    pub fn position(&self) -> EventPosition {
        EventPosition::new(self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    Integer(BigInt),
    Bool(bool),
}

impl From<Address> for ParamValue {
    fn from(value: Address) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<BigUint> for ParamValue {
    fn from(value: BigUint) -> Self {
        Self::Integer(BigInt::from(value))
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        Self::Integer(BigInt::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing parameter `{0}`")]
    MissingParam(String),
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParam { name: String, reason: String },
    #[error("invalid transaction hash `{0}`")]
    InvalidTransactionHash(String),
    #[error("invalid contract address `{0}`")]
    InvalidContract(String),
}

/// Named event parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    fn required(&self, name: &str) -> Result<&ParamValue, DecodeError> {
        self.get(name)
            .ok_or_else(|| DecodeError::MissingParam(name.to_string()))
    }

    pub fn address(&self, name: &str) -> Result<Address, DecodeError> {
        match self.required(name)? {
            ParamValue::Text(value) => Address::from_str(value.trim())
                .map_err(|err| invalid(name, format!("not an address: {err}"))),
            other => Err(invalid(name, format!("expected address, got {other:?}"))),
        }
    }

    /// Reads an unsigned integer given either as a number or as a decimal or
    /// `0x`-prefixed hex string.
    pub fn uint(&self, name: &str) -> Result<BigUint, DecodeError> {
        match self.required(name)? {
            ParamValue::Integer(value) => match value.sign() {
                Sign::Minus => Err(invalid(name, "negative value".to_string())),
                _ => Ok(value.magnitude().clone()),
            },
            ParamValue::Text(value) => parse_uint(value.trim())
                .ok_or_else(|| invalid(name, format!("not an unsigned integer: `{value}`"))),
            ParamValue::Bool(_) => Err(invalid(name, "expected integer, got bool".to_string())),
        }
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn invalid(name: &str, reason: String) -> DecodeError {
    DecodeError::InvalidParam {
        name: name.to_string(),
        reason,
    }
}

fn parse_uint(value: &str) -> Option<BigUint> {
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some("") => None,
        Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
        None if value.is_empty() => None,
        None => BigUint::parse_bytes(value.as_bytes(), 10),
    }
}
