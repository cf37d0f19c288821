use super::{
    event::{DecodeError, Params, RawEvent},
    identity::EventId,
};
use alloy::primitives::{Address, B256};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::str::FromStr;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum EventKind {
    UserRegistered,
    PortfolioUpdated,
    AlertCreated,
    Transfer,
    Approval,
}

/// Typed payload of an indexed event.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum IndexedEvent {
    UserRegistered {
        user: Address,
    },
    PortfolioUpdated {
        user: Address,
        #[serde_as(as = "DisplayFromStr")]
        total_value: BigUint,
    },
    AlertCreated {
        user: Address,
        #[serde_as(as = "DisplayFromStr")]
        alert_id: BigUint,
    },
    Transfer {
        from: Address,
        to: Address,
        #[serde_as(as = "DisplayFromStr")]
        value: BigUint,
    },
    Approval {
        owner: Address,
        spender: Address,
        #[serde_as(as = "DisplayFromStr")]
        value: BigUint,
    },
}

impl IndexedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::UserRegistered { .. } => EventKind::UserRegistered,
            Self::PortfolioUpdated { .. } => EventKind::PortfolioUpdated,
            Self::AlertCreated { .. } => EventKind::AlertCreated,
            Self::Transfer { .. } => EventKind::Transfer,
            Self::Approval { .. } => EventKind::Approval,
        }
    }

    pub fn decode(kind: EventKind, params: &Params) -> Result<Self, DecodeError> {
        let event = match kind {
            EventKind::UserRegistered => Self::UserRegistered {
                user: params.address("user")?,
            },
            EventKind::PortfolioUpdated => Self::PortfolioUpdated {
                user: params.address("user")?,
                total_value: params.uint("totalValue")?,
            },
            EventKind::AlertCreated => Self::AlertCreated {
                user: params.address("user")?,
                alert_id: params.uint("alertId")?,
            },
            EventKind::Transfer => Self::Transfer {
                from: params.address("from")?,
                to: params.address("to")?,
                value: params.uint("value")?,
            },
            EventKind::Approval => Self::Approval {
                owner: params.address("owner")?,
                spender: params.address("spender")?,
                value: params.uint("value")?,
            },
        };
        Ok(event)
    }

    /// Parameters in the form [`IndexedEvent::decode`] reads them.
    pub fn to_params(&self) -> Params {
        match self {
            Self::UserRegistered { user } => Params::new().with("user", *user),
            Self::PortfolioUpdated { user, total_value } => Params::new()
                .with("user", *user)
                .with("totalValue", total_value.clone()),
            Self::AlertCreated { user, alert_id } => Params::new()
                .with("user", *user)
                .with("alertId", alert_id.clone()),
            Self::Transfer { from, to, value } => Params::new()
                .with("from", *from)
                .with("to", *to)
                .with("value", value.clone()),
            Self::Approval {
                owner,
                spender,
                value,
            } => Params::new()
                .with("owner", *owner)
                .with("spender", *spender)
                .with("value", value.clone()),
        }
    }
}

/// Immutable audit entry of an applied event and the source of replays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: EventId,
    pub transaction_hash: B256,
    pub block_timestamp: u64,
    pub contract: Address,
    pub event: IndexedEvent,
}

impl EventRecord {
    pub fn decode(raw: &RawEvent, kind: EventKind) -> Result<Self, DecodeError> {
        let transaction_hash = B256::from_str(raw.transaction_hash.trim())
            .map_err(|_| DecodeError::InvalidTransactionHash(raw.transaction_hash.clone()))?;
        let contract = parse_contract(&raw.contract)?;
        Ok(Self {
            id: raw.id(),
            transaction_hash,
            block_timestamp: raw.block_timestamp,
            contract,
            event: IndexedEvent::decode(kind, &raw.params)?,
        })
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn to_raw(&self) -> RawEvent {
        RawEvent {
            chain_id: self.id.chain_id,
            block_number: self.id.block_number,
            log_index: self.id.log_index,
            transaction_hash: self.transaction_hash.to_string(),
            block_timestamp: self.block_timestamp,
            contract: self.contract.to_string(),
            event_name: self.kind().to_string(),
            params: self.event.to_params(),
        }
    }
}

pub fn parse_contract(contract: &str) -> Result<Address, DecodeError> {
    Address::from_str(contract.trim()).map_err(|_| DecodeError::InvalidContract(contract.to_string()))
}
