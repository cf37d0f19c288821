use crate::{
    settings::ChainSettings,
    types::{ChainId, EventKind},
};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Interface a watched contract implements.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContractKind {
    Portfolio,
    Token,
}

impl ContractKind {
    pub fn events(&self) -> &'static [EventKind] {
        match self {
            ContractKind::Portfolio => &[
                EventKind::UserRegistered,
                EventKind::PortfolioUpdated,
                EventKind::AlertCreated,
            ],
            ContractKind::Token => &[EventKind::Transfer, EventKind::Approval],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredContract {
    pub name: String,
    pub kind: ContractKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("contract {address} on chain {chain_id} is registered twice")]
    DuplicateContract { chain_id: ChainId, address: Address },
}

/// Routes `(chain, contract, event name)` to the event kind that handles it.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    contracts: HashMap<(ChainId, Address), RegisteredContract>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(chains: &[ChainSettings]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for chain in chains {
            for contract in &chain.contracts {
                registry.register(chain.chain_id, contract.address, &contract.name, contract.kind)?;
            }
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        chain_id: ChainId,
        address: Address,
        name: &str,
        kind: ContractKind,
    ) -> Result<(), RegistryError> {
        if self.contracts.contains_key(&(chain_id, address)) {
            return Err(RegistryError::DuplicateContract { chain_id, address });
        }
        self.contracts.insert(
            (chain_id, address),
            RegisteredContract {
                name: name.to_string(),
                kind,
            },
        );
        Ok(())
    }

    pub fn contract(&self, chain_id: ChainId, address: &Address) -> Option<&RegisteredContract> {
        self.contracts.get(&(chain_id, *address))
    }

    /// `None` means the event is not ours and must be skipped.
    pub fn resolve(
        &self,
        chain_id: ChainId,
        address: &Address,
        event_name: &str,
    ) -> Option<EventKind> {
        let contract = self.contract(chain_id, address)?;
        let kind = event_name.parse::<EventKind>().ok()?;
        contract.kind.events().contains(&kind).then_some(kind)
    }

    pub fn contracts_on(&self, chain_id: ChainId) -> Vec<Address> {
        let mut addresses: Vec<_> = self
            .contracts
            .keys()
            .filter(|(chain, _)| *chain == chain_id)
            .map(|(_, address)| *address)
            .collect();
        addresses.sort();
        addresses
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const PORTFOLIO: Address = address!("0x0000000000000000000000000000000000000c01");
    const TOKEN: Address = address!("0x0000000000000000000000000000000000007070");

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register(1, PORTFOLIO, "portfolio", ContractKind::Portfolio)
            .unwrap();
        registry
            .register(1, TOKEN, "usdc", ContractKind::Token)
            .unwrap();
        registry
    }

    #[rstest]
    #[case::portfolio_event(1, PORTFOLIO, "AlertCreated", Some(EventKind::AlertCreated))]
    #[case::token_event(1, TOKEN, "Transfer", Some(EventKind::Transfer))]
    #[case::approval(1, TOKEN, "Approval", Some(EventKind::Approval))]
    #[case::event_of_other_interface(1, TOKEN, "UserRegistered", None)]
    #[case::unknown_event(1, PORTFOLIO, "OwnershipTransferred", None)]
    #[case::unknown_contract(1, Address::ZERO, "Transfer", None)]
    #[case::other_chain(137, TOKEN, "Transfer", None)]
    fn resolves_handlers(
        #[case] chain_id: ChainId,
        #[case] address: Address,
        #[case] event_name: &str,
        #[case] expected: Option<EventKind>,
    ) {
        assert_eq!(registry().resolve(chain_id, &address, event_name), expected);
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = registry();
        assert_eq!(
            registry.register(1, TOKEN, "usdc-again", ContractKind::Token),
            Err(RegistryError::DuplicateContract {
                chain_id: 1,
                address: TOKEN
            })
        );
        registry
            .register(137, TOKEN, "usdc", ContractKind::Token)
            .unwrap();
        assert_eq!(registry.contracts_on(137), vec![TOKEN]);
    }

    #[test]
    fn kind_names_are_snake_case() {
        assert_eq!(ContractKind::Portfolio.to_string(), "portfolio");
        assert_eq!("token".parse::<ContractKind>().unwrap(), ContractKind::Token);
    }
}
