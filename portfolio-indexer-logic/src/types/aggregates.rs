use super::identity::{ChainId, EventId};
use alloy::primitives::Address;
use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies the `PortfolioUpdated` event that produced the current value.
/// Newer marks win, so the result does not depend on arrival order across
/// chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortfolioMark {
    pub timestamp: u64,
    pub event_id: EventId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStats {
    pub address: Address,
    /// `None` while the user was only seen through portfolio or alert events.
    /// Set by the first committed registration and never moved afterwards,
    /// even if another chain later reports an earlier timestamp. Replay
    /// follows commit order, so rebuilds keep the same value.
    pub registered_at: Option<u64>,
    pub last_active: u64,
    pub total_portfolio_value: BigUint,
    pub portfolio_mark: Option<PortfolioMark>,
    pub alert_count: u64,
}

impl UserStats {
    pub fn empty(address: Address, timestamp: u64) -> Self {
        Self {
            address,
            registered_at: None,
            last_active: timestamp,
            total_portfolio_value: BigUint::default(),
            portfolio_mark: None,
            alert_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceScope {
    /// One balance per `(chain, address)`.
    #[default]
    Chain,
    /// One balance per address, summed over every chain.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BalanceKey {
    pub chain_id: Option<ChainId>,
    pub address: Address,
}

impl BalanceKey {
    pub fn new(scope: BalanceScope, chain_id: ChainId, address: Address) -> Self {
        let chain_id = match scope {
            BalanceScope::Chain => Some(chain_id),
            BalanceScope::Global => None,
        };
        Self { chain_id, address }
    }

    pub fn chain(chain_id: ChainId, address: Address) -> Self {
        Self::new(BalanceScope::Chain, chain_id, address)
    }

    pub fn global(address: Address) -> Self {
        Self {
            chain_id: None,
            address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub key: BalanceKey,
    /// Signed so that inconsistent history stays observable instead of being
    /// clamped at zero.
    pub balance: BigInt,
    pub last_updated: u64,
}

impl TokenBalance {
    pub fn zero(key: BalanceKey, timestamp: u64) -> Self {
        Self {
            key,
            balance: BigInt::default(),
            last_updated: timestamp,
        }
    }
}

/// Key of a single materialized row. Locks and loads are done per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggregateKey {
    User(Address),
    Balance(BalanceKey),
}

/// A set of materialized rows: either a partial snapshot loaded for a
/// handful of keys or the whole view during a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub users: BTreeMap<Address, UserStats>,
    pub balances: BTreeMap<BalanceKey, TokenBalance>,
}

impl Aggregates {
    pub fn user(&self, address: &Address) -> Option<&UserStats> {
        self.users.get(address)
    }

    pub fn balance(&self, key: &BalanceKey) -> Option<&TokenBalance> {
        self.balances.get(key)
    }

    pub fn upsert_users(&mut self, users: impl IntoIterator<Item = UserStats>) {
        for user in users {
            self.users.insert(user.address, user);
        }
    }

    pub fn upsert_balances(&mut self, balances: impl IntoIterator<Item = TokenBalance>) {
        for balance in balances {
            self.balances.insert(balance.key, balance);
        }
    }

    /// Copies the rows for `keys` that exist here.
    pub fn select<'a>(&self, keys: impl IntoIterator<Item = &'a AggregateKey>) -> Self {
        let mut selected = Self::default();
        for key in keys {
            match key {
                AggregateKey::User(address) => {
                    if let Some(user) = self.users.get(address) {
                        selected.users.insert(*address, user.clone());
                    }
                }
                AggregateKey::Balance(balance_key) => {
                    if let Some(balance) = self.balances.get(balance_key) {
                        selected.balances.insert(*balance_key, balance.clone());
                    }
                }
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use pretty_assertions::assert_eq;

    #[test]
    fn global_scope_drops_chain() {
        let holder = address!("0x0000000000000000000000000000000000002222");
        assert_eq!(
            BalanceKey::new(BalanceScope::Global, 10, holder),
            BalanceKey::new(BalanceScope::Global, 137, holder),
        );
        assert_ne!(
            BalanceKey::new(BalanceScope::Chain, 10, holder),
            BalanceKey::new(BalanceScope::Chain, 137, holder),
        );
    }

    #[test]
    fn newer_portfolio_mark_wins_by_timestamp_then_id() {
        let older = PortfolioMark {
            timestamp: 100,
            event_id: EventId::new(137, 900, 0),
        };
        let newer = PortfolioMark {
            timestamp: 101,
            event_id: EventId::new(1, 5, 0),
        };
        let tie = PortfolioMark {
            timestamp: 101,
            event_id: EventId::new(10, 5, 0),
        };
        assert!(newer > older);
        assert!(tie > newer);
    }

    #[test]
    fn select_skips_missing_rows() {
        let user = address!("0x0000000000000000000000000000000000001111");
        let mut aggregates = Aggregates::default();
        aggregates.upsert_users([UserStats::empty(user, 10)]);

        let keys = [
            AggregateKey::User(user),
            AggregateKey::Balance(BalanceKey::chain(1, user)),
        ];
        let selected = aggregates.select(&keys);
        assert_eq!(selected.users.len(), 1);
        assert!(selected.balances.is_empty());
    }
}
