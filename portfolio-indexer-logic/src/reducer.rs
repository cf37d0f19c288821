//! Pure state transitions from a single event record to the rows it touches.

use crate::types::{
    AggregateKey, Aggregates, BalanceKey, BalanceScope, EventRecord, IndexedEvent, PortfolioMark,
    TokenBalance, UserStats,
};
use alloy::primitives::Address;
use num_bigint::BigInt;
use num_traits::Signed;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A transfer left the balance below zero. The value is kept as is.
    BalanceUnderflow { key: BalanceKey, balance: BigInt },
}

/// Result of reducing one event: the record itself plus the full new
/// version of every touched row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub record: EventRecord,
    pub user_stats: Vec<UserStats>,
    pub balances: Vec<TokenBalance>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Rows that reducing `record` reads and writes.
pub fn touched_keys(record: &EventRecord, scope: BalanceScope) -> Vec<AggregateKey> {
    let chain_id = record.id.chain_id;
    match &record.event {
        IndexedEvent::UserRegistered { user }
        | IndexedEvent::PortfolioUpdated { user, .. }
        | IndexedEvent::AlertCreated { user, .. } => vec![AggregateKey::User(*user)],
        IndexedEvent::Transfer { from, to, .. } => {
            let mut keys: Vec<_> = [from, to]
                .into_iter()
                .filter(|address| !address.is_zero())
                .map(|address| AggregateKey::Balance(BalanceKey::new(scope, chain_id, *address)))
                .collect();
            keys.sort();
            keys.dedup();
            keys
        }
        IndexedEvent::Approval { .. } => vec![],
    }
}

/// Applies `record` to `state`, which must contain every existing row for
/// [`touched_keys`]. Missing rows are created.
pub fn reduce(state: &Aggregates, record: EventRecord, scope: BalanceScope) -> Reduction {
    let timestamp = record.block_timestamp;
    let mut user_stats = vec![];
    let mut balances = vec![];
    let mut diagnostics = vec![];

    match &record.event {
        IndexedEvent::UserRegistered { user } => {
            let stats = match state.user(user) {
                Some(existing) => {
                    let mut stats = existing.clone();
                    stats.registered_at.get_or_insert(timestamp);
                    stats.last_active = stats.last_active.max(timestamp);
                    stats
                }
                None => UserStats {
                    registered_at: Some(timestamp),
                    ..UserStats::empty(*user, timestamp)
                },
            };
            user_stats.push(stats);
        }
        IndexedEvent::PortfolioUpdated { user, total_value } => {
            let mut stats = touch_user(state, user, timestamp);
            let mark = PortfolioMark {
                timestamp,
                event_id: record.id,
            };
            if stats.portfolio_mark.is_none_or(|current| mark > current) {
                stats.total_portfolio_value = total_value.clone();
                stats.portfolio_mark = Some(mark);
            }
            user_stats.push(stats);
        }
        IndexedEvent::AlertCreated { user, .. } => {
            let mut stats = touch_user(state, user, timestamp);
            stats.alert_count += 1;
            user_stats.push(stats);
        }
        IndexedEvent::Transfer { from, to, value } => {
            let value = BigInt::from(value.clone());
            let mut touched: BTreeMap<BalanceKey, TokenBalance> = BTreeMap::new();
            let chain_id = record.id.chain_id;
            for (address, delta) in [(from, -value.clone()), (to, value)] {
                if address.is_zero() {
                    continue;
                }
                let key = BalanceKey::new(scope, chain_id, *address);
                let row = touched.entry(key).or_insert_with(|| {
                    state
                        .balance(&key)
                        .cloned()
                        .unwrap_or_else(|| TokenBalance::zero(key, timestamp))
                });
                row.balance += delta;
                row.last_updated = row.last_updated.max(timestamp);
            }
            for row in touched.into_values() {
                if row.balance.is_negative() {
                    diagnostics.push(Diagnostic::BalanceUnderflow {
                        key: row.key,
                        balance: row.balance.clone(),
                    });
                }
                balances.push(row);
            }
        }
        IndexedEvent::Approval { .. } => {}
    }

    Reduction {
        record,
        user_stats,
        balances,
        diagnostics,
    }
}

fn touch_user(state: &Aggregates, user: &Address, timestamp: u64) -> UserStats {
    match state.user(user) {
        Some(existing) => {
            let mut stats = existing.clone();
            stats.last_active = stats.last_active.max(timestamp);
            stats
        }
        None => UserStats::empty(*user, timestamp),
    }
}

/// Rebuilds the whole view by folding records in commit order.
#[derive(Debug, Default)]
pub struct Replayer {
    scope: BalanceScope,
    state: Aggregates,
    diagnostics: Vec<Diagnostic>,
    replayed: u64,
}

impl Replayer {
    pub fn new(scope: BalanceScope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn push(&mut self, record: EventRecord) {
        let reduction = reduce(&self.state, record, self.scope);
        self.state.upsert_users(reduction.user_stats);
        self.state.upsert_balances(reduction.balances);
        self.diagnostics.extend(reduction.diagnostics);
        self.replayed += 1;
    }

    pub fn replayed(&self) -> u64 {
        self.replayed
    }

    pub fn finish(self) -> (Aggregates, Vec<Diagnostic>) {
        (self.state, self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventId;
    use alloy::primitives::{B256, address};
    use num_bigint::BigUint;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const ALICE: Address = address!("0x000000000000000000000000000000000000a11c");
    const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");
    const TOKEN: Address = address!("0x0000000000000000000000000000000000007070");

    fn record(block_number: u64, timestamp: u64, event: IndexedEvent) -> EventRecord {
        EventRecord {
            id: EventId::new(1, block_number, 0),
            transaction_hash: B256::repeat_byte(block_number as u8),
            block_timestamp: timestamp,
            contract: TOKEN,
            event,
        }
    }

    fn transfer(from: Address, to: Address, value: u64) -> IndexedEvent {
        IndexedEvent::Transfer {
            from,
            to,
            value: BigUint::from(value),
        }
    }

    fn replay(records: Vec<EventRecord>) -> (Aggregates, Vec<Diagnostic>) {
        let mut replayer = Replayer::new(BalanceScope::Chain);
        for record in records {
            replayer.push(record);
        }
        replayer.finish()
    }

    fn balance(state: &Aggregates, address: Address) -> Option<BigInt> {
        state
            .balance(&BalanceKey::chain(1, address))
            .map(|row| row.balance.clone())
    }

    #[test]
    fn registration_creates_user() {
        let reduction = reduce(
            &Aggregates::default(),
            record(1, 1_000, IndexedEvent::UserRegistered { user: ALICE }),
            BalanceScope::Chain,
        );
        assert_eq!(
            reduction.user_stats,
            vec![UserStats {
                address: ALICE,
                registered_at: Some(1_000),
                last_active: 1_000,
                total_portfolio_value: BigUint::default(),
                portfolio_mark: None,
                alert_count: 0,
            }]
        );
        assert!(reduction.balances.is_empty());
    }

    #[test]
    fn repeated_registration_keeps_first_timestamp() {
        let (state, _) = replay(vec![
            record(1, 1_000, IndexedEvent::UserRegistered { user: ALICE }),
            record(2, 2_000, IndexedEvent::UserRegistered { user: ALICE }),
        ]);
        let stats = state.user(&ALICE).unwrap();
        assert_eq!(stats.registered_at, Some(1_000));
        assert_eq!(stats.last_active, 2_000);
    }

    #[test]
    fn first_committed_registration_wins_across_chains() {
        let mut earlier_on_other_chain = record(1, 500, IndexedEvent::UserRegistered { user: ALICE });
        earlier_on_other_chain.id = EventId::new(137, 1, 0);
        let (state, _) = replay(vec![
            record(1, 1_000, IndexedEvent::UserRegistered { user: ALICE }),
            earlier_on_other_chain,
        ]);
        let stats = state.user(&ALICE).unwrap();
        assert_eq!(stats.registered_at, Some(1_000));
        assert_eq!(stats.last_active, 1_000);
    }

    #[test]
    fn late_registration_fills_lazily_created_user() {
        let (state, _) = replay(vec![
            record(
                1,
                1_000,
                IndexedEvent::AlertCreated {
                    user: ALICE,
                    alert_id: BigUint::from(1u32),
                },
            ),
            record(2, 1_500, IndexedEvent::UserRegistered { user: ALICE }),
        ]);
        let stats = state.user(&ALICE).unwrap();
        assert_eq!(stats.registered_at, Some(1_500));
        assert_eq!(stats.alert_count, 1);
    }

    #[test]
    fn three_alerts_are_counted() {
        let alerts = (1..=3)
            .map(|i| {
                record(
                    i,
                    1_000 + i,
                    IndexedEvent::AlertCreated {
                        user: ALICE,
                        alert_id: BigUint::from(i),
                    },
                )
            })
            .collect();
        let (state, _) = replay(alerts);
        let stats = state.user(&ALICE).unwrap();
        assert_eq!(stats.alert_count, 3);
        assert_eq!(stats.registered_at, None);
        assert_eq!(stats.last_active, 1_003);
    }

    #[rstest]
    #[case::newer_overwrites(2_000, 20, "20")]
    #[case::older_is_ignored(500, 20, "10")]
    fn portfolio_value_follows_latest_mark(
        #[case] second_timestamp: u64,
        #[case] second_value: u64,
        #[case] expected: &str,
    ) {
        let (state, _) = replay(vec![
            record(
                1,
                1_000,
                IndexedEvent::PortfolioUpdated {
                    user: ALICE,
                    total_value: BigUint::from(10u32),
                },
            ),
            record(
                2,
                second_timestamp,
                IndexedEvent::PortfolioUpdated {
                    user: ALICE,
                    total_value: BigUint::from(second_value),
                },
            ),
        ]);
        let stats = state.user(&ALICE).unwrap();
        assert_eq!(stats.total_portfolio_value.to_string(), expected);
        assert_eq!(stats.last_active, second_timestamp.max(1_000));
    }

    #[test]
    fn last_active_never_decreases() {
        let (state, _) = replay(vec![
            record(1, 5_000, IndexedEvent::UserRegistered { user: ALICE }),
            record(
                2,
                4_000,
                IndexedEvent::AlertCreated {
                    user: ALICE,
                    alert_id: BigUint::from(7u32),
                },
            ),
        ]);
        assert_eq!(state.user(&ALICE).unwrap().last_active, 5_000);
    }

    #[test]
    fn mint_credits_receiver_only() {
        let (state, diagnostics) = replay(vec![record(1, 10, transfer(Address::ZERO, ALICE, 500))]);
        assert_eq!(balance(&state, ALICE), Some(BigInt::from(500)));
        assert_eq!(balance(&state, Address::ZERO), None);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn burn_debits_sender_only() {
        let (state, _) = replay(vec![
            record(1, 10, transfer(Address::ZERO, ALICE, 500)),
            record(2, 20, transfer(ALICE, Address::ZERO, 200)),
        ]);
        assert_eq!(balance(&state, ALICE), Some(BigInt::from(300)));
        assert_eq!(balance(&state, Address::ZERO), None);
    }

    #[test]
    fn transfer_moves_value() {
        let (state, _) = replay(vec![
            record(1, 10, transfer(Address::ZERO, ALICE, 150)),
            record(2, 20, transfer(ALICE, BOB, 100)),
        ]);
        assert_eq!(balance(&state, ALICE), Some(BigInt::from(50)));
        assert_eq!(balance(&state, BOB), Some(BigInt::from(100)));
        let alice = state.balance(&BalanceKey::chain(1, ALICE)).unwrap();
        assert_eq!(alice.last_updated, 20);
    }

    #[test]
    fn self_transfer_nets_to_zero() {
        let reduction = reduce(
            &Aggregates::default(),
            record(1, 10, transfer(ALICE, ALICE, 40)),
            BalanceScope::Chain,
        );
        assert_eq!(reduction.balances.len(), 1);
        assert_eq!(reduction.balances[0].balance, BigInt::from(0));
        assert!(reduction.diagnostics.is_empty());
    }

    #[test]
    fn underflow_is_reported_not_clamped() {
        let reduction = reduce(
            &Aggregates::default(),
            record(1, 10, transfer(ALICE, BOB, 5)),
            BalanceScope::Chain,
        );
        let alice_key = BalanceKey::chain(1, ALICE);
        assert_eq!(
            reduction.diagnostics,
            vec![Diagnostic::BalanceUnderflow {
                key: alice_key,
                balance: BigInt::from(-5),
            }]
        );
        let alice = reduction
            .balances
            .iter()
            .find(|row| row.key == alice_key)
            .unwrap();
        assert_eq!(alice.balance, BigInt::from(-5));
    }

    #[test]
    fn transfers_conserve_supply_except_mint_and_burn() {
        let (state, _) = replay(vec![
            record(1, 10, transfer(Address::ZERO, ALICE, 1_000)),
            record(2, 11, transfer(ALICE, BOB, 300)),
            record(3, 12, transfer(BOB, ALICE, 50)),
            record(4, 13, transfer(BOB, Address::ZERO, 100)),
        ]);
        let total: BigInt = state.balances.values().map(|row| &row.balance).sum();
        assert_eq!(total, BigInt::from(1_000 - 100));
    }

    #[test]
    fn global_scope_merges_chains() {
        let mut on_other_chain = record(2, 20, transfer(Address::ZERO, ALICE, 7));
        on_other_chain.id.chain_id = 137;
        let mut replayer = Replayer::new(BalanceScope::Global);
        replayer.push(record(1, 10, transfer(Address::ZERO, ALICE, 5)));
        replayer.push(on_other_chain);
        let (state, _) = replayer.finish();
        assert_eq!(
            state.balance(&BalanceKey::global(ALICE)).unwrap().balance,
            BigInt::from(12)
        );
    }

    #[test]
    fn approval_touches_nothing() {
        let event = IndexedEvent::Approval {
            owner: ALICE,
            spender: BOB,
            value: BigUint::from(1u32),
        };
        let record = record(1, 10, event);
        assert!(touched_keys(&record, BalanceScope::Chain).is_empty());
        let reduction = reduce(&Aggregates::default(), record, BalanceScope::Chain);
        assert!(reduction.user_stats.is_empty());
        assert!(reduction.balances.is_empty());
    }

    #[test]
    fn transfer_keys_skip_zero_address_and_duplicates() {
        let mint = record(1, 10, transfer(Address::ZERO, ALICE, 1));
        assert_eq!(
            touched_keys(&mint, BalanceScope::Chain),
            vec![AggregateKey::Balance(BalanceKey::chain(1, ALICE))]
        );
        let self_transfer = record(1, 10, transfer(BOB, BOB, 1));
        assert_eq!(touched_keys(&self_transfer, BalanceScope::Chain).len(), 1);
    }
}
