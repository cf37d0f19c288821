use crate::{
    reducer,
    store::{CommitBatch, CommitOutcome, ViewStore},
    types::{BalanceScope, ChainId, EventId, EventRecord, IndexedEvent},
};
use alloy::primitives::{Address, B256, address};
use blockscout_service_launcher::test_database::TestDbGuard;
use num_bigint::BigUint;

pub const PORTFOLIO_CONTRACT: Address = address!("0x0000000000000000000000000000000000000c01");
pub const TOKEN_CONTRACT: Address = address!("0x0000000000000000000000000000000000007070");

pub async fn init_db(name: &str) -> TestDbGuard {
    TestDbGuard::new::<migration::Migrator>(name).await
}

/// Block timestamps in tests grow with the block number.
pub fn timestamp(block_number: u64) -> u64 {
    1_700_000_000 + block_number * 12
}

fn record(
    chain_id: ChainId,
    block_number: u64,
    log_index: u64,
    contract: Address,
    event: IndexedEvent,
) -> EventRecord {
    EventRecord {
        id: EventId::new(chain_id, block_number, log_index),
        transaction_hash: B256::left_padding_from(&block_number.to_be_bytes()),
        block_timestamp: timestamp(block_number),
        contract,
        event,
    }
}

pub fn registered(chain_id: ChainId, block_number: u64, log_index: u64, user: Address) -> EventRecord {
    record(
        chain_id,
        block_number,
        log_index,
        PORTFOLIO_CONTRACT,
        IndexedEvent::UserRegistered { user },
    )
}

pub fn portfolio(
    chain_id: ChainId,
    block_number: u64,
    log_index: u64,
    user: Address,
    total_value: &str,
) -> EventRecord {
    let total_value = total_value.parse::<BigUint>().expect("invalid test value");
    record(
        chain_id,
        block_number,
        log_index,
        PORTFOLIO_CONTRACT,
        IndexedEvent::PortfolioUpdated { user, total_value },
    )
}

pub fn alert(
    chain_id: ChainId,
    block_number: u64,
    log_index: u64,
    user: Address,
    alert_id: u64,
) -> EventRecord {
    record(
        chain_id,
        block_number,
        log_index,
        PORTFOLIO_CONTRACT,
        IndexedEvent::AlertCreated {
            user,
            alert_id: BigUint::from(alert_id),
        },
    )
}

pub fn transfer(
    chain_id: ChainId,
    block_number: u64,
    log_index: u64,
    from: Address,
    to: Address,
    value: u64,
) -> EventRecord {
    record(
        chain_id,
        block_number,
        log_index,
        TOKEN_CONTRACT,
        IndexedEvent::Transfer {
            from,
            to,
            value: BigUint::from(value),
        },
    )
}

/// Loads, reduces and commits `record` without any locking.
pub async fn commit_reduced(
    store: &dyn ViewStore,
    record: EventRecord,
    scope: BalanceScope,
) -> CommitOutcome {
    let keys = reducer::touched_keys(&record, scope);
    let state = store.load(&keys).await.expect("load failed");
    let reduction = reducer::reduce(&state, record, scope);
    store
        .commit(CommitBatch {
            record: reduction.record,
            user_stats: reduction.user_stats,
            balances: reduction.balances,
        })
        .await
        .expect("commit failed")
}
