mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::{
    reducer::Diagnostic,
    types::{
        AggregateKey, Aggregates, BalanceKey, BalanceScope, ChainId, EventId, EventPosition,
        EventRecord, TokenBalance, UserStats,
    },
};
use alloy::primitives::Address;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("corrupted row in {table}: {reason}")]
    Corrupted { table: &'static str, reason: String },
    #[error("{column} value {value} does not fit a bigint column")]
    OutOfRange { column: &'static str, value: u64 },
}

impl StoreError {
    pub(crate) fn corrupted(table: &'static str, reason: impl ToString) -> Self {
        Self::Corrupted {
            table,
            reason: reason.to_string(),
        }
    }
}

/// Everything one event writes. Committed atomically or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    pub record: EventRecord,
    pub user_stats: Vec<UserStats>,
    pub balances: Vec<TokenBalance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The record already existed; nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    pub removed_events: u64,
    pub replayed_events: u64,
    pub diagnostics: Vec<Diagnostic>,
}

/// Materialized views plus the event record log.
#[async_trait]
pub trait ViewStore: Send + Sync {
    async fn contains_event(&self, id: &EventId) -> Result<bool, StoreError>;

    /// Greatest committed event id of the chain.
    async fn last_applied(&self, chain_id: ChainId) -> Result<Option<EventId>, StoreError>;

    /// Existing rows for `keys`; missing keys are absent from the result.
    async fn load(&self, keys: &[AggregateKey]) -> Result<Aggregates, StoreError>;

    async fn commit(&self, batch: CommitBatch) -> Result<CommitOutcome, StoreError>;

    /// Removes every record of `chain_id` positioned after `after` and
    /// rebuilds all aggregates by replaying the remaining records in commit
    /// order. Readers observe either the old or the rebuilt view.
    async fn rollback(
        &self,
        chain_id: ChainId,
        after: EventPosition,
        scope: BalanceScope,
    ) -> Result<RollbackSummary, StoreError>;

    async fn user_stats(&self, address: &Address) -> Result<Option<UserStats>, StoreError>;

    async fn token_balance(&self, key: &BalanceKey) -> Result<Option<TokenBalance>, StoreError>;

    /// Records of `chain_id` within `from_block..=to_block`, ordered by id.
    async fn events_in_range(
        &self,
        chain_id: ChainId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, StoreError>;
}
