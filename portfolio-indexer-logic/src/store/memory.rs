use super::{CommitBatch, CommitOutcome, RollbackSummary, StoreError, ViewStore};
use crate::{
    reducer::Replayer,
    types::{
        AggregateKey, Aggregates, BalanceKey, BalanceScope, ChainId, EventId, EventPosition,
        EventRecord, TokenBalance, UserStats,
    },
};
use alloy::primitives::Address;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct State {
    /// Commit order.
    records: Vec<EventRecord>,
    ids: HashSet<EventId>,
    heads: HashMap<ChainId, EventId>,
    aggregates: Aggregates,
}

impl State {
    fn reindex(&mut self) {
        self.ids = self.records.iter().map(|record| record.id).collect();
        self.heads.clear();
        for record in &self.records {
            let head = self.heads.entry(record.id.chain_id).or_insert(record.id);
            *head = (*head).max(record.id);
        }
    }
}

/// View store kept entirely in process memory behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every aggregate row.
    pub fn snapshot(&self) -> Aggregates {
        self.state.read().aggregates.clone()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.state.read().records.clone()
    }
}

#[async_trait]
impl ViewStore for MemoryStore {
    async fn contains_event(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.state.read().ids.contains(id))
    }

    async fn last_applied(&self, chain_id: ChainId) -> Result<Option<EventId>, StoreError> {
        Ok(self.state.read().heads.get(&chain_id).copied())
    }

    async fn load(&self, keys: &[AggregateKey]) -> Result<Aggregates, StoreError> {
        Ok(self.state.read().aggregates.select(keys))
    }

    async fn commit(&self, batch: CommitBatch) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.write();
        let id = batch.record.id;
        if !state.ids.insert(id) {
            return Ok(CommitOutcome::Duplicate);
        }
        let head = state.heads.entry(id.chain_id).or_insert(id);
        *head = (*head).max(id);
        state.records.push(batch.record);
        state.aggregates.upsert_users(batch.user_stats);
        state.aggregates.upsert_balances(batch.balances);
        Ok(CommitOutcome::Committed)
    }

    async fn rollback(
        &self,
        chain_id: ChainId,
        after: EventPosition,
        scope: BalanceScope,
    ) -> Result<RollbackSummary, StoreError> {
        let mut state = self.state.write();
        let before = state.records.len();
        state
            .records
            .retain(|record| record.id.chain_id != chain_id || record.id.position() <= after);
        let removed_events = (before - state.records.len()) as u64;
        state.reindex();

        let mut replayer = Replayer::new(scope);
        for record in &state.records {
            replayer.push(record.clone());
        }
        let replayed_events = replayer.replayed();
        let (aggregates, diagnostics) = replayer.finish();
        state.aggregates = aggregates;

        Ok(RollbackSummary {
            removed_events,
            replayed_events,
            diagnostics,
        })
    }

    async fn user_stats(&self, address: &Address) -> Result<Option<UserStats>, StoreError> {
        Ok(self.state.read().aggregates.user(address).cloned())
    }

    async fn token_balance(&self, key: &BalanceKey) -> Result<Option<TokenBalance>, StoreError> {
        Ok(self.state.read().aggregates.balance(key).cloned())
    }

    async fn events_in_range(
        &self,
        chain_id: ChainId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let state = self.state.read();
        let mut records: Vec<_> = state
            .records
            .iter()
            .filter(|record| {
                record.id.chain_id == chain_id
                    && (from_block..=to_block).contains(&record.id.block_number)
            })
            .cloned()
            .collect();
        records.sort_by_key(|record| record.id);
        Ok(records)
    }
}
