use crate::{
    error::IngestError,
    locks::KeyLocks,
    metrics,
    reducer::{self, Diagnostic},
    registry::HandlerRegistry,
    store::{CommitBatch, CommitOutcome, RollbackSummary, ViewStore},
    types::{
        BalanceScope, ChainId, DecodeError, EventId, EventPosition, EventRecord, RawEvent,
        parse_contract,
    },
};
use dashmap::DashMap;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { diagnostics: Vec<Diagnostic> },
    /// Already applied earlier; nothing changed.
    Duplicate,
    /// No handler is registered for the contract and event name.
    Ignored,
    /// Registered, but the parameters could not be decoded. The event is
    /// skipped so the stream can continue.
    Malformed(DecodeError),
}

impl ApplyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied { .. } => "applied",
            ApplyOutcome::Duplicate => "duplicate",
            ApplyOutcome::Ignored => "ignored",
            ApplyOutcome::Malformed(_) => "malformed",
        }
    }
}

/// Point-in-time counters of the indexer, since process start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexerStatus {
    pub applied: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub out_of_order: u64,
    pub balance_underflows: u64,
    pub commit_retries: u64,
    pub reorgs: u64,
    /// Last processed event per chain.
    pub cursors: BTreeMap<ChainId, EventId>,
}

#[derive(Debug, Default)]
struct StatusCounters {
    applied: AtomicU64,
    duplicates: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
    out_of_order: AtomicU64,
    balance_underflows: AtomicU64,
    commit_retries: AtomicU64,
    reorgs: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Last processed position of a chain. Also advanced by ignored and malformed
/// events, which are never persisted.
#[derive(Debug, Default)]
struct ChainCursor {
    loaded: bool,
    last: Option<EventId>,
}

/// Applies events from any number of chains to a single view store.
///
/// Events of one chain are serialized by a per-chain mutex. Events of
/// different chains run concurrently and only contend on the aggregate keys
/// they share. A rollback excludes every apply for its whole duration.
pub struct Indexer {
    store: Arc<dyn ViewStore>,
    registry: HandlerRegistry,
    balance_scope: BalanceScope,
    max_reorg_depth: u64,
    chains: DashMap<ChainId, Arc<Mutex<ChainCursor>>>,
    heads: DashMap<ChainId, EventId>,
    key_locks: KeyLocks,
    rebuild: RwLock<()>,
    counters: StatusCounters,
}

impl Indexer {
    pub fn new(store: Arc<dyn ViewStore>, registry: HandlerRegistry) -> Self {
        Self {
            store,
            registry,
            balance_scope: BalanceScope::default(),
            max_reorg_depth: 64,
            chains: DashMap::new(),
            heads: DashMap::new(),
            key_locks: KeyLocks::new(),
            rebuild: RwLock::new(()),
            counters: StatusCounters::default(),
        }
    }

    pub fn with_balance_scope(mut self, balance_scope: BalanceScope) -> Self {
        self.balance_scope = balance_scope;
        self
    }

    pub fn with_max_reorg_depth(mut self, max_reorg_depth: u64) -> Self {
        self.max_reorg_depth = max_reorg_depth;
        self
    }

    pub fn store(&self) -> &Arc<dyn ViewStore> {
        &self.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn balance_scope(&self) -> BalanceScope {
        self.balance_scope
    }

    fn cursor(&self, chain_id: ChainId) -> Arc<Mutex<ChainCursor>> {
        self.chains.entry(chain_id).or_default().clone()
    }

    async fn load_cursor(
        &self,
        cursor: &mut ChainCursor,
        chain_id: ChainId,
    ) -> Result<Option<EventId>, IngestError> {
        if !cursor.loaded {
            cursor.last = self.store.last_applied(chain_id).await?;
            cursor.loaded = true;
            self.publish_cursor(chain_id, cursor.last);
        }
        Ok(cursor.last)
    }

    fn advance(&self, cursor: &mut ChainCursor, id: EventId) {
        cursor.last = Some(id);
        self.publish_cursor(id.chain_id, Some(id));
    }

    fn publish_cursor(&self, chain_id: ChainId, last: Option<EventId>) {
        match last {
            Some(id) => {
                self.heads.insert(chain_id, id);
                metrics::CHAIN_CURSOR
                    .with_label_values(&[&chain_id.to_string()])
                    .set(id.block_number as i64);
            }
            None => {
                self.heads.remove(&chain_id);
            }
        }
    }

    /// Dedup, order check, dispatch, decode, reduce and commit a single
    /// event.
    pub async fn apply(&self, event: &RawEvent) -> Result<ApplyOutcome, IngestError> {
        let chain_id = event.chain_id;
        let chain_label = chain_id.to_string();
        let timer = metrics::APPLY_DURATION_SECONDS
            .with_label_values(&[&chain_label])
            .start_timer();

        let cursor = self.cursor(chain_id);
        let mut cursor = cursor.lock().await;
        let result = self.apply_locked(&mut cursor, event).await;
        drop(cursor);
        timer.observe_duration();

        match &result {
            Ok(outcome) => self.record_outcome(chain_id, event.id(), outcome),
            Err(IngestError::OutOfOrder { .. }) => {
                bump(&self.counters.out_of_order, 1);
                metrics::EVENTS_TOTAL
                    .with_label_values(&[&chain_label, "out_of_order"])
                    .inc();
            }
            Err(_) => {}
        }
        result
    }

    async fn apply_locked(
        &self,
        cursor: &mut ChainCursor,
        event: &RawEvent,
    ) -> Result<ApplyOutcome, IngestError> {
        let chain_id = event.chain_id;
        let id = event.id();

        let last = self.load_cursor(cursor, chain_id).await?;
        if last == Some(id) {
            return Ok(ApplyOutcome::Duplicate);
        }

        let resolved = self.resolve(event);
        if let Some(last) = last.filter(|last| id < *last) {
            // Ignored and malformed events are never persisted, so an earlier
            // one carries no state that could be reordered.
            if resolved.is_err() || self.store.contains_event(&id).await? {
                return Ok(ApplyOutcome::Duplicate);
            }
            return Err(IngestError::OutOfOrder {
                chain_id,
                event: id,
                last,
            });
        }

        let record = match resolved {
            Ok(record) => record,
            Err(outcome) => {
                self.advance(cursor, id);
                return Ok(outcome);
            }
        };

        let _rebuild = self.rebuild.read().await;
        let keys = reducer::touched_keys(&record, self.balance_scope);
        let _guards = self.key_locks.lock(keys.clone()).await;
        let state = self.store.load(&keys).await?;
        let reduction = reducer::reduce(&state, record, self.balance_scope);
        let outcome = self
            .store
            .commit(CommitBatch {
                record: reduction.record,
                user_stats: reduction.user_stats,
                balances: reduction.balances,
            })
            .await?;
        self.advance(cursor, id);

        Ok(match outcome {
            CommitOutcome::Committed => ApplyOutcome::Applied {
                diagnostics: reduction.diagnostics,
            },
            CommitOutcome::Duplicate => ApplyOutcome::Duplicate,
        })
    }

    /// Dispatches and decodes an event without touching any state. Events
    /// that are not applied come back as their final outcome.
    fn resolve(&self, event: &RawEvent) -> Result<EventRecord, ApplyOutcome> {
        let contract = parse_contract(&event.contract).map_err(ApplyOutcome::Malformed)?;
        let kind = self
            .registry
            .resolve(event.chain_id, &contract, &event.event_name)
            .ok_or(ApplyOutcome::Ignored)?;
        EventRecord::decode(event, kind).map_err(ApplyOutcome::Malformed)
    }

    fn record_outcome(&self, chain_id: ChainId, id: EventId, outcome: &ApplyOutcome) {
        let chain_label = chain_id.to_string();
        metrics::EVENTS_TOTAL
            .with_label_values(&[&chain_label, outcome.label()])
            .inc();
        match outcome {
            ApplyOutcome::Applied { diagnostics } => {
                bump(&self.counters.applied, 1);
                self.report_diagnostics(chain_id, Some(id), diagnostics);
                tracing::debug!(chain_id, event_id = %id, "applied event");
            }
            ApplyOutcome::Duplicate => {
                bump(&self.counters.duplicates, 1);
                tracing::debug!(chain_id, event_id = %id, "skipped duplicate event");
            }
            ApplyOutcome::Ignored => {
                bump(&self.counters.ignored, 1);
                tracing::trace!(chain_id, event_id = %id, "no handler registered for event");
            }
            ApplyOutcome::Malformed(err) => {
                bump(&self.counters.malformed, 1);
                tracing::warn!(chain_id, event_id = %id, err = %err, "skipped malformed event");
            }
        }
    }

    fn report_diagnostics(
        &self,
        chain_id: ChainId,
        event_id: Option<EventId>,
        diagnostics: &[Diagnostic],
    ) {
        for diagnostic in diagnostics {
            match diagnostic {
                Diagnostic::BalanceUnderflow { key, balance } => {
                    bump(&self.counters.balance_underflows, 1);
                    metrics::BALANCE_UNDERFLOWS_TOTAL
                        .with_label_values(&[&chain_id.to_string()])
                        .inc();
                    tracing::warn!(
                        chain_id,
                        event_id = ?event_id,
                        address = %key.address,
                        balance = %balance,
                        "token balance went negative"
                    );
                }
            }
        }
    }

    /// Drops every event of `chain_id` after `last_valid_block` and rebuilds
    /// all aggregates from the remaining records.
    pub async fn rollback_to_block(
        &self,
        chain_id: ChainId,
        last_valid_block: u64,
    ) -> Result<RollbackSummary, IngestError> {
        let cursor = self.cursor(chain_id);
        let mut cursor = cursor.lock().await;

        let head = self
            .load_cursor(&mut cursor, chain_id)
            .await?
            .map(|id| id.block_number);
        let Some(head) = head.filter(|head| *head > last_valid_block) else {
            tracing::debug!(
                chain_id,
                last_valid_block,
                "nothing indexed after reorg point, skipping rollback"
            );
            return Ok(RollbackSummary::default());
        };
        if head - last_valid_block > self.max_reorg_depth {
            return Err(IngestError::ReorgBeyondWatermark {
                chain_id,
                last_valid_block,
                head,
                max_depth: self.max_reorg_depth,
            });
        }

        let summary = {
            let _rebuild = self.rebuild.write().await;
            self.store
                .rollback(
                    chain_id,
                    EventPosition::end_of_block(last_valid_block),
                    self.balance_scope,
                )
                .await?
        };

        cursor.loaded = false;
        self.load_cursor(&mut cursor, chain_id).await?;

        bump(&self.counters.reorgs, 1);
        metrics::REORGS_TOTAL
            .with_label_values(&[&chain_id.to_string()])
            .inc();
        self.report_diagnostics(chain_id, None, &summary.diagnostics);
        tracing::info!(
            chain_id,
            last_valid_block,
            head,
            removed_events = summary.removed_events,
            replayed_events = summary.replayed_events,
            "rolled back chain reorganization"
        );
        Ok(summary)
    }

    /// Forgets the in-memory cursor so the next event reloads it from the
    /// store.
    pub async fn reset_cursor(&self, chain_id: ChainId) {
        let cursor = self.cursor(chain_id);
        let mut cursor = cursor.lock().await;
        cursor.loaded = false;
        cursor.last = None;
    }

    /// Last event of the chain that is persisted in the store.
    pub async fn last_committed(&self, chain_id: ChainId) -> Result<Option<EventId>, IngestError> {
        Ok(self.store.last_applied(chain_id).await?)
    }

    pub fn record_commit_retry(&self, chain_id: ChainId) {
        bump(&self.counters.commit_retries, 1);
        metrics::COMMIT_RETRIES_TOTAL
            .with_label_values(&[&chain_id.to_string()])
            .inc();
    }

    pub fn status(&self) -> IndexerStatus {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        IndexerStatus {
            applied: load(&self.counters.applied),
            duplicates: load(&self.counters.duplicates),
            ignored: load(&self.counters.ignored),
            malformed: load(&self.counters.malformed),
            out_of_order: load(&self.counters.out_of_order),
            balance_underflows: load(&self.counters.balance_underflows),
            commit_retries: load(&self.counters.commit_retries),
            reorgs: load(&self.counters.reorgs),
            cursors: self
                .heads
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::ContractKind,
        store::MemoryStore,
        test_utils::{self, PORTFOLIO_CONTRACT, TOKEN_CONTRACT},
        types::{BalanceKey, Params},
    };
    use alloy::primitives::{Address, address};
    use num_bigint::BigInt;
    use pretty_assertions::assert_eq;

    const ALICE: Address = address!("0x000000000000000000000000000000000000a11c");
    const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");

    fn indexer() -> (Arc<MemoryStore>, Indexer) {
        let mut registry = HandlerRegistry::new();
        for chain_id in [1, 137] {
            registry
                .register(chain_id, PORTFOLIO_CONTRACT, "tracker", ContractKind::Portfolio)
                .unwrap();
            registry
                .register(chain_id, TOKEN_CONTRACT, "token", ContractKind::Token)
                .unwrap();
        }
        let store = Arc::new(MemoryStore::new());
        let indexer = Indexer::new(store.clone(), registry).with_max_reorg_depth(10);
        (store, indexer)
    }

    #[tokio::test]
    async fn applies_and_deduplicates() {
        let (store, indexer) = indexer();
        let mint = test_utils::transfer(1, 1, 0, Address::ZERO, ALICE, 150).to_raw();

        let outcome = indexer.apply(&mint).await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                diagnostics: vec![]
            }
        );
        assert_eq!(indexer.apply(&mint).await.unwrap(), ApplyOutcome::Duplicate);

        let balance = store
            .token_balance(&BalanceKey::chain(1, ALICE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(balance.balance, BigInt::from(150));
        assert_eq!(store.records().len(), 1);

        let status = indexer.status();
        assert_eq!(status.applied, 1);
        assert_eq!(status.duplicates, 1);
        assert_eq!(status.cursors.get(&1), Some(&EventId::new(1, 1, 0)));
    }

    #[tokio::test]
    async fn rejects_events_behind_the_cursor() {
        let (_, indexer) = indexer();
        let later = test_utils::alert(1, 5, 0, ALICE, 1).to_raw();
        let earlier = test_utils::alert(1, 4, 0, ALICE, 2).to_raw();

        indexer.apply(&later).await.unwrap();
        let err = indexer.apply(&earlier).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::OutOfOrder { event, last, .. }
                if event == EventId::new(1, 4, 0) && last == EventId::new(1, 5, 0)
        ));
        assert!(!err.is_retryable());
        assert_eq!(indexer.status().out_of_order, 1);
    }

    #[tokio::test]
    async fn ignores_unregistered_events() {
        let (store, indexer) = indexer();
        let mut foreign = test_utils::transfer(1, 1, 0, Address::ZERO, ALICE, 1).to_raw();
        foreign.contract = BOB.to_string();
        assert_eq!(indexer.apply(&foreign).await.unwrap(), ApplyOutcome::Ignored);

        let mut wrong_interface = test_utils::registered(1, 2, 0, ALICE).to_raw();
        wrong_interface.contract = TOKEN_CONTRACT.to_string();
        assert_eq!(
            indexer.apply(&wrong_interface).await.unwrap(),
            ApplyOutcome::Ignored
        );

        assert!(store.records().is_empty());
        assert_eq!(indexer.status().ignored, 2);
        assert_eq!(indexer.apply(&wrong_interface).await.unwrap(), ApplyOutcome::Duplicate);
    }

    #[tokio::test]
    async fn redelivered_skipped_events_are_duplicates() {
        let (store, indexer) = indexer();
        let mut first = test_utils::transfer(1, 2, 0, Address::ZERO, ALICE, 1).to_raw();
        first.contract = BOB.to_string();
        let mut second = test_utils::transfer(1, 3, 0, Address::ZERO, ALICE, 1).to_raw();
        second.contract = BOB.to_string();
        let mut broken = test_utils::registered(1, 4, 0, ALICE).to_raw();
        broken.params = Params::new().with("account", ALICE);

        assert_eq!(indexer.apply(&first).await.unwrap(), ApplyOutcome::Ignored);
        assert_eq!(indexer.apply(&second).await.unwrap(), ApplyOutcome::Ignored);
        assert!(matches!(
            indexer.apply(&broken).await.unwrap(),
            ApplyOutcome::Malformed(_)
        ));

        assert_eq!(indexer.apply(&first).await.unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(indexer.apply(&second).await.unwrap(), ApplyOutcome::Duplicate);

        let status = indexer.status();
        assert_eq!(status.out_of_order, 0);
        assert_eq!(status.duplicates, 2);
        assert!(store.records().is_empty());

        // A registered event behind the cursor is still out of order.
        let late = test_utils::registered(1, 1, 0, ALICE).to_raw();
        assert!(matches!(
            indexer.apply(&late).await,
            Err(IngestError::OutOfOrder { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_events_do_not_block_the_stream() {
        let (store, indexer) = indexer();
        let mut broken = test_utils::registered(1, 1, 0, ALICE).to_raw();
        broken.params = Params::new().with("account", ALICE);

        assert_eq!(
            indexer.apply(&broken).await.unwrap(),
            ApplyOutcome::Malformed(DecodeError::MissingParam("user".to_string()))
        );
        let next = test_utils::registered(1, 2, 0, ALICE).to_raw();
        assert!(matches!(
            indexer.apply(&next).await.unwrap(),
            ApplyOutcome::Applied { .. }
        ));
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn reports_balance_underflow() {
        let (store, indexer) = indexer();
        let overdraft = test_utils::transfer(1, 1, 0, ALICE, BOB, 5).to_raw();
        let outcome = indexer.apply(&overdraft).await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                diagnostics: vec![Diagnostic::BalanceUnderflow {
                    key: BalanceKey::chain(1, ALICE),
                    balance: BigInt::from(-5),
                }]
            }
        );
        assert_eq!(indexer.status().balance_underflows, 1);
        let alice = store
            .token_balance(&BalanceKey::chain(1, ALICE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice.balance, BigInt::from(-5));
    }

    #[tokio::test]
    async fn rollback_beyond_watermark_is_refused() {
        let (_, indexer) = indexer();
        indexer
            .apply(&test_utils::alert(1, 100, 0, ALICE, 1).to_raw())
            .await
            .unwrap();
        let err = indexer.rollback_to_block(1, 50).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::ReorgBeyondWatermark {
                head: 100,
                last_valid_block: 50,
                max_depth: 10,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rollback_resets_cursor_for_redelivery() {
        let (store, indexer) = indexer();
        for block in 1..=4 {
            indexer
                .apply(&test_utils::alert(1, block, 0, ALICE, block).to_raw())
                .await
                .unwrap();
        }
        let summary = indexer.rollback_to_block(1, 2).await.unwrap();
        assert_eq!(summary.removed_events, 2);
        assert_eq!(store.user_stats(&ALICE).await.unwrap().unwrap().alert_count, 2);

        let redelivered = test_utils::alert(1, 3, 0, ALICE, 3).to_raw();
        assert!(matches!(
            indexer.apply(&redelivered).await.unwrap(),
            ApplyOutcome::Applied { .. }
        ));
        assert_eq!(store.user_stats(&ALICE).await.unwrap().unwrap().alert_count, 3);
        assert_eq!(indexer.status().reorgs, 1);
    }
}
