use super::{
    EventFeed, FeedError, FeedItem,
    abi::{IERC20, IPortfolioTracker},
};
use crate::types::{ChainId, EventId, IndexedEvent, RawEvent};
use alloy::{
    network::Ethereum,
    primitives::{Address, B256, U256},
    providers::{DynProvider, Provider as _},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use anyhow::Context;
use async_trait::async_trait;
use num_bigint::BigUint;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct RpcLogFeedConfig {
    pub chain_id: ChainId,
    pub contracts: Vec<Address>,
    pub start_block: u64,
    pub poll_interval: Duration,
    pub batch_size: u64,
    /// Number of recent block hashes kept to detect reorgs.
    pub reorg_window: u64,
}

/// Polls `eth_getLogs` for the configured contracts and decodes the known
/// events.
///
/// Hashes of recently fetched blocks are remembered; when the newest one is
/// no longer canonical the feed walks back to the last matching block and
/// reports a reorg before delivering events of the new branch.
pub struct RpcLogFeed {
    provider: DynProvider<Ethereum>,
    config: RpcLogFeedConfig,
    next_block: u64,
    resume_after: Option<EventId>,
    pending: VecDeque<RawEvent>,
    known_hashes: BTreeMap<u64, B256>,
}

impl RpcLogFeed {
    pub fn new(provider: DynProvider<Ethereum>, config: RpcLogFeedConfig) -> Self {
        Self {
            provider,
            next_block: config.start_block,
            config,
            resume_after: None,
            pending: VecDeque::new(),
            known_hashes: BTreeMap::new(),
        }
    }

    fn filter(&self, from_block: u64, to_block: u64) -> Filter {
        Filter::new()
            .address(self.config.contracts.clone())
            .events([
                IPortfolioTracker::UserRegistered::SIGNATURE,
                IPortfolioTracker::PortfolioUpdated::SIGNATURE,
                IPortfolioTracker::AlertCreated::SIGNATURE,
                IERC20::Transfer::SIGNATURE,
                IERC20::Approval::SIGNATURE,
            ])
            .from_block(from_block)
            .to_block(to_block)
    }

    async fn block_header(&self, number: u64) -> Result<Option<(B256, u64)>, FeedError> {
        let block = self
            .provider
            .get_block_by_number(number.into())
            .await
            .map_err(disconnected)?;
        Ok(block.map(|block| (block.header.hash, block.header.timestamp)))
    }

    /// Returns the last valid block when the remembered head is no longer
    /// canonical.
    async fn detect_reorg(&self) -> Result<Option<u64>, FeedError> {
        let Some((&latest, &latest_hash)) = self.known_hashes.last_key_value() else {
            return Ok(None);
        };
        let canonical = self.block_header(latest).await?.map(|(hash, _)| hash);
        if canonical == Some(latest_hash) {
            return Ok(None);
        }

        let mut canonical_hashes = BTreeMap::new();
        for (&number, &known) in self.known_hashes.iter().rev() {
            let Some((hash, _)) = self.block_header(number).await? else {
                continue;
            };
            canonical_hashes.insert(number, hash);
            if hash == known {
                break;
            }
        }

        let last_valid_block = last_matching_block(&self.known_hashes, &canonical_hashes)
            .unwrap_or_else(|| {
                self.known_hashes
                    .first_key_value()
                    .map(|(number, _)| number.saturating_sub(1))
                    .unwrap_or_default()
            });
        Ok(Some(last_valid_block))
    }

    fn rewind(&mut self, last_valid_block: u64) {
        self.known_hashes.split_off(&(last_valid_block + 1));
        self.pending.clear();
        self.next_block = last_valid_block + 1;
        if self
            .resume_after
            .is_some_and(|resume| resume.block_number > last_valid_block)
        {
            self.resume_after = None;
        }
    }

    async fn fetch_range(&mut self, from_block: u64, to_block: u64) -> Result<(), FeedError> {
        let chain_id = self.config.chain_id;
        let mut logs = self
            .provider
            .get_logs(&self.filter(from_block, to_block))
            .await
            .map_err(disconnected)?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut block_numbers: BTreeSet<u64> =
            logs.iter().filter_map(|log| log.block_number).collect();
        block_numbers.insert(to_block);
        let mut headers = BTreeMap::new();
        for number in block_numbers {
            let header = self.block_header(number).await?.ok_or_else(|| {
                FeedError::Disconnected(format!("block {number} is not available yet"))
            })?;
            headers.insert(number, header);
        }

        let mut events = VecDeque::with_capacity(logs.len());
        for log in &logs {
            let Some((block_hash, timestamp)) =
                log.block_number.and_then(|number| headers.get(&number))
            else {
                tracing::warn!(chain_id, ?log, "log without block number, skipping");
                continue;
            };
            if log.block_hash.is_some_and(|hash| hash != *block_hash) {
                return Err(FeedError::Disconnected(format!(
                    "block {:?} changed while fetching logs",
                    log.block_number
                )));
            }
            match log_to_raw_event(chain_id, log, *timestamp) {
                Ok(Some(event)) => {
                    if self.resume_after.is_none_or(|resume| event.id() > resume) {
                        events.push_back(event);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(chain_id, err = ?err, "failed to decode log, skipping");
                }
            }
        }

        self.known_hashes
            .extend(headers.into_iter().map(|(number, (hash, _))| (number, hash)));
        let floor = to_block.saturating_sub(self.config.reorg_window);
        self.known_hashes = self.known_hashes.split_off(&floor);
        self.pending.extend(events);
        self.next_block = to_block + 1;

        tracing::debug!(
            chain_id,
            from_block,
            to_block,
            logs = logs.len(),
            "fetched log batch"
        );
        Ok(())
    }
}

#[async_trait]
impl EventFeed for RpcLogFeed {
    fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    async fn seek(&mut self, resume_after: Option<EventId>) -> Result<(), FeedError> {
        self.next_block = resume_after
            .map(|id| id.block_number)
            .unwrap_or(self.config.start_block)
            .max(self.config.start_block);
        self.resume_after = resume_after;
        self.pending.clear();
        self.known_hashes.clear();
        tracing::info!(
            chain_id = self.config.chain_id,
            next_block = self.next_block,
            "log feed positioned"
        );
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<FeedItem>, FeedError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(FeedItem::Event(event)));
            }

            if let Some(last_valid_block) = self.detect_reorg().await? {
                tracing::warn!(
                    chain_id = self.config.chain_id,
                    last_valid_block,
                    "chain reorganization detected"
                );
                self.rewind(last_valid_block);
                return Ok(Some(FeedItem::Reorg { last_valid_block }));
            }

            let head = self
                .provider
                .get_block_number()
                .await
                .map_err(disconnected)?;
            if self.next_block > head {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }
            let to_block = head.min(self.next_block + self.config.batch_size.max(1) - 1);
            self.fetch_range(self.next_block, to_block).await?;
        }
    }
}

fn disconnected(err: impl std::fmt::Display) -> FeedError {
    FeedError::Disconnected(err.to_string())
}

/// Greatest block whose remembered hash equals the canonical one.
pub(crate) fn last_matching_block(
    known: &BTreeMap<u64, B256>,
    canonical: &BTreeMap<u64, B256>,
) -> Option<u64> {
    known
        .iter()
        .rev()
        .find(|(number, hash)| canonical.get(number) == Some(hash))
        .map(|(number, _)| *number)
}

fn to_biguint(value: U256) -> BigUint {
    BigUint::from_bytes_be(&value.to_be_bytes::<32>())
}

/// `Ok(None)` for logs of events this indexer does not know.
pub(crate) fn decode_log(log: &Log) -> anyhow::Result<Option<IndexedEvent>> {
    let event = match log.topic0() {
        Some(&IPortfolioTracker::UserRegistered::SIGNATURE_HASH) => {
            let event = log
                .log_decode::<IPortfolioTracker::UserRegistered>()?
                .inner
                .data;
            IndexedEvent::UserRegistered { user: event.user }
        }
        Some(&IPortfolioTracker::PortfolioUpdated::SIGNATURE_HASH) => {
            let event = log
                .log_decode::<IPortfolioTracker::PortfolioUpdated>()?
                .inner
                .data;
            IndexedEvent::PortfolioUpdated {
                user: event.user,
                total_value: to_biguint(event.totalValue),
            }
        }
        Some(&IPortfolioTracker::AlertCreated::SIGNATURE_HASH) => {
            let event = log
                .log_decode::<IPortfolioTracker::AlertCreated>()?
                .inner
                .data;
            IndexedEvent::AlertCreated {
                user: event.user,
                alert_id: to_biguint(event.alertId),
            }
        }
        Some(&IERC20::Transfer::SIGNATURE_HASH) => {
            let event = log.log_decode::<IERC20::Transfer>()?.inner.data;
            IndexedEvent::Transfer {
                from: event.from,
                to: event.to,
                value: to_biguint(event.value),
            }
        }
        Some(&IERC20::Approval::SIGNATURE_HASH) => {
            let event = log.log_decode::<IERC20::Approval>()?.inner.data;
            IndexedEvent::Approval {
                owner: event.owner,
                spender: event.spender,
                value: to_biguint(event.value),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn log_to_raw_event(
    chain_id: ChainId,
    log: &Log,
    block_timestamp: u64,
) -> anyhow::Result<Option<RawEvent>> {
    let Some(event) = decode_log(log)? else {
        return Ok(None);
    };
    Ok(Some(RawEvent {
        chain_id,
        block_number: log.block_number.context("missing block number")?,
        log_index: log.log_index.context("missing log index")?,
        transaction_hash: log
            .transaction_hash
            .context("missing transaction hash")?
            .to_string(),
        block_timestamp: log.block_timestamp.unwrap_or(block_timestamp),
        contract: log.address().to_string(),
        event_name: event.kind().to_string(),
        params: event.to_params(),
    }))
}
