use crate::{
    error::IngestError,
    feed::{EventFeed, FeedError, FeedItem},
    indexer::{ApplyOutcome, Indexer},
    settings::{IndexerSettings, RetrySettings},
    types::{ChainId, RawEvent},
};
use backon::Retryable;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    FeedExhausted,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub reconnect_interval: Duration,
    pub commit_retry: RetrySettings,
}

impl From<&IndexerSettings> for WorkerSettings {
    fn from(settings: &IndexerSettings) -> Self {
        Self {
            reconnect_interval: settings.reconnect_interval,
            commit_retry: settings.commit_retry.clone(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5),
            commit_retry: RetrySettings::default(),
        }
    }
}

/// Drives one chain feed into the shared indexer until cancelled, the feed
/// ends or a fatal error occurs.
pub struct ChainWorker<F> {
    indexer: Arc<Indexer>,
    feed: F,
    settings: WorkerSettings,
}

impl<F: EventFeed> ChainWorker<F> {
    pub fn new(indexer: Arc<Indexer>, feed: F, settings: WorkerSettings) -> Self {
        Self {
            indexer,
            feed,
            settings,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.feed.chain_id()
    }

    /// Cancellation is only observed while waiting for the feed or between
    /// retries; an event that is being committed always finishes.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<WorkerExit, IngestError> {
        let chain_id = self.chain_id();
        tracing::info!(chain_id, "starting chain worker");

        if let Err(err) = self.resume().await {
            if !self.reconnect(err, &cancel).await? {
                return Ok(WorkerExit::Cancelled);
            }
        }

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(chain_id, "chain worker cancelled");
                    return Ok(WorkerExit::Cancelled);
                }
                item = self.feed.next() => item,
            };

            match item {
                Ok(Some(FeedItem::Event(event))) => {
                    if event.chain_id != chain_id {
                        tracing::error!(
                            chain_id,
                            event_chain_id = event.chain_id,
                            event_id = %event.id(),
                            "feed delivered an event of another chain, skipping"
                        );
                        continue;
                    }
                    match self.apply_with_retry(&event, &cancel).await {
                        Ok(_) => {}
                        Err(err @ IngestError::OutOfOrder { .. }) => {
                            tracing::error!(chain_id, err = %err, "skipping out-of-order event");
                        }
                        Err(err) if err.is_retryable() && cancel.is_cancelled() => {
                            tracing::info!(chain_id, err = %err, "chain worker cancelled while retrying");
                            return Ok(WorkerExit::Cancelled);
                        }
                        Err(err) => {
                            tracing::error!(chain_id, err = ?err, "failed to apply event, stopping chain worker");
                            return Err(err);
                        }
                    }
                }
                Ok(Some(FeedItem::Reorg { last_valid_block })) => {
                    self.rollback_with_retry(last_valid_block, &cancel)
                        .await
                        .inspect_err(|err| {
                            tracing::error!(chain_id, last_valid_block, err = ?err, "failed to roll back reorg, stopping chain worker")
                        })?;
                }
                Ok(None) => {
                    tracing::warn!(chain_id, "feed exhausted, stopping chain worker");
                    return Ok(WorkerExit::FeedExhausted);
                }
                Err(err) => {
                    if !self.reconnect(err, &cancel).await? {
                        return Ok(WorkerExit::Cancelled);
                    }
                }
            }
        }
    }

    async fn resume(&mut self) -> Result<(), FeedError> {
        let chain_id = self.chain_id();
        let resume_after = match self.indexer.last_committed(chain_id).await {
            Ok(resume_after) => resume_after,
            Err(err) => return Err(FeedError::Disconnected(err.to_string())),
        };
        tracing::info!(chain_id, resume_after = ?resume_after, "resuming feed");
        self.feed.seek(resume_after).await
    }

    /// Waits and repositions the feed after the last committed event until it
    /// succeeds. Returns `false` when cancelled meanwhile.
    async fn reconnect(
        &mut self,
        mut err: FeedError,
        cancel: &CancellationToken,
    ) -> Result<bool, IngestError> {
        let chain_id = self.chain_id();
        loop {
            tracing::warn!(
                chain_id,
                err = %err,
                retry_in = ?self.settings.reconnect_interval,
                "feed unavailable, reconnecting"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
            }
            self.indexer.reset_cursor(chain_id).await;
            match self.resume().await {
                Ok(()) => return Ok(true),
                Err(next) => err = next,
            }
        }
    }

    async fn apply_with_retry(
        &self,
        event: &RawEvent,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, IngestError> {
        let chain_id = event.chain_id;
        (|| async { self.indexer.apply(event).await })
            .retry(self.settings.commit_retry.backoff())
            .sleep(tokio::time::sleep)
            .when(|err: &IngestError| err.is_retryable() && !cancel.is_cancelled())
            .notify(|err: &IngestError, delay: Duration| {
                self.indexer.record_commit_retry(chain_id);
                tracing::warn!(
                    chain_id,
                    event_id = %event.id(),
                    err = %err,
                    retry_in = ?delay,
                    "failed to apply event, retrying"
                );
            })
            .await
    }

    async fn rollback_with_retry(
        &self,
        last_valid_block: u64,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let chain_id = self.chain_id();
        (|| async {
            self.indexer
                .rollback_to_block(chain_id, last_valid_block)
                .await
        })
        .retry(self.settings.commit_retry.backoff())
        .sleep(tokio::time::sleep)
        .when(|err: &IngestError| err.is_retryable() && !cancel.is_cancelled())
        .notify(|err: &IngestError, delay: Duration| {
            tracing::warn!(
                chain_id,
                last_valid_block,
                err = %err,
                retry_in = ?delay,
                "failed to roll back reorg, retrying"
            );
        })
        .await?;
        Ok(())
    }
}
