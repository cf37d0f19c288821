use super::{EventFeed, FeedError, FeedItem};
use crate::types::{ChainId, EventId, RawEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Feed fed by an in-process producer through a bounded channel.
///
/// `seek` cannot rewind the producer; it only filters out events at or before
/// the resume point, which is enough for redelivering producers.
pub struct ChannelFeed {
    chain_id: ChainId,
    receiver: mpsc::Receiver<Result<FeedItem, FeedError>>,
    resume_after: Option<EventId>,
}

#[derive(Clone)]
pub struct ChannelFeedHandle {
    chain_id: ChainId,
    sender: mpsc::Sender<Result<FeedItem, FeedError>>,
}

pub fn channel_feed(chain_id: ChainId, capacity: usize) -> (ChannelFeedHandle, ChannelFeed) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        ChannelFeedHandle { chain_id, sender },
        ChannelFeed {
            chain_id,
            receiver,
            resume_after: None,
        },
    )
}

impl ChannelFeedHandle {
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Returns `false` once the feed side is dropped.
    pub async fn send_event(&self, event: RawEvent) -> bool {
        self.sender.send(Ok(FeedItem::Event(event))).await.is_ok()
    }

    pub async fn send_reorg(&self, last_valid_block: u64) -> bool {
        self.sender
            .send(Ok(FeedItem::Reorg { last_valid_block }))
            .await
            .is_ok()
    }

    pub async fn disconnect(&self, reason: impl Into<String>) -> bool {
        self.sender
            .send(Err(FeedError::Disconnected(reason.into())))
            .await
            .is_ok()
    }
}

#[async_trait]
impl EventFeed for ChannelFeed {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn seek(&mut self, resume_after: Option<EventId>) -> Result<(), FeedError> {
        self.resume_after = resume_after;
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<FeedItem>, FeedError> {
        loop {
            match self.receiver.recv().await {
                None => return Ok(None),
                Some(Err(err)) => return Err(err),
                Some(Ok(FeedItem::Event(event)))
                    if self.resume_after.is_some_and(|resume| event.id() <= resume) =>
                {
                    continue;
                }
                Some(Ok(FeedItem::Reorg { last_valid_block })) => {
                    if self
                        .resume_after
                        .is_some_and(|resume| resume.block_number > last_valid_block)
                    {
                        self.resume_after = None;
                    }
                    return Ok(Some(FeedItem::Reorg { last_valid_block }));
                }
                Some(Ok(item)) => return Ok(Some(item)),
            }
        }
    }
}
