pub mod abi;
mod channel;
mod rpc;

pub use channel::{ChannelFeed, ChannelFeedHandle, channel_feed};
pub use rpc::{RpcLogFeed, RpcLogFeedConfig};

use crate::types::{ChainId, EventId, RawEvent};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Event(RawEvent),
    /// Blocks after `last_valid_block` were replaced; their events must be
    /// rolled back. Events from the new branch follow.
    Reorg { last_valid_block: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("feed disconnected: {0}")]
    Disconnected(String),
}

/// Totally ordered source of events for a single chain.
#[async_trait]
pub trait EventFeed: Send {
    fn chain_id(&self) -> ChainId;

    /// Restarts delivery right after `resume_after`, or from the configured
    /// beginning when `None`.
    async fn seek(&mut self, resume_after: Option<EventId>) -> Result<(), FeedError>;

    /// `Ok(None)` means the feed is exhausted and will never yield again.
    async fn next(&mut self) -> Result<Option<FeedItem>, FeedError>;
}
