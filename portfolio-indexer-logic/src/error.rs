use crate::{
    store::StoreError,
    types::{ChainId, EventId},
};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("event {event} on chain {chain_id} arrived after {last}")]
    OutOfOrder {
        chain_id: ChainId,
        event: EventId,
        last: EventId,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(
        "reorg on chain {chain_id} back to block {last_valid_block} is deeper than {max_depth} blocks below head {head}"
    )]
    ReorgBeyondWatermark {
        chain_id: ChainId,
        last_valid_block: u64,
        head: u64,
        max_depth: u64,
    },
}

impl IngestError {
    /// Store failures are transient; retrying the same event is safe because
    /// commits are deduplicated by event id.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
