mod aggregates;
mod event;
mod identity;
mod record;

pub use aggregates::{
    AggregateKey, Aggregates, BalanceKey, BalanceScope, PortfolioMark, TokenBalance, UserStats,
};
pub use event::{DecodeError, ParamValue, Params, RawEvent};
pub use identity::{ChainId, EventId, EventPosition, ParseEventIdError};
pub use record::{EventKind, EventRecord, IndexedEvent, parse_contract};
