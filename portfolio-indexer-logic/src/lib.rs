mod error;
mod indexer;
mod locks;
pub mod metrics;
mod reducer;
pub mod settings;
#[cfg(test)]
mod test_utils;
mod worker;

pub mod feed;
pub mod registry;
pub mod store;
pub mod types;

pub use error::IngestError;
pub use indexer::{ApplyOutcome, Indexer, IndexerStatus};
pub use locks::{KeyGuards, KeyLocks};
pub use reducer::{Diagnostic, Reduction, Replayer, reduce, touched_keys};
pub use registry::{ContractKind, HandlerRegistry, RegistryError};
pub use settings::{ChainSettings, ContractSettings, IndexerSettings, RetrySettings};
pub use worker::{ChainWorker, WorkerExit, WorkerSettings};
