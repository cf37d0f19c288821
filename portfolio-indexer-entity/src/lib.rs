//! `SeaORM` Entity, hand-kept in sync with the `portfolio-indexer-migration` schema.

pub mod prelude;

pub mod event_records;
pub mod token_balances;
pub mod user_stats;
