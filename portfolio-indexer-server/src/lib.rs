mod indexer;
mod server;
mod settings;

pub use indexer::{build_indexer, spawn_chain_workers};
pub use server::run;
pub use settings::Settings;
