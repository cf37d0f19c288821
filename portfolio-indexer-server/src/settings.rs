use blockscout_service_launcher::{
    database::DatabaseSettings,
    launcher::ConfigSettings,
    tracing::{JaegerSettings, TracingSettings},
};
use portfolio_indexer_logic::{HandlerRegistry, IndexerSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub tracing: TracingSettings,
    #[serde(default)]
    pub jaeger: JaegerSettings,
    /// Views are kept in memory when no database is configured.
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    #[serde(default)]
    pub indexer: IndexerSettings,
}

impl ConfigSettings for Settings {
    const SERVICE_NAME: &'static str = "PORTFOLIO_INDEXER";

    fn validate(&self) -> anyhow::Result<()> {
        if self.indexer.chains.is_empty() {
            anyhow::bail!("at least one chain must be configured");
        }
        let mut chain_ids = HashSet::new();
        for chain in &self.indexer.chains {
            if chain.chain_id == 0 {
                anyhow::bail!("chain_id must be positive");
            }
            if !chain_ids.insert(chain.chain_id) {
                anyhow::bail!("chain {} is configured more than once", chain.chain_id);
            }
            if chain.contracts.is_empty() {
                anyhow::bail!("chain {} has no contracts to index", chain.chain_id);
            }
            if chain.batch_size == 0 {
                anyhow::bail!("chain {}: batch_size must be positive", chain.chain_id);
            }
        }
        HandlerRegistry::from_settings(&self.indexer.chains)?;
        Ok(())
    }
}
