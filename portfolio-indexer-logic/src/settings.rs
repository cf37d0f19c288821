use crate::{registry::ContractKind, types::BalanceScope};
use alloy::primitives::Address;
use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;
use url::Url;

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IndexerSettings {
    pub balance_scope: BalanceScope,
    /// Reorgs reaching further back than this many blocks below the indexed
    /// head stop the chain worker.
    pub max_reorg_depth: u64,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub reconnect_interval: Duration,
    pub commit_retry: RetrySettings,
    pub chains: Vec<ChainSettings>,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            balance_scope: BalanceScope::default(),
            max_reorg_depth: 64,
            reconnect_interval: Duration::from_secs(5),
            commit_retry: RetrySettings::default(),
            chains: vec![],
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub min_delay: Duration,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    pub max_attempts: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts)
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub rpc_url: Url,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default)]
    pub contracts: Vec<ContractSettings>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_batch_size() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ContractSettings {
    pub name: String,
    pub kind: ContractKind,
    pub address: Address,
}
