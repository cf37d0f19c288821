use alloy::providers::{Provider as _, ProviderBuilder};
use anyhow::Context;
use portfolio_indexer_logic::{
    ChainWorker, HandlerRegistry, Indexer, IndexerSettings, IngestError, WorkerExit,
    WorkerSettings,
    feed::{RpcLogFeed, RpcLogFeedConfig},
    store::ViewStore,
    types::ChainId,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub type WorkerResult = (ChainId, Result<WorkerExit, IngestError>);

pub fn build_indexer(
    store: Arc<dyn ViewStore>,
    settings: &IndexerSettings,
) -> anyhow::Result<Arc<Indexer>> {
    let registry = HandlerRegistry::from_settings(&settings.chains)
        .context("invalid contract configuration")?;
    if registry.is_empty() {
        anyhow::bail!("no contracts configured for indexing");
    }
    let indexer = Indexer::new(store, registry)
        .with_balance_scope(settings.balance_scope)
        .with_max_reorg_depth(settings.max_reorg_depth);
    Ok(Arc::new(indexer))
}

/// Spawns one RPC-backed worker per configured chain.
pub fn spawn_chain_workers(
    indexer: Arc<Indexer>,
    settings: &IndexerSettings,
    cancel: &CancellationToken,
) -> JoinSet<WorkerResult> {
    let worker_settings = WorkerSettings::from(settings);
    let mut workers = JoinSet::new();

    for chain in &settings.chains {
        let chain_id = chain.chain_id;
        let contracts = indexer.registry().contracts_on(chain_id);
        let provider = ProviderBuilder::new()
            .connect_http(chain.rpc_url.clone())
            .erased();
        let feed = RpcLogFeed::new(
            provider,
            RpcLogFeedConfig {
                chain_id,
                contracts: contracts.clone(),
                start_block: chain.start_block,
                poll_interval: chain.poll_interval,
                batch_size: chain.batch_size,
                reorg_window: settings.max_reorg_depth + 1,
            },
        );
        let worker = ChainWorker::new(indexer.clone(), feed, worker_settings.clone());
        let cancel = cancel.child_token();
        workers.spawn(async move { (chain_id, worker.run(cancel).await) });

        tracing::info!(
            chain_id,
            rpc_url = %chain.rpc_url,
            contracts = contracts.len(),
            start_block = chain.start_block,
            "spawned chain worker"
        );
    }

    workers
}
