use crate::{
    indexer::{WorkerResult, build_indexer, spawn_chain_workers},
    settings::Settings,
};
use blockscout_service_launcher::database;
use migration::Migrator;
use portfolio_indexer_logic::{
    WorkerExit,
    store::{MemoryStore, PostgresStore, ViewStore},
};
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

const SERVICE_NAME: &str = "portfolio_indexer";

pub async fn run(settings: Settings) -> Result<(), anyhow::Error> {
    blockscout_service_launcher::tracing::init_logs(
        SERVICE_NAME,
        &settings.tracing,
        &settings.jaeger,
    )?;

    let store: Arc<dyn ViewStore> = match &settings.database {
        Some(database) => {
            let db_connection = Arc::new(database::initialize_postgres::<Migrator>(database).await?);
            Arc::new(PostgresStore::new(db_connection))
        }
        None => {
            tracing::warn!("no database configured, materialized views are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let indexer = build_indexer(store, &settings.indexer)?;
    let cancel = CancellationToken::new();
    let mut workers = spawn_chain_workers(indexer.clone(), &settings.indexer, &cancel);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("shutdown signal received, stopping chain workers");
                cancel.cancel();
                break;
            }
            joined = workers.join_next() => match joined {
                Some(result) => log_worker_exit(result),
                None => {
                    tracing::warn!("all chain workers have stopped");
                    break;
                }
            },
        }
    }

    while let Some(result) = workers.join_next().await {
        log_worker_exit(result);
    }

    let status = indexer.status();
    tracing::info!(
        applied = status.applied,
        duplicates = status.duplicates,
        ignored = status.ignored,
        malformed = status.malformed,
        reorgs = status.reorgs,
        "indexer stopped"
    );
    Ok(())
}

fn log_worker_exit(result: Result<WorkerResult, JoinError>) {
    match result {
        Ok((chain_id, Ok(WorkerExit::Cancelled))) => {
            tracing::info!(chain_id, "chain worker stopped");
        }
        Ok((chain_id, Ok(WorkerExit::FeedExhausted))) => {
            tracing::warn!(chain_id, "chain worker finished, feed is exhausted");
        }
        Ok((chain_id, Err(err))) => {
            tracing::error!(chain_id, err = ?err, "chain worker failed");
        }
        Err(err) => {
            tracing::error!(err = ?err, "chain worker panicked");
        }
    }
}
