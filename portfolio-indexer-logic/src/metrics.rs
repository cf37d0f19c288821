use lazy_static::lazy_static;
use prometheus::{
    HistogramVec, IntCounterVec, IntGaugeVec, register_histogram_vec, register_int_counter_vec,
    register_int_gauge_vec,
};

// Labels are limited to chain_id and the apply outcome.
lazy_static! {
    /// Processed events per chain with outcome {applied, duplicate, ignored, malformed, out_of_order}.
    pub static ref EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portfolio_indexer_events_total",
        "events received from chain feeds by outcome",
        &["chain_id", "outcome"],
    )
    .unwrap();

    pub static ref BALANCE_UNDERFLOWS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portfolio_indexer_balance_underflows_total",
        "transfers that left a token balance below zero",
        &["chain_id"],
    )
    .unwrap();

    pub static ref COMMIT_RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portfolio_indexer_commit_retries_total",
        "retried event applications after a store failure",
        &["chain_id"],
    )
    .unwrap();

    pub static ref REORGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portfolio_indexer_reorgs_total",
        "chain reorganizations handled by rollback and replay",
        &["chain_id"],
    )
    .unwrap();

    /// Block number of the last processed event per chain.
    pub static ref CHAIN_CURSOR: IntGaugeVec = register_int_gauge_vec!(
        "portfolio_indexer_chain_cursor",
        "block number of the last processed event",
        &["chain_id"],
    )
    .unwrap();

    pub static ref APPLY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "portfolio_indexer_apply_duration_seconds",
        "time spent applying a single event",
        &["chain_id"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
    )
    .unwrap();
}
