use super::{CommitBatch, CommitOutcome, RollbackSummary, StoreError, ViewStore};
use crate::{
    reducer::Replayer,
    types::{
        AggregateKey, Aggregates, BalanceKey, BalanceScope, ChainId, EventId, EventPosition,
        EventRecord, IndexedEvent, PortfolioMark, TokenBalance, UserStats,
    },
};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use entity::{event_records, token_balances, user_stats};
use num_bigint::{BigInt, BigUint};
use sea_orm::{
    ActiveValue, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
    entity::prelude::BigDecimal,
    prelude::Expr,
    sea_query::OnConflict,
};
use std::sync::Arc;

const REPLAY_PAGE_SIZE: u64 = 1_000;
const INSERT_CHUNK_SIZE: usize = 1_000;

/// View store persisted in Postgres. Every commit and every rollback runs in
/// a single database transaction.
#[derive(Clone)]
pub struct PostgresStore {
    db: Arc<DatabaseConnection>,
}

impl PostgresStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ViewStore for PostgresStore {
    async fn contains_event(&self, id: &EventId) -> Result<bool, StoreError> {
        let found = event_records::Entity::find_by_id(id.to_string())
            .one(self.db.as_ref())
            .await?;
        Ok(found.is_some())
    }

    async fn last_applied(&self, chain_id: ChainId) -> Result<Option<EventId>, StoreError> {
        event_records::Entity::find()
            .filter(event_records::Column::ChainId.eq(to_db("chain_id", chain_id)?))
            .order_by_desc(event_records::Column::BlockNumber)
            .order_by_desc(event_records::Column::LogIndex)
            .one(self.db.as_ref())
            .await?
            .map(|row| {
                row.id
                    .parse::<EventId>()
                    .map_err(|err| StoreError::corrupted("event_records", err))
            })
            .transpose()
    }

    async fn load(&self, keys: &[AggregateKey]) -> Result<Aggregates, StoreError> {
        load_aggregates(self.db.as_ref(), keys).await
    }

    async fn commit(&self, batch: CommitBatch) -> Result<CommitOutcome, StoreError> {
        let CommitBatch {
            record,
            user_stats,
            balances,
        } = batch;
        let id = record.id;

        let tx = self.db.begin().await?;
        let inserted = event_records::Entity::insert(record_to_active(&record)?)
            .on_conflict(
                OnConflict::column(event_records::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&tx)
            .await?;
        if inserted == 0 {
            tx.rollback().await?;
            tracing::debug!(event_id = %id, "event record already exists, skipping commit");
            return Ok(CommitOutcome::Duplicate);
        }

        upsert_user_stats(&tx, &user_stats).await?;
        upsert_balances(&tx, &balances).await?;
        tx.commit().await?;

        Ok(CommitOutcome::Committed)
    }

    async fn rollback(
        &self,
        chain_id: ChainId,
        after: EventPosition,
        scope: BalanceScope,
    ) -> Result<RollbackSummary, StoreError> {
        let tx = self.db.begin().await?;

        let removed = event_records::Entity::delete_many()
            .filter(event_records::Column::ChainId.eq(to_db("chain_id", chain_id)?))
            .filter(
                Condition::any()
                    .add(event_records::Column::BlockNumber.gt(clamp_i64(after.block_number)))
                    .add(
                        Condition::all()
                            .add(
                                event_records::Column::BlockNumber
                                    .eq(to_db("block_number", after.block_number)?),
                            )
                            .add(event_records::Column::LogIndex.gt(clamp_i64(after.log_index))),
                    ),
            )
            .exec(&tx)
            .await?;

        user_stats::Entity::delete_many().exec(&tx).await?;
        token_balances::Entity::delete_many().exec(&tx).await?;

        let mut replayer = Replayer::new(scope);
        let mut pages = event_records::Entity::find()
            .order_by_asc(event_records::Column::Seq)
            .paginate(&tx, REPLAY_PAGE_SIZE);
        while let Some(rows) = pages.fetch_and_next().await? {
            for row in rows {
                replayer.push(record_from_model(row)?);
            }
        }
        let replayed_events = replayer.replayed();
        let (aggregates, diagnostics) = replayer.finish();

        let users: Vec<_> = aggregates.users.into_values().collect();
        let balances: Vec<_> = aggregates.balances.into_values().collect();
        for chunk in users.chunks(INSERT_CHUNK_SIZE) {
            let rows = chunk
                .iter()
                .map(user_stats_to_active)
                .collect::<Result<Vec<_>, _>>()?;
            user_stats::Entity::insert_many(rows)
                .exec_without_returning(&tx)
                .await?;
        }
        for chunk in balances.chunks(INSERT_CHUNK_SIZE) {
            let rows = chunk
                .iter()
                .map(balance_to_active)
                .collect::<Result<Vec<_>, _>>()?;
            token_balances::Entity::insert_many(rows)
                .exec_without_returning(&tx)
                .await?;
        }

        tx.commit().await?;

        Ok(RollbackSummary {
            removed_events: removed.rows_affected,
            replayed_events,
            diagnostics,
        })
    }

    async fn user_stats(&self, address: &Address) -> Result<Option<UserStats>, StoreError> {
        user_stats::Entity::find_by_id(address.to_vec())
            .one(self.db.as_ref())
            .await?
            .map(user_stats_from_model)
            .transpose()
    }

    async fn token_balance(&self, key: &BalanceKey) -> Result<Option<TokenBalance>, StoreError> {
        token_balances::Entity::find_by_id((scope_chain_id(key)?, key.address.to_vec()))
            .one(self.db.as_ref())
            .await?
            .map(balance_from_model)
            .transpose()
    }

    async fn events_in_range(
        &self,
        chain_id: ChainId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let (Ok(chain_id), Ok(from_block)) = (i64::try_from(chain_id), i64::try_from(from_block))
        else {
            return Ok(vec![]);
        };
        event_records::Entity::find()
            .filter(event_records::Column::ChainId.eq(chain_id))
            .filter(event_records::Column::BlockNumber.between(from_block, clamp_i64(to_block)))
            .order_by_asc(event_records::Column::BlockNumber)
            .order_by_asc(event_records::Column::LogIndex)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(record_from_model)
            .collect()
    }
}

async fn load_aggregates<C: ConnectionTrait>(
    db: &C,
    keys: &[AggregateKey],
) -> Result<Aggregates, StoreError> {
    let mut addresses = vec![];
    let mut balance_filter = Condition::any();
    let mut has_balances = false;
    for key in keys {
        match key {
            AggregateKey::User(address) => addresses.push(address.to_vec()),
            AggregateKey::Balance(balance_key) => {
                has_balances = true;
                balance_filter = balance_filter.add(
                    Condition::all()
                        .add(token_balances::Column::ScopeChainId.eq(scope_chain_id(balance_key)?))
                        .add(token_balances::Column::Address.eq(balance_key.address.to_vec())),
                );
            }
        }
    }

    let mut aggregates = Aggregates::default();
    if !addresses.is_empty() {
        let rows = user_stats::Entity::find()
            .filter(user_stats::Column::Address.is_in(addresses))
            .all(db)
            .await?;
        aggregates.upsert_users(
            rows.into_iter()
                .map(user_stats_from_model)
                .collect::<Result<Vec<_>, _>>()?,
        );
    }
    if has_balances {
        let rows = token_balances::Entity::find()
            .filter(balance_filter)
            .all(db)
            .await?;
        aggregates.upsert_balances(
            rows.into_iter()
                .map(balance_from_model)
                .collect::<Result<Vec<_>, _>>()?,
        );
    }
    Ok(aggregates)
}

async fn upsert_user_stats<C: ConnectionTrait>(
    db: &C,
    rows: &[UserStats],
) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    let rows = rows
        .iter()
        .map(user_stats_to_active)
        .collect::<Result<Vec<_>, _>>()?;
    user_stats::Entity::insert_many(rows)
        .on_conflict(
            OnConflict::column(user_stats::Column::Address)
                .update_columns([
                    user_stats::Column::RegisteredAt,
                    user_stats::Column::LastActive,
                    user_stats::Column::TotalPortfolioValue,
                    user_stats::Column::PortfolioUpdatedAt,
                    user_stats::Column::PortfolioEventId,
                    user_stats::Column::AlertCount,
                ])
                .value(user_stats::Column::UpdatedAt, Expr::current_timestamp())
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

async fn upsert_balances<C: ConnectionTrait>(
    db: &C,
    rows: &[TokenBalance],
) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    let rows = rows
        .iter()
        .map(balance_to_active)
        .collect::<Result<Vec<_>, _>>()?;
    token_balances::Entity::insert_many(rows)
        .on_conflict(
            OnConflict::columns([
                token_balances::Column::ScopeChainId,
                token_balances::Column::Address,
            ])
            .update_columns([
                token_balances::Column::Balance,
                token_balances::Column::LastUpdated,
            ])
            .value(token_balances::Column::UpdatedAt, Expr::current_timestamp())
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Saturating bound for range filters; stored values never exceed `i64::MAX`.
fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_db(column: &'static str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { column, value })
}

fn from_db(table: &'static str, column: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::corrupted(table, format!("negative {column}: {value}")))
}

fn scope_chain_id(key: &BalanceKey) -> Result<i64, StoreError> {
    key.chain_id
        .map(|chain_id| to_db("scope_chain_id", chain_id))
        .unwrap_or(Ok(0))
}

fn to_decimal(value: BigInt) -> BigDecimal {
    BigDecimal::new(value, 0)
}

fn from_decimal(value: BigDecimal) -> BigInt {
    let (digits, _) = value.with_scale(0).into_bigint_and_exponent();
    digits
}

fn address_from_bytes(table: &'static str, bytes: &[u8]) -> Result<Address, StoreError> {
    if bytes.len() != Address::ZERO.len() {
        return Err(StoreError::corrupted(
            table,
            format!("invalid address length {}", bytes.len()),
        ));
    }
    Ok(Address::from_slice(bytes))
}

fn record_to_active(record: &EventRecord) -> Result<event_records::ActiveModel, StoreError> {
    let payload = serde_json::to_value(&record.event)
        .map_err(|err| StoreError::corrupted("event_records", err))?;
    Ok(event_records::ActiveModel {
        id: ActiveValue::Set(record.id.to_string()),
        chain_id: ActiveValue::Set(to_db("chain_id", record.id.chain_id)?),
        block_number: ActiveValue::Set(to_db("block_number", record.id.block_number)?),
        log_index: ActiveValue::Set(to_db("log_index", record.id.log_index)?),
        transaction_hash: ActiveValue::Set(record.transaction_hash.to_vec()),
        block_timestamp: ActiveValue::Set(to_db("block_timestamp", record.block_timestamp)?),
        contract: ActiveValue::Set(record.contract.to_vec()),
        event_name: ActiveValue::Set(record.kind().to_string()),
        payload: ActiveValue::Set(payload),
        ..Default::default()
    })
}

fn record_from_model(row: event_records::Model) -> Result<EventRecord, StoreError> {
    const TABLE: &str = "event_records";
    let id = row
        .id
        .parse::<EventId>()
        .map_err(|err| StoreError::corrupted(TABLE, err))?;
    if row.transaction_hash.len() != B256::ZERO.len() {
        return Err(StoreError::corrupted(TABLE, "invalid transaction hash length"));
    }
    let event: IndexedEvent =
        serde_json::from_value(row.payload).map_err(|err| StoreError::corrupted(TABLE, err))?;
    Ok(EventRecord {
        id,
        transaction_hash: B256::from_slice(&row.transaction_hash),
        block_timestamp: from_db(TABLE, "block_timestamp", row.block_timestamp)?,
        contract: address_from_bytes(TABLE, &row.contract)?,
        event,
    })
}

fn user_stats_to_active(stats: &UserStats) -> Result<user_stats::ActiveModel, StoreError> {
    let registered_at = stats
        .registered_at
        .map(|ts| to_db("registered_at", ts))
        .transpose()?;
    let portfolio_updated_at = stats
        .portfolio_mark
        .map(|mark| to_db("portfolio_updated_at", mark.timestamp))
        .transpose()?;
    Ok(user_stats::ActiveModel {
        address: ActiveValue::Set(stats.address.to_vec()),
        registered_at: ActiveValue::Set(registered_at),
        last_active: ActiveValue::Set(to_db("last_active", stats.last_active)?),
        total_portfolio_value: ActiveValue::Set(to_decimal(BigInt::from(
            stats.total_portfolio_value.clone(),
        ))),
        portfolio_updated_at: ActiveValue::Set(portfolio_updated_at),
        portfolio_event_id: ActiveValue::Set(
            stats.portfolio_mark.map(|mark| mark.event_id.to_string()),
        ),
        alert_count: ActiveValue::Set(to_db("alert_count", stats.alert_count)?),
        ..Default::default()
    })
}

fn user_stats_from_model(row: user_stats::Model) -> Result<UserStats, StoreError> {
    const TABLE: &str = "user_stats";
    let portfolio_mark = match (row.portfolio_updated_at, row.portfolio_event_id) {
        (Some(timestamp), Some(event_id)) => Some(PortfolioMark {
            timestamp: from_db(TABLE, "portfolio_updated_at", timestamp)?,
            event_id: event_id
                .parse()
                .map_err(|err| StoreError::corrupted(TABLE, err))?,
        }),
        _ => None,
    };
    let total_portfolio_value: BigUint = from_decimal(row.total_portfolio_value)
        .to_biguint()
        .ok_or_else(|| StoreError::corrupted(TABLE, "negative portfolio value"))?;
    Ok(UserStats {
        address: address_from_bytes(TABLE, &row.address)?,
        registered_at: row
            .registered_at
            .map(|ts| from_db(TABLE, "registered_at", ts))
            .transpose()?,
        last_active: from_db(TABLE, "last_active", row.last_active)?,
        total_portfolio_value,
        portfolio_mark,
        alert_count: from_db(TABLE, "alert_count", row.alert_count)?,
    })
}

fn balance_to_active(balance: &TokenBalance) -> Result<token_balances::ActiveModel, StoreError> {
    Ok(token_balances::ActiveModel {
        scope_chain_id: ActiveValue::Set(scope_chain_id(&balance.key)?),
        address: ActiveValue::Set(balance.key.address.to_vec()),
        balance: ActiveValue::Set(to_decimal(balance.balance.clone())),
        last_updated: ActiveValue::Set(to_db("last_updated", balance.last_updated)?),
        ..Default::default()
    })
}

fn balance_from_model(row: token_balances::Model) -> Result<TokenBalance, StoreError> {
    const TABLE: &str = "token_balances";
    let chain_id = match row.scope_chain_id {
        0 => None,
        chain_id => Some(from_db(TABLE, "scope_chain_id", chain_id)?),
    };
    Ok(TokenBalance {
        key: BalanceKey {
            chain_id,
            address: address_from_bytes(TABLE, &row.address)?,
        },
        balance: from_decimal(row.balance),
        last_updated: from_db(TABLE, "last_updated", row.last_updated)?,
    })
}
