use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TABLE event_records (
                id               text      PRIMARY KEY,
                seq              bigserial NOT NULL UNIQUE,
                chain_id         bigint    NOT NULL,
                block_number     bigint    NOT NULL,
                log_index        bigint    NOT NULL,
                transaction_hash bytea     NOT NULL,
                block_timestamp  bigint    NOT NULL,
                contract         bytea     NOT NULL,
                event_name       text      NOT NULL,
                payload          jsonb     NOT NULL,
                created_at       timestamp NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
                UNIQUE (chain_id, block_number, log_index)
            );

            CREATE TABLE user_stats (
                address               bytea     PRIMARY KEY,
                registered_at         bigint,
                last_active           bigint    NOT NULL,
                total_portfolio_value numeric   NOT NULL DEFAULT 0,
                portfolio_updated_at  bigint,
                portfolio_event_id    text,
                alert_count           bigint    NOT NULL DEFAULT 0,
                updated_at            timestamp NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
            );

            CREATE TABLE token_balances (
                scope_chain_id bigint    NOT NULL,
                address        bytea     NOT NULL,
                balance        numeric   NOT NULL,
                last_updated   bigint    NOT NULL,
                updated_at     timestamp NOT NULL DEFAULT (now() AT TIME ZONE 'utc'),
                PRIMARY KEY (scope_chain_id, address)
            );
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE token_balances;
            DROP TABLE user_stats;
            DROP TABLE event_records;
        "#;
        crate::from_sql(manager, sql).await
    }
}
