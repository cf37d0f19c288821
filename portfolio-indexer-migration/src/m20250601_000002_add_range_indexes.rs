use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE INDEX event_records_event_name_index ON event_records (event_name);

            CREATE INDEX token_balances_address_index ON token_balances (address);

            CREATE INDEX token_balances_negative_balance_index ON token_balances (scope_chain_id, address) WHERE balance < 0;
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP INDEX token_balances_negative_balance_index;

            DROP INDEX token_balances_address_index;

            DROP INDEX event_records_event_name_index;
        "#;
        crate::from_sql(manager, sql).await
    }
}
