use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "token_balances")]
pub struct Model {
    /// `0` when balances are not scoped by chain.
    #[sea_orm(primary_key, auto_increment = false)]
    pub scope_chain_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub address: Vec<u8>,
    #[sea_orm(column_type = "Decimal(None)")]
    pub balance: BigDecimal,
    pub last_updated: i64,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
