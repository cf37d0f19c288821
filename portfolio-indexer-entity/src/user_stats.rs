use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "user_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub address: Vec<u8>,
    pub registered_at: Option<i64>,
    pub last_active: i64,
    #[sea_orm(column_type = "Decimal(None)")]
    pub total_portfolio_value: BigDecimal,
    pub portfolio_updated_at: Option<i64>,
    #[sea_orm(column_type = "Text", nullable)]
    pub portfolio_event_id: Option<String>,
    pub alert_count: i64,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
