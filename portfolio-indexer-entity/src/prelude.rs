pub use super::{
    event_records::Entity as EventRecords, token_balances::Entity as TokenBalances,
    user_stats::Entity as UserStats,
};
