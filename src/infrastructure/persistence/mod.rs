pub mod database;
pub mod ledger_store;
pub mod market_store;
pub mod session_store;

pub use database::Database;
pub use ledger_store::SqliteLedgerStore;
pub use market_store::SqliteMarketStore;
pub use session_store::SqliteSessionStore;
