pub mod market_journal;
pub mod position_journal;

pub use market_journal::JsonlMarketJournal;
pub use position_journal::JsonlPositionJournal;
