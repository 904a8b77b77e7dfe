//! Position ledger entities and the pure trade-verb arithmetic (§3.1, §4.5).
//! Holding a trade verb's math here — independent of storage — keeps the
//! invariants in §3.2 testable without a database.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::errors::CoreError;
use crate::domain::market::{Symbol, Timestamp};

pub const CASH_KEY: &str = "CASH";

/// A trade verb committed at one step. `NoTrade` is the sentinel recorded
/// when a session produced no committed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum Action {
    Buy { symbol: Symbol, amount: i64 },
    Sell { symbol: Symbol, amount: i64 },
    NoTrade,
}

impl Action {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Action::Buy { symbol, .. } | Action::Sell { symbol, .. } => Some(symbol),
            Action::NoTrade => None,
        }
    }

    pub fn amount(&self) -> Option<i64> {
        match self {
            Action::Buy { amount, .. } | Action::Sell { amount, .. } => Some(*amount),
            Action::NoTrade => None,
        }
    }
}

/// Cash + non-zero holdings. Zero holdings are never stored (§3.2 invariant 4).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub cash: Decimal,
    pub holdings: HashMap<Symbol, i64>,
}

impl Position {
    pub fn new(cash: Decimal) -> Self {
        Self {
            cash,
            holdings: HashMap::new(),
        }
    }

    /// Applies `buy(symbol, amount)` at opening price `price`. Rejects
    /// (non-fatal) if the cost exceeds available cash or amount is not a
    /// positive integer.
    pub fn apply_buy(&self, symbol: &str, amount: i64, price: Decimal) -> Result<Self, CoreError> {
        if amount <= 0 {
            return Err(CoreError::ValidationError {
                reason: format!("buy amount must be a positive integer, got {amount}"),
            });
        }
        let cost = price * Decimal::from(amount);
        if cost > self.cash {
            return Err(CoreError::ValidationError {
                reason: format!(
                    "insufficient funds: need {cost}, available {}",
                    self.cash
                ),
            });
        }
        let mut next = self.clone();
        next.cash -= cost;
        *next.holdings.entry(symbol.to_string()).or_insert(0) += amount;
        Ok(next)
    }

    /// Applies `sell(symbol, amount)` at opening price `price`. Rejects
    /// (non-fatal) if the agent does not hold enough shares.
    pub fn apply_sell(&self, symbol: &str, amount: i64, price: Decimal) -> Result<Self, CoreError> {
        if amount <= 0 {
            return Err(CoreError::ValidationError {
                reason: format!("sell amount must be a positive integer, got {amount}"),
            });
        }
        let held = self.holdings.get(symbol).copied().unwrap_or(0);
        if amount > held {
            return Err(CoreError::ValidationError {
                reason: format!("insufficient holdings of {symbol}: have {held}, want to sell {amount}"),
            });
        }
        let mut next = self.clone();
        next.cash += price * Decimal::from(amount);
        let remaining = held - amount;
        if remaining == 0 {
            next.holdings.remove(symbol);
        } else {
            next.holdings.insert(symbol.to_string(), remaining);
        }
        Ok(next)
    }

    pub fn apply_no_trade(&self) -> Self {
        self.clone()
    }
}

/// One append-only ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStep {
    pub agent: String,
    pub timestamp: Timestamp,
    pub step_id: i64,
    pub action: Action,
    pub cash: Decimal,
    pub holdings: HashMap<Symbol, i64>,
}

impl PositionStep {
    pub fn position(&self) -> Position {
        Position {
            cash: self.cash,
            holdings: self.holdings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_deducts_cash_and_adds_shares() {
        let pos = Position::new(dec!(100000));
        let next = pos.apply_buy("600519.SH", 10, dec!(1700)).unwrap();
        assert_eq!(next.cash, dec!(83000));
        assert_eq!(next.holdings.get("600519.SH"), Some(&10));
    }

    #[test]
    fn sell_rejects_when_oversized() {
        let mut pos = Position::new(dec!(0));
        pos.holdings.insert("600519.SH".into(), 5);
        assert!(pos.apply_sell("600519.SH", 10, dec!(1700)).is_err());
    }

    #[test]
    fn sell_drops_zeroed_key() {
        let mut pos = Position::new(dec!(0));
        pos.holdings.insert("600519.SH".into(), 6);
        let next = pos.apply_sell("600519.SH", 6, dec!(1710)).unwrap();
        assert!(!next.holdings.contains_key("600519.SH"));
        assert_eq!(next.cash, dec!(10260));
    }

    #[test]
    fn buy_rejects_insufficient_funds() {
        let pos = Position::new(dec!(1000));
        assert!(pos.apply_buy("600519.SH", 10, dec!(1700)).is_err());
    }
}
