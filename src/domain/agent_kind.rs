//! Static agent-variant registry (§9 REDESIGN: replaces the source's
//! string-keyed reflective agent-class dispatch with a tagged enumeration
//! and a `match`-based signature/dispatch table).

use crate::domain::agent_run::RunMode;
use crate::domain::market::Frequency;

/// The two trading-timestamp granularities this deployment drives. A-share
/// equities only (§1 purpose/scope) — no crypto/US variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    AStockDaily,
    AStockHourly,
}

impl AgentKind {
    pub fn from_frequency(frequency: Frequency) -> Self {
        match frequency {
            Frequency::Daily => AgentKind::AStockDaily,
            Frequency::Hourly => AgentKind::AStockHourly,
        }
    }

    pub fn frequency(&self) -> Frequency {
        match self {
            AgentKind::AStockDaily => Frequency::Daily,
            AgentKind::AStockHourly => Frequency::Hourly,
        }
    }
}

/// Derives the stable, per-run ledger identity for a base model signature:
/// hourly backtests get `-astock-hour`, live runs get `-live`, and live
/// hourly runs get both, in that order (§3.1 Position Step `agent`, §4.7).
pub fn agent_signature(base_signature: &str, kind: AgentKind, mode: RunMode) -> String {
    match (kind, mode) {
        (AgentKind::AStockDaily, RunMode::Backtest) => base_signature.to_string(),
        (AgentKind::AStockHourly, RunMode::Backtest) => format!("{base_signature}-astock-hour"),
        (AgentKind::AStockDaily, RunMode::Live) => format!("{base_signature}-live"),
        (AgentKind::AStockHourly, RunMode::Live) => format!("{base_signature}-live-astock-hour"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_match_spec() {
        assert_eq!(
            agent_signature("gpt-5", AgentKind::AStockDaily, RunMode::Backtest),
            "gpt-5"
        );
        assert_eq!(
            agent_signature("gpt-5", AgentKind::AStockHourly, RunMode::Backtest),
            "gpt-5-astock-hour"
        );
        assert_eq!(
            agent_signature("gpt-5", AgentKind::AStockDaily, RunMode::Live),
            "gpt-5-live"
        );
        assert_eq!(
            agent_signature("gpt-5", AgentKind::AStockHourly, RunMode::Live),
            "gpt-5-live-astock-hour"
        );
    }
}
