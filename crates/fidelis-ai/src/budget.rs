use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use fidelis_core::{FidelisError, Result};

/// Per-session token and cost counters. Counters are monotonic; cost is
/// tracked in microdollars so it can live in an atomic.
#[derive(Default)]
struct SessionSpend {
    tokens: AtomicU64,
    cost_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendSnapshot {
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Budget ledger shared by all dispatcher calls. Reaching a ceiling fails
/// subsequent calls for that session with a budget-exhausted error.
pub struct BudgetLedger {
    token_ceiling: u64,
    cost_ceiling_micros: u64,
    sessions: DashMap<String, SessionSpend>,
}

impl BudgetLedger {
    pub fn new(token_ceiling: u64, cost_ceiling_usd: f64) -> Self {
        Self {
            token_ceiling,
            cost_ceiling_micros: (cost_ceiling_usd * 1_000_000.0) as u64,
            sessions: DashMap::new(),
        }
    }

    /// Fails when the session has already reached either ceiling.
    pub fn check(&self, session_id: &str) -> Result<()> {
        if let Some(spend) = self.sessions.get(session_id) {
            if spend.tokens.load(Ordering::Relaxed) >= self.token_ceiling {
                return Err(FidelisError::BudgetExhausted(format!(
                    "session {} reached its token ceiling ({})",
                    session_id, self.token_ceiling
                )));
            }
            if spend.cost_micros.load(Ordering::Relaxed) >= self.cost_ceiling_micros {
                return Err(FidelisError::BudgetExhausted(format!(
                    "session {} reached its cost ceiling",
                    session_id
                )));
            }
        }
        Ok(())
    }

    pub fn record(&self, session_id: &str, tokens: u64, cost_usd: f64) {
        let spend = self.sessions.entry(session_id.to_string()).or_default();
        spend.tokens.fetch_add(tokens, Ordering::Relaxed);
        spend
            .cost_micros
            .fetch_add((cost_usd * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, session_id: &str) -> SpendSnapshot {
        match self.sessions.get(session_id) {
            Some(spend) => SpendSnapshot {
                tokens: spend.tokens.load(Ordering::Relaxed),
                cost_usd: spend.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            },
            None => SpendSnapshot {
                tokens: 0,
                cost_usd: 0.0,
            },
        }
    }

    /// Drop a terminal session's counters.
    pub fn forget(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}
