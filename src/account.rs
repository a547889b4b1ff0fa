// 3.0 account.rs: per-account context flags. derived from the portfolio and
// balances on every commit, read at the start of every transaction.

use crate::portfolio::{PortfolioMode, PortfolioState};
use crate::types::{AccountId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    pub account_id: AccountId,
    // earliest settlement date of any owned asset, None when nothing settles
    pub next_settle_time: Option<Timestamp>,
    // gates the post-transaction solvency check
    pub has_debt: bool,
    pub mode: PortfolioMode,
}

impl AccountContext {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            next_settle_time: None,
            has_debt: false,
            mode: PortfolioMode::AssetArray,
        }
    }

    pub fn must_settle(&self, block_time: Timestamp) -> bool {
        match self.next_settle_time {
            Some(next) => block_time >= next,
            None => false,
        }
    }

    /// Recompute flags from the live portfolio. `has_cash_debt` covers negative
    /// cash balances, which the portfolio cannot see.
    pub fn refresh(&mut self, portfolio: &PortfolioState, has_cash_debt: bool) {
        self.next_settle_time = portfolio.next_settle_time();
        self.has_debt = portfolio.has_debt() || has_cash_debt;
    }
}
