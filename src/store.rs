// 4.0 store.rs: persisted state as explicit keyed records. replaces slot-style
// storage with plain structures; the whole store clones cheaply enough that a
// transaction works on a scratch copy and swaps it in only on success.

use crate::account::AccountContext;
use crate::portfolio::{PortfolioAsset, PortfolioState};
use crate::types::{AccountId, Cash, CurrencyId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub cash_balance: Cash,
    pub perp_token_balance: Cash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub assets: Vec<PortfolioAsset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStore {
    balances: HashMap<(AccountId, CurrencyId), BalanceRecord>,
    portfolios: HashMap<AccountId, PortfolioRecord>,
    contexts: HashMap<AccountId, AccountContext>,
    perp_token_supply: HashMap<CurrencyId, Cash>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account_id: AccountId, currency_id: CurrencyId) -> BalanceRecord {
        self.balances
            .get(&(account_id, currency_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_balance(
        &mut self,
        account_id: AccountId,
        currency_id: CurrencyId,
        record: BalanceRecord,
    ) {
        if record == BalanceRecord::default() {
            self.balances.remove(&(account_id, currency_id));
        } else {
            self.balances.insert((account_id, currency_id), record);
        }
    }

    /// Currencies this account has a nonzero balance in, ascending.
    pub fn active_currencies(&self, account_id: AccountId) -> Vec<CurrencyId> {
        let mut currencies: Vec<CurrencyId> = self
            .balances
            .keys()
            .filter(|(a, _)| *a == account_id)
            .map(|(_, c)| *c)
            .collect();
        currencies.sort();
        currencies
    }

    /// True when any cash balance of the account is negative.
    pub fn has_cash_debt(&self, account_id: AccountId) -> bool {
        self.balances
            .iter()
            .any(|((a, _), r)| *a == account_id && r.cash_balance.is_negative())
    }

    pub fn context(&self, account_id: AccountId) -> AccountContext {
        self.contexts
            .get(&account_id)
            .copied()
            .unwrap_or_else(|| AccountContext::new(account_id))
    }

    pub fn set_context(&mut self, context: AccountContext) {
        self.contexts.insert(context.account_id, context);
    }

    pub fn portfolio(&self, account_id: AccountId) -> PortfolioState {
        let assets = self
            .portfolios
            .get(&account_id)
            .map(|r| r.assets.clone())
            .unwrap_or_default();
        PortfolioState::load(assets, self.context(account_id).mode)
    }

    /// Commit a portfolio changeset and refresh the account's context flags.
    pub fn commit_portfolio(&mut self, account_id: AccountId, portfolio: PortfolioState) {
        let mut context = self.context(account_id);
        context.refresh(&portfolio, self.has_cash_debt(account_id));
        self.set_context(context);
        self.portfolios
            .insert(account_id, PortfolioRecord { assets: portfolio.commit() });
    }

    /// Refresh context flags after balance-only mutations.
    pub fn refresh_context(&mut self, account_id: AccountId) {
        let portfolio = self.portfolio(account_id);
        let mut context = self.context(account_id);
        context.refresh(&portfolio, self.has_cash_debt(account_id));
        self.set_context(context);
    }

    pub fn perp_token_supply(&self, currency_id: CurrencyId) -> Cash {
        self.perp_token_supply
            .get(&currency_id)
            .copied()
            .unwrap_or_else(Cash::zero)
    }

    pub fn adjust_perp_token_supply(&mut self, currency_id: CurrencyId, delta: Cash) {
        let supply = self.perp_token_supply(currency_id).add(delta);
        if supply.is_zero() {
            self.perp_token_supply.remove(&currency_id);
        } else {
            self.perp_token_supply.insert(currency_id, supply);
        }
    }
}
