//! Batch processing of per-currency balance and trade actions.
//!
//! Actions must arrive strictly ascending by currency id. Settlement runs
//! first when the account has matured positions, and its per-currency deltas
//! merge into the matching actions by a single forward scan. Within one
//! currency the order is fixed: deposit, trades, withdrawal, finalize.

use crate::balance::{BalanceError, BalanceState};
use crate::cash_group::CashGroup;
use crate::external::{PerpTokenAdapter, PerpTokenError, TradeError, TradeExecutor, TradeRequest};
use crate::portfolio::PortfolioError;
use crate::settlement::{settle_portfolio, SettledCashDelta, SettlementError};
use crate::store::LedgerStore;
use crate::token::TokenAdapter;
use crate::types::{AccountId, Cash, CurrencyId, Timestamp};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("actions must be strictly ascending by currency id")]
    UnsortedActions,

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error(transparent)]
    Trade(#[from] TradeError),

    #[error(transparent)]
    PerpToken(#[from] PerpTokenError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositActionType {
    None,
    DepositAsset,
    DepositUnderlying,
    DepositAssetAndMintPerpToken,
    DepositUnderlyingAndMintPerpToken,
    RedeemPerpToken,
}

#[derive(Debug, Clone)]
pub struct BalanceAction {
    pub currency_id: CurrencyId,
    pub deposit_action: DepositActionType,
    /// External precision for deposits; internal token amount for
    /// `RedeemPerpToken`.
    pub deposit_amount: Decimal,
    pub withdraw_amount_internal: Cash,
    pub withdraw_entire_cash_balance: bool,
    pub redeem_to_underlying: bool,
}

impl BalanceAction {
    pub fn new(currency_id: CurrencyId, deposit_action: DepositActionType) -> Self {
        Self {
            currency_id,
            deposit_action,
            deposit_amount: Decimal::ZERO,
            withdraw_amount_internal: Cash::zero(),
            withdraw_entire_cash_balance: false,
            redeem_to_underlying: false,
        }
    }

    pub fn with_deposit(mut self, amount: Decimal) -> Self {
        self.deposit_amount = amount;
        self
    }

    pub fn with_withdraw(mut self, amount_internal: Cash) -> Self {
        self.withdraw_amount_internal = amount_internal;
        self
    }

    pub fn withdraw_entire(mut self) -> Self {
        self.withdraw_entire_cash_balance = true;
        self
    }

    pub fn redeeming_to_underlying(mut self) -> Self {
        self.redeem_to_underlying = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BalanceActionWithTrades {
    pub action: BalanceAction,
    pub trades: Vec<TradeRequest>,
}

/// One committed currency's outcome, for event emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub currency_id: CurrencyId,
    pub net_cash_change: Cash,
    pub perp_token_change: Cash,
    pub withdrawn: Cash,
}

pub fn check_action_ordering<I>(currency_ids: I) -> Result<(), BatchError>
where
    I: IntoIterator<Item = CurrencyId>,
{
    let mut previous: Option<CurrencyId> = None;
    for id in currency_ids {
        if let Some(prev) = previous {
            if id <= prev {
                return Err(BatchError::UnsortedActions);
            }
        }
        previous = Some(id);
    }
    Ok(())
}

pub fn process_balance_actions<A, P>(
    store: &mut LedgerStore,
    token_adapter: &mut A,
    perp_adapter: &mut P,
    cash_groups: &[CashGroup],
    account_id: AccountId,
    block_time: Timestamp,
    actions: &[BalanceAction],
) -> Result<Vec<BalanceChange>, BatchError>
where
    A: TokenAdapter,
    P: PerpTokenAdapter,
{
    let wrapped: Vec<BalanceActionWithTrades> = actions
        .iter()
        .map(|action| BalanceActionWithTrades {
            action: action.clone(),
            trades: Vec::new(),
        })
        .collect();
    let mut executor = NoTradeExecutor;
    process_balance_and_trade_actions(
        store,
        token_adapter,
        perp_adapter,
        &mut executor,
        cash_groups,
        account_id,
        block_time,
        &wrapped,
    )
}

// balance-only batches never reach the executor
struct NoTradeExecutor;

impl TradeExecutor for NoTradeExecutor {
    fn execute(
        &mut self,
        _cash_groups: &[CashGroup],
        currency_id: CurrencyId,
        _block_time: Timestamp,
        _trade: &TradeRequest,
    ) -> Result<crate::external::TradeOutcome, TradeError> {
        Err(TradeError::UnknownMarket {
            currency_id,
            market_index: 0,
        })
    }
}

#[allow(clippy::too_many_arguments)]
pub fn process_balance_and_trade_actions<A, P, T>(
    store: &mut LedgerStore,
    token_adapter: &mut A,
    perp_adapter: &mut P,
    trade_executor: &mut T,
    cash_groups: &[CashGroup],
    account_id: AccountId,
    block_time: Timestamp,
    actions: &[BalanceActionWithTrades],
) -> Result<Vec<BalanceChange>, BatchError>
where
    A: TokenAdapter,
    P: PerpTokenAdapter,
    T: TradeExecutor,
{
    check_action_ordering(actions.iter().map(|a| a.action.currency_id))?;

    let mut portfolio = store.portfolio(account_id);
    let settled: Vec<SettledCashDelta> = if store.context(account_id).must_settle(block_time) {
        settle_portfolio(&mut portfolio, cash_groups, block_time)?
    } else {
        Vec::new()
    };

    let mut changes = Vec::new();
    let mut settled_iter = settled.into_iter().peekable();

    for item in actions {
        let action = &item.action;

        // settled currencies with no action of their own still commit
        while let Some(delta) = settled_iter.peek() {
            if delta.currency_id >= action.currency_id {
                break;
            }
            let delta = settled_iter.next().unwrap();
            changes.push(commit_settled_only(store, token_adapter, account_id, delta)?);
        }

        let settled_cash = match settled_iter.peek() {
            Some(delta) if delta.currency_id == action.currency_id => {
                settled_iter.next().unwrap().net_cash_change
            }
            _ => Cash::zero(),
        };

        let mut balance =
            BalanceState::load_with_settlement(store, account_id, action.currency_id, settled_cash);

        match action.deposit_action {
            DepositActionType::None => {}
            DepositActionType::DepositAsset => {
                balance.deposit_asset_token(token_adapter, action.deposit_amount)?;
            }
            DepositActionType::DepositUnderlying => {
                balance.deposit_underlying_token(token_adapter, action.deposit_amount)?;
            }
            DepositActionType::DepositAssetAndMintPerpToken => {
                let credited = balance.deposit_asset_token(token_adapter, action.deposit_amount)?;
                let tokens = perp_adapter.mint(action.currency_id, credited)?;
                balance.stage_perp_token_mint(credited, tokens)?;
            }
            DepositActionType::DepositUnderlyingAndMintPerpToken => {
                let credited =
                    balance.deposit_underlying_token(token_adapter, action.deposit_amount)?;
                let tokens = perp_adapter.mint(action.currency_id, credited)?;
                balance.stage_perp_token_mint(credited, tokens)?;
            }
            DepositActionType::RedeemPerpToken => {
                let tokens = Cash::new(action.deposit_amount).trunc_internal();
                let cash = perp_adapter.redeem(action.currency_id, tokens)?;
                balance.stage_perp_token_redeem(tokens, cash)?;
            }
        }

        for trade in &item.trades {
            let outcome =
                trade_executor.execute(cash_groups, action.currency_id, block_time, trade)?;
            // a trade that debits cash must be covered by the effective
            // balance in its own currency, collateral elsewhere does not count
            if outcome.cash_change.is_negative() {
                balance.check_sufficient_cash(outcome.cash_change.negate())?;
            }
            balance.net_cash_change = balance.net_cash_change.add(outcome.cash_change);
            for (maturity, asset_type, delta) in outcome.position_changes {
                portfolio.add_asset(action.currency_id, maturity, asset_type, delta)?;
            }
        }

        if action.withdraw_entire_cash_balance {
            balance.withdraw_entire();
        } else if !action.withdraw_amount_internal.is_zero() {
            balance.withdraw(action.withdraw_amount_internal)?;
        }

        let outcome =
            balance.finalize(store, token_adapter, action.redeem_to_underlying)?;
        changes.push(BalanceChange {
            currency_id: action.currency_id,
            net_cash_change: outcome.event_amount,
            perp_token_change: outcome.perp_token_change,
            withdrawn: outcome.withdrawn,
        });
    }

    for delta in settled_iter {
        changes.push(commit_settled_only(store, token_adapter, account_id, delta)?);
    }

    store.commit_portfolio(account_id, portfolio);
    Ok(changes)
}

pub(crate) fn commit_settled_only<A: TokenAdapter>(
    store: &mut LedgerStore,
    token_adapter: &mut A,
    account_id: AccountId,
    delta: SettledCashDelta,
) -> Result<BalanceChange, BatchError> {
    let balance =
        BalanceState::load_with_settlement(store, account_id, delta.currency_id, delta.net_cash_change);
    let outcome = balance.finalize(store, token_adapter, false)?;
    Ok(BalanceChange {
        currency_id: delta.currency_id,
        net_cash_change: outcome.event_amount,
        perp_token_change: outcome.perp_token_change,
        withdrawn: outcome.withdrawn,
    })
}
