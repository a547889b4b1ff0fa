//! The ledger: every externally callable operation lives here.
//!
//! Each operation is one atomic unit of work. It clones the persisted store
//! into a scratch copy, runs every mutation against the scratch, and swaps
//! the scratch in only when the whole operation succeeded. Any error leaves
//! the persisted state untouched. Events are appended only on commit.

use crate::balance::BalanceState;
use crate::batch::{
    commit_settled_only, process_balance_actions, process_balance_and_trade_actions,
    BalanceAction, BalanceActionWithTrades, BalanceChange,
};
use crate::cash_group::{find_cash_group, CashGroup};
use crate::errors::LedgerError;
use crate::events::{Event, EventId, EventPayload};
use crate::external::{PerpTokenAdapter, SolvencyChecker, TradeExecutor};
use crate::liquidation::{self, LiquidationError};
use crate::settlement::settle_portfolio;
use crate::store::LedgerStore;
use crate::token::TokenAdapter;
use crate::types::{AccountId, AssetType, Cash, CurrencyId, Timestamp};
use rust_decimal::Decimal;

pub struct Ledger<A, P, T, S> {
    store: LedgerStore,
    cash_groups: Vec<CashGroup>,
    token_adapter: A,
    perp_token_adapter: P,
    trade_executor: T,
    solvency_checker: S,
    events: Vec<Event>,
    next_event_id: u64,
}

impl<A, P, T, S> Ledger<A, P, T, S>
where
    A: TokenAdapter,
    P: PerpTokenAdapter,
    T: TradeExecutor,
    S: SolvencyChecker,
{
    pub fn new(
        mut cash_groups: Vec<CashGroup>,
        token_adapter: A,
        perp_token_adapter: P,
        trade_executor: T,
        solvency_checker: S,
    ) -> Self {
        cash_groups.sort_by_key(|g| g.currency_id);
        Self {
            store: LedgerStore::new(),
            cash_groups,
            token_adapter,
            perp_token_adapter,
            trade_executor,
            solvency_checker,
            events: Vec::new(),
            next_event_id: 0,
        }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Direct store access. For tests and simulation setups only; real
    /// mutations go through the operations below.
    #[doc(hidden)]
    pub fn store_mut(&mut self) -> &mut LedgerStore {
        &mut self.store
    }

    pub fn cash_groups(&self) -> &[CashGroup] {
        &self.cash_groups
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn token_adapter_mut(&mut self) -> &mut A {
        &mut self.token_adapter
    }

    fn emit(&mut self, block_time: Timestamp, payload: EventPayload) {
        self.next_event_id += 1;
        self.events.push(Event {
            id: EventId(self.next_event_id),
            block_time,
            payload,
        });
    }

    fn emit_balance_changes(
        &mut self,
        account_id: AccountId,
        block_time: Timestamp,
        changes: &[BalanceChange],
    ) {
        for change in changes {
            if !change.net_cash_change.is_zero() {
                self.emit(
                    block_time,
                    EventPayload::CashBalanceChange {
                        account_id,
                        currency_id: change.currency_id,
                        net_cash_change: change.net_cash_change,
                    },
                );
            }
            if !change.perp_token_change.is_zero() {
                self.emit(
                    block_time,
                    EventPayload::PerpTokenChange {
                        account_id,
                        currency_id: change.currency_id,
                        net_change: change.perp_token_change,
                    },
                );
            }
        }
    }

    /// Settle matured positions inside a scratch store. No-op when the
    /// account has nothing matured.
    fn settle_in(
        scratch: &mut LedgerStore,
        token_adapter: &mut A,
        cash_groups: &[CashGroup],
        account_id: AccountId,
        block_time: Timestamp,
    ) -> Result<Vec<BalanceChange>, LedgerError> {
        if !scratch.context(account_id).must_settle(block_time) {
            return Ok(Vec::new());
        }
        let mut portfolio = scratch.portfolio(account_id);
        let deltas = settle_portfolio(&mut portfolio, cash_groups, block_time)?;
        let mut changes = Vec::with_capacity(deltas.len());
        for delta in deltas {
            changes.push(commit_settled_only(scratch, token_adapter, account_id, delta)?);
        }
        scratch.commit_portfolio(account_id, portfolio);
        Ok(changes)
    }

    fn check_solvency_if_indebted(
        &self,
        scratch: &LedgerStore,
        account_id: AccountId,
        block_time: Timestamp,
    ) -> Result<(), LedgerError> {
        let indebted =
            scratch.has_cash_debt(account_id) || scratch.context(account_id).has_debt;
        if indebted {
            self.solvency_checker
                .check(scratch, &self.cash_groups, account_id, block_time)?;
        }
        Ok(())
    }

    fn authorize(caller: AccountId, account: AccountId) -> Result<(), LedgerError> {
        if caller != account {
            return Err(LedgerError::Unauthorized { caller, account });
        }
        Ok(())
    }

    // public operations

    /// Settle an account's matured positions into cash. Permissionless and
    /// idempotent.
    pub fn settle_account(
        &mut self,
        account_id: AccountId,
        block_time: Timestamp,
    ) -> Result<(), LedgerError> {
        let mut scratch = self.store.clone();
        let changes = Self::settle_in(
            &mut scratch,
            &mut self.token_adapter,
            &self.cash_groups,
            account_id,
            block_time,
        )?;

        self.store = scratch;
        if !changes.is_empty() {
            self.emit(block_time, EventPayload::AccountSettled { account_id });
            self.emit_balance_changes(account_id, block_time, &changes);
        }
        Ok(())
    }

    /// Deposit underlying, wrapping it into the currency's asset token.
    /// Anyone may deposit into any account; the depositor's wallet pays.
    pub fn deposit_underlying(
        &mut self,
        account_id: AccountId,
        currency_id: CurrencyId,
        amount_external: Decimal,
        block_time: Timestamp,
    ) -> Result<Cash, LedgerError> {
        let mut scratch = self.store.clone();
        let mut balance = BalanceState::load(&scratch, account_id, currency_id);
        let credited = balance.deposit_underlying_token(&mut self.token_adapter, amount_external)?;
        let outcome = balance.finalize(&mut scratch, &mut self.token_adapter, false)?;

        self.store = scratch;
        self.emit(
            block_time,
            EventPayload::CashBalanceChange {
                account_id,
                currency_id,
                net_cash_change: outcome.event_amount,
            },
        );
        Ok(credited)
    }

    /// Deposit the asset token directly.
    pub fn deposit_asset(
        &mut self,
        account_id: AccountId,
        currency_id: CurrencyId,
        amount_external: Decimal,
        block_time: Timestamp,
    ) -> Result<Cash, LedgerError> {
        let mut scratch = self.store.clone();
        let mut balance = BalanceState::load(&scratch, account_id, currency_id);
        let credited = balance.deposit_asset_token(&mut self.token_adapter, amount_external)?;
        let outcome = balance.finalize(&mut scratch, &mut self.token_adapter, false)?;

        self.store = scratch;
        self.emit(
            block_time,
            EventPayload::CashBalanceChange {
                account_id,
                currency_id,
                net_cash_change: outcome.event_amount,
            },
        );
        Ok(credited)
    }

    /// Withdraw a fixed internal amount, optionally unwrapping to underlying.
    pub fn withdraw(
        &mut self,
        caller: AccountId,
        account_id: AccountId,
        currency_id: CurrencyId,
        amount_internal: Cash,
        redeem_to_underlying: bool,
        block_time: Timestamp,
    ) -> Result<Cash, LedgerError> {
        Self::authorize(caller, account_id)?;

        let mut scratch = self.store.clone();
        let settled = Self::settle_in(
            &mut scratch,
            &mut self.token_adapter,
            &self.cash_groups,
            account_id,
            block_time,
        )?;

        let mut balance = BalanceState::load(&scratch, account_id, currency_id);
        balance.withdraw(amount_internal)?;
        let outcome = balance.finalize(&mut scratch, &mut self.token_adapter, redeem_to_underlying)?;

        self.check_solvency_if_indebted(&scratch, account_id, block_time)?;

        self.store = scratch;
        self.emit_balance_changes(account_id, block_time, &settled);
        self.emit(
            block_time,
            EventPayload::CashBalanceChange {
                account_id,
                currency_id,
                net_cash_change: outcome.event_amount,
            },
        );
        Ok(outcome.withdrawn)
    }

    /// Run a batch of balance actions, strictly ascending by currency.
    pub fn batch_balance_action(
        &mut self,
        caller: AccountId,
        account_id: AccountId,
        actions: &[BalanceAction],
        block_time: Timestamp,
    ) -> Result<(), LedgerError> {
        Self::authorize(caller, account_id)?;

        let mut scratch = self.store.clone();
        let changes = process_balance_actions(
            &mut scratch,
            &mut self.token_adapter,
            &mut self.perp_token_adapter,
            &self.cash_groups,
            account_id,
            block_time,
            actions,
        )?;

        self.check_solvency_if_indebted(&scratch, account_id, block_time)?;

        self.store = scratch;
        self.emit_balance_changes(account_id, block_time, &changes);
        Ok(())
    }

    /// Run a batch of balance actions with market trades between the deposit
    /// and withdrawal legs.
    pub fn batch_balance_and_trade_action(
        &mut self,
        caller: AccountId,
        account_id: AccountId,
        actions: &[BalanceActionWithTrades],
        block_time: Timestamp,
    ) -> Result<(), LedgerError> {
        Self::authorize(caller, account_id)?;

        let mut scratch = self.store.clone();
        let changes = process_balance_and_trade_actions(
            &mut scratch,
            &mut self.token_adapter,
            &mut self.perp_token_adapter,
            &mut self.trade_executor,
            &self.cash_groups,
            account_id,
            block_time,
            actions,
        )?;

        self.check_solvency_if_indebted(&scratch, account_id, block_time)?;

        self.store = scratch;
        self.emit_balance_changes(account_id, block_time, &changes);
        Ok(())
    }

    /// Same-currency liquidation: the liquidator pays local cash for the
    /// account's perp tokens at the liquidation haircut value.
    pub fn liquidate_local_currency(
        &mut self,
        liquidator: AccountId,
        account_id: AccountId,
        currency_id: CurrencyId,
        max_tokens: Cash,
        block_time: Timestamp,
    ) -> Result<Cash, LedgerError> {
        if liquidator == account_id {
            return Err(LiquidationError::SelfLiquidation.into());
        }

        let mut scratch = self.store.clone();
        Self::settle_in(
            &mut scratch,
            &mut self.token_adapter,
            &self.cash_groups,
            account_id,
            block_time,
        )?;

        let factors = self.solvency_checker.liquidation_factors(
            &scratch,
            &self.cash_groups,
            account_id,
            block_time,
            currency_id,
            None,
        )?;
        let group = find_cash_group(&self.cash_groups, currency_id)?;
        let account_tokens = scratch.balance(account_id, currency_id).perp_token_balance;
        let mut portfolio = scratch.portfolio(account_id);
        let result = liquidation::liquidate_local_currency(
            &factors,
            group,
            &portfolio,
            account_tokens,
            max_tokens,
            block_time,
        )?;

        // withdrawn liquidity tokens become their raw claims: cash on the
        // balance, fCash back in the portfolio
        for withdrawal in &result.token_withdrawals {
            portfolio.add_asset(
                currency_id,
                withdrawal.maturity,
                AssetType::LiquidityToken {
                    market_index: withdrawal.market_index,
                },
                withdrawal.tokens.negate(),
            )?;
            if !withdrawal.fcash_claim.is_zero() {
                portfolio.add_asset(
                    currency_id,
                    withdrawal.maturity,
                    AssetType::FCash,
                    withdrawal.fcash_claim,
                )?;
            }
        }
        scratch.commit_portfolio(account_id, portfolio);

        let mut liquidated = BalanceState::load(&scratch, account_id, currency_id);
        liquidated.net_cash_change = result
            .net_local_from_liquidator
            .add(result.net_cash_to_account);
        liquidated.net_perp_token_transfer = result.perp_tokens_transferred.negate();
        liquidated.finalize(&mut scratch, &mut self.token_adapter, false)?;

        let mut buyer = BalanceState::load(&scratch, liquidator, currency_id);
        buyer.net_cash_change = result.net_local_from_liquidator.negate();
        buyer.net_perp_token_transfer = result.perp_tokens_transferred;
        buyer.finalize(&mut scratch, &mut self.token_adapter, false)?;

        self.solvency_checker
            .check(&scratch, &self.cash_groups, liquidator, block_time)?;

        self.store = scratch;
        self.emit(
            block_time,
            EventPayload::LiquidateLocalCurrency {
                liquidated: account_id,
                liquidator,
                currency_id,
                net_local_from_liquidator: result.net_local_from_liquidator,
                perp_tokens_transferred: result.perp_tokens_transferred,
            },
        );
        if !result.perp_tokens_transferred.is_zero() {
            self.emit(
                block_time,
                EventPayload::PerpTokenChange {
                    account_id,
                    currency_id,
                    net_change: result.perp_tokens_transferred.negate(),
                },
            );
            self.emit(
                block_time,
                EventPayload::PerpTokenChange {
                    account_id: liquidator,
                    currency_id,
                    net_change: result.perp_tokens_transferred,
                },
            );
        }
        Ok(result.net_local_from_liquidator)
    }

    /// Cross-currency liquidation: local cash in, collateral cash (and perp
    /// tokens once cash runs out) out, at a discount.
    #[allow(clippy::too_many_arguments)]
    pub fn liquidate_collateral_currency(
        &mut self,
        liquidator: AccountId,
        account_id: AccountId,
        local_currency: CurrencyId,
        collateral_currency: CurrencyId,
        max_collateral: Cash,
        max_tokens: Cash,
        withdraw_collateral: bool,
        redeem_to_underlying: bool,
        block_time: Timestamp,
    ) -> Result<Cash, LedgerError> {
        if liquidator == account_id {
            return Err(LiquidationError::SelfLiquidation.into());
        }

        let mut scratch = self.store.clone();
        Self::settle_in(
            &mut scratch,
            &mut self.token_adapter,
            &self.cash_groups,
            account_id,
            block_time,
        )?;

        let factors = self.solvency_checker.liquidation_factors(
            &scratch,
            &self.cash_groups,
            account_id,
            block_time,
            local_currency,
            Some(collateral_currency),
        )?;
        let local_group = find_cash_group(&self.cash_groups, local_currency)?;
        let collateral_group = find_cash_group(&self.cash_groups, collateral_currency)?;
        let account_collateral = scratch.balance(account_id, collateral_currency);
        let result = liquidation::liquidate_collateral_currency(
            &factors,
            local_group,
            collateral_group,
            account_collateral.cash_balance,
            account_collateral.perp_token_balance,
            max_collateral,
            max_tokens,
        )?;

        let mut liquidated_local = BalanceState::load(&scratch, account_id, local_currency);
        liquidated_local.net_cash_change = result.net_local_from_liquidator;
        liquidated_local.finalize(&mut scratch, &mut self.token_adapter, false)?;

        let mut liquidated_collateral =
            BalanceState::load(&scratch, account_id, collateral_currency);
        liquidated_collateral.net_cash_change = result.net_collateral_transfer.negate();
        liquidated_collateral.net_perp_token_transfer = result.perp_tokens_transferred.negate();
        liquidated_collateral.finalize(&mut scratch, &mut self.token_adapter, false)?;

        let mut buyer_local = BalanceState::load(&scratch, liquidator, local_currency);
        buyer_local.net_cash_change = result.net_local_from_liquidator.negate();
        buyer_local.finalize(&mut scratch, &mut self.token_adapter, false)?;

        let mut buyer_collateral = BalanceState::load(&scratch, liquidator, collateral_currency);
        buyer_collateral.net_cash_change = result.net_collateral_transfer;
        buyer_collateral.net_perp_token_transfer = result.perp_tokens_transferred;
        if withdraw_collateral && result.net_collateral_transfer.is_positive() {
            buyer_collateral.withdraw(result.net_collateral_transfer)?;
        }
        buyer_collateral.finalize(&mut scratch, &mut self.token_adapter, redeem_to_underlying)?;

        self.solvency_checker
            .check(&scratch, &self.cash_groups, liquidator, block_time)?;

        self.store = scratch;
        self.emit(
            block_time,
            EventPayload::LiquidateCollateralCurrency {
                liquidated: account_id,
                liquidator,
                local_currency_id: local_currency,
                collateral_currency_id: collateral_currency,
                net_local_from_liquidator: result.net_local_from_liquidator,
                net_collateral_transfer: result.net_collateral_transfer,
            },
        );
        if !result.perp_tokens_transferred.is_zero() {
            self.emit(
                block_time,
                EventPayload::PerpTokenChange {
                    account_id,
                    currency_id: collateral_currency,
                    net_change: result.perp_tokens_transferred.negate(),
                },
            );
            self.emit(
                block_time,
                EventPayload::PerpTokenChange {
                    account_id: liquidator,
                    currency_id: collateral_currency,
                    net_change: result.perp_tokens_transferred,
                },
            );
        }
        Ok(result.net_local_from_liquidator)
    }

    /// Buy the account's positive local-currency fCash positions at a
    /// discounted present value.
    pub fn liquidate_fcash_local(
        &mut self,
        liquidator: AccountId,
        account_id: AccountId,
        currency_id: CurrencyId,
        maturities: &[Timestamp],
        max_amounts: &[Cash],
        block_time: Timestamp,
    ) -> Result<(Vec<Cash>, Cash), LedgerError> {
        if liquidator == account_id {
            return Err(LiquidationError::SelfLiquidation.into());
        }

        let mut scratch = self.store.clone();
        Self::settle_in(
            &mut scratch,
            &mut self.token_adapter,
            &self.cash_groups,
            account_id,
            block_time,
        )?;

        let factors = self.solvency_checker.liquidation_factors(
            &scratch,
            &self.cash_groups,
            account_id,
            block_time,
            currency_id,
            None,
        )?;
        let group = find_cash_group(&self.cash_groups, currency_id)?;
        let portfolio = scratch.portfolio(account_id);
        let result = liquidation::liquidate_fcash_local(
            &factors,
            group,
            &portfolio,
            block_time,
            maturities,
            max_amounts,
        )?;

        self.apply_fcash_transfers(
            &mut scratch,
            liquidator,
            account_id,
            currency_id,
            currency_id,
            maturities,
            &result,
            block_time,
        )?;
        Ok((result.notional_transfers, result.net_local_from_liquidator))
    }

    /// Buy the account's positive collateral-currency fCash positions, paying
    /// in the local currency.
    #[allow(clippy::too_many_arguments)]
    pub fn liquidate_fcash_cross_currency(
        &mut self,
        liquidator: AccountId,
        account_id: AccountId,
        local_currency: CurrencyId,
        collateral_currency: CurrencyId,
        maturities: &[Timestamp],
        max_amounts: &[Cash],
        block_time: Timestamp,
    ) -> Result<(Vec<Cash>, Cash), LedgerError> {
        if liquidator == account_id {
            return Err(LiquidationError::SelfLiquidation.into());
        }

        let mut scratch = self.store.clone();
        Self::settle_in(
            &mut scratch,
            &mut self.token_adapter,
            &self.cash_groups,
            account_id,
            block_time,
        )?;

        let factors = self.solvency_checker.liquidation_factors(
            &scratch,
            &self.cash_groups,
            account_id,
            block_time,
            local_currency,
            Some(collateral_currency),
        )?;
        let local_group = find_cash_group(&self.cash_groups, local_currency)?;
        let collateral_group = find_cash_group(&self.cash_groups, collateral_currency)?;
        let portfolio = scratch.portfolio(account_id);
        let result = liquidation::liquidate_fcash_cross_currency(
            &factors,
            local_group,
            collateral_group,
            &portfolio,
            block_time,
            maturities,
            max_amounts,
        )?;

        self.apply_fcash_transfers(
            &mut scratch,
            liquidator,
            account_id,
            local_currency,
            collateral_currency,
            maturities,
            &result,
            block_time,
        )?;
        Ok((result.notional_transfers, result.net_local_from_liquidator))
    }

    /// Shared tail of both fCash liquidation modes: move the claims, settle
    /// the local cash leg, finalize each party once, verify the liquidator,
    /// commit, emit.
    #[allow(clippy::too_many_arguments)]
    fn apply_fcash_transfers(
        &mut self,
        scratch: &mut LedgerStore,
        liquidator: AccountId,
        account_id: AccountId,
        local_currency: CurrencyId,
        fcash_currency: CurrencyId,
        maturities: &[Timestamp],
        result: &liquidation::FCashLiquidation,
        block_time: Timestamp,
    ) -> Result<(), LedgerError> {
        let mut account_portfolio = scratch.portfolio(account_id);
        let mut buyer_portfolio = scratch.portfolio(liquidator);
        for (i, transfer) in result.notional_transfers.iter().enumerate() {
            if !transfer.is_positive() {
                continue;
            }
            account_portfolio.add_asset(
                fcash_currency,
                maturities[i],
                AssetType::FCash,
                transfer.negate(),
            )?;
            buyer_portfolio.add_asset(fcash_currency, maturities[i], AssetType::FCash, *transfer)?;
        }
        scratch.commit_portfolio(account_id, account_portfolio);
        scratch.commit_portfolio(liquidator, buyer_portfolio);

        let mut liquidated = BalanceState::load(scratch, account_id, local_currency);
        liquidated.net_cash_change = result.net_local_from_liquidator;
        liquidated.finalize(scratch, &mut self.token_adapter, false)?;

        let mut buyer = BalanceState::load(scratch, liquidator, local_currency);
        buyer.net_cash_change = result.net_local_from_liquidator.negate();
        buyer.finalize(scratch, &mut self.token_adapter, false)?;

        self.solvency_checker
            .check(scratch, &self.cash_groups, liquidator, block_time)?;

        self.store = std::mem::take(scratch);
        self.emit(
            block_time,
            EventPayload::LiquidateFCash {
                liquidated: account_id,
                liquidator,
                local_currency_id: local_currency,
                fcash_currency_id: fcash_currency,
                maturities: maturities.to_vec(),
                notional_transfers: result.notional_transfers.clone(),
                net_local_from_liquidator: result.net_local_from_liquidator,
            },
        );
        Ok(())
    }
}
