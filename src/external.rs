//! Collaborator seams the ledger depends on but does not implement: solvency
//! aggregation across currencies, market trade execution, and the perp token
//! (pooled liquidity share) mint/redeem path.
//!
//! Reference implementations here are deliberately simple and deterministic.
//! They are what the integration tests run against.

use crate::cash_group::{find_cash_group, CashGroup, CashGroupError};
use crate::math::{discount_factor, MathError};
use crate::store::LedgerStore;
use crate::types::{AccountId, AssetType, Cash, CurrencyId, Rate, Timestamp};
use crate::valuation::{portfolio_value, ValuationError, ValuationMode};
use rust_decimal::Decimal;
use std::collections::HashMap;

// 1. solvency

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolvencyError {
    #[error("account {account_id:?} is undercollateralized by {shortfall} base units")]
    Undercollateralized {
        account_id: AccountId,
        shortfall: Cash,
    },

    #[error("no exchange rate configured for currency {0:?}")]
    MissingExchangeRate(CurrencyId),

    #[error(transparent)]
    CashGroup(#[from] CashGroupError),

    #[error(transparent)]
    Valuation(#[from] ValuationError),
}

/// Inputs a liquidation needs, computed by the solvency checker in one pass.
/// All cash amounts are in underlying terms of the currency they describe.
#[derive(Debug, Clone)]
pub struct LiquidationFactors {
    pub account_id: AccountId,
    pub local_currency: CurrencyId,
    pub collateral_currency: Option<CurrencyId>,
    /// Aggregate free collateral in local underlying. Negative means the
    /// account is eligible for liquidation.
    pub net_free_collateral: Cash,
    /// Net risk-adjusted value held in the local currency.
    pub local_available: Cash,
    /// Net risk-adjusted value held in the collateral currency, zero when no
    /// collateral currency was requested.
    pub collateral_available: Cash,
    /// Collateral underlying units per one local underlying unit.
    pub exchange_rate: Decimal,
    /// Underlying value of one perp token in the local currency.
    pub perp_token_value: Cash,
    /// Underlying value of one perp token in the collateral currency, zero
    /// when no collateral currency was requested.
    pub collateral_perp_token_value: Cash,
}

impl LiquidationFactors {
    pub fn shortfall(&self) -> Cash {
        self.net_free_collateral.negate().max(Cash::zero())
    }
}

pub trait SolvencyChecker {
    /// Fails with `Undercollateralized` when the account's aggregate
    /// risk-adjusted value across all currencies is negative.
    fn check(
        &self,
        store: &LedgerStore,
        cash_groups: &[CashGroup],
        account_id: AccountId,
        block_time: Timestamp,
    ) -> Result<(), SolvencyError>;

    fn liquidation_factors(
        &self,
        store: &LedgerStore,
        cash_groups: &[CashGroup],
        account_id: AccountId,
        block_time: Timestamp,
        local_currency: CurrencyId,
        collateral_currency: Option<CurrencyId>,
    ) -> Result<LiquidationFactors, SolvencyError>;
}

/// Reference checker: risk-adjusted portfolio value plus cash plus haircut
/// perp token value per currency, converted to a base currency through fixed
/// exchange rates and summed.
#[derive(Debug, Clone, Default)]
pub struct HaircutSolvencyChecker {
    // base units per one underlying unit of the currency
    exchange_rates: HashMap<CurrencyId, Decimal>,
    // asset cash per perp token
    perp_token_values: HashMap<CurrencyId, Decimal>,
}

impl HaircutSolvencyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exchange_rate(&mut self, currency_id: CurrencyId, base_per_unit: Decimal) {
        self.exchange_rates.insert(currency_id, base_per_unit);
    }

    pub fn set_perp_token_value(&mut self, currency_id: CurrencyId, asset_cash_per_token: Decimal) {
        self.perp_token_values.insert(currency_id, asset_cash_per_token);
    }

    fn rate(&self, currency_id: CurrencyId) -> Result<Decimal, SolvencyError> {
        self.exchange_rates
            .get(&currency_id)
            .copied()
            .ok_or(SolvencyError::MissingExchangeRate(currency_id))
    }

    fn perp_token_value(&self, currency_id: CurrencyId) -> Decimal {
        self.perp_token_values
            .get(&currency_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Net risk-adjusted value in one currency, underlying terms. `haircut`
    /// selects haircut or liquidation-haircut treatment of perp tokens.
    fn currency_value(
        &self,
        store: &LedgerStore,
        cash_groups: &[CashGroup],
        account_id: AccountId,
        currency_id: CurrencyId,
        portfolio_values: &[(CurrencyId, Cash)],
    ) -> Result<Cash, SolvencyError> {
        let group = find_cash_group(cash_groups, currency_id)?;
        let balance = store.balance(account_id, currency_id);

        let portfolio_asset_cash = portfolio_values
            .iter()
            .find(|(c, _)| *c == currency_id)
            .map(|(_, v)| *v)
            .unwrap_or_default();

        let perp_asset_cash = Cash::new(
            balance.perp_token_balance.value()
                * self.perp_token_value(currency_id)
                * group.perp_token_haircut,
        )
        .trunc_internal();

        let total_asset_cash = balance
            .cash_balance
            .add(portfolio_asset_cash)
            .add(perp_asset_cash);
        Ok(group.asset_to_underlying(total_asset_cash))
    }

    fn aggregate(
        &self,
        store: &LedgerStore,
        cash_groups: &[CashGroup],
        account_id: AccountId,
        block_time: Timestamp,
    ) -> Result<(Cash, HashMap<CurrencyId, Cash>), SolvencyError> {
        let portfolio = store.portfolio(account_id);
        let assets = portfolio.sorted_assets();
        let portfolio_values =
            portfolio_value(&assets, cash_groups, block_time, ValuationMode::RiskAdjusted)?;

        let mut currencies: Vec<CurrencyId> = store.active_currencies(account_id);
        for (currency_id, _) in &portfolio_values {
            if !currencies.contains(currency_id) {
                currencies.push(*currency_id);
            }
        }
        currencies.sort();

        let mut base_total = Cash::zero();
        let mut per_currency = HashMap::new();
        for currency_id in currencies {
            let value = self.currency_value(
                store,
                cash_groups,
                account_id,
                currency_id,
                &portfolio_values,
            )?;
            base_total = base_total.add(Cash::new(value.value() * self.rate(currency_id)?));
            per_currency.insert(currency_id, value);
        }
        Ok((base_total, per_currency))
    }
}

impl SolvencyChecker for HaircutSolvencyChecker {
    fn check(
        &self,
        store: &LedgerStore,
        cash_groups: &[CashGroup],
        account_id: AccountId,
        block_time: Timestamp,
    ) -> Result<(), SolvencyError> {
        let (base_total, _) = self.aggregate(store, cash_groups, account_id, block_time)?;
        if base_total.is_negative() {
            return Err(SolvencyError::Undercollateralized {
                account_id,
                shortfall: base_total.negate(),
            });
        }
        Ok(())
    }

    fn liquidation_factors(
        &self,
        store: &LedgerStore,
        cash_groups: &[CashGroup],
        account_id: AccountId,
        block_time: Timestamp,
        local_currency: CurrencyId,
        collateral_currency: Option<CurrencyId>,
    ) -> Result<LiquidationFactors, SolvencyError> {
        let (base_total, per_currency) =
            self.aggregate(store, cash_groups, account_id, block_time)?;

        let local_rate = self.rate(local_currency)?;
        let net_free_collateral = Cash::new(base_total.value() / local_rate).trunc_internal();

        let local_available = per_currency
            .get(&local_currency)
            .copied()
            .unwrap_or_default();
        let collateral_available = collateral_currency
            .and_then(|c| per_currency.get(&c).copied())
            .unwrap_or_default();

        let exchange_rate = match collateral_currency {
            Some(collateral) => local_rate / self.rate(collateral)?,
            None => Decimal::ONE,
        };

        let local_group = find_cash_group(cash_groups, local_currency)?;
        let perp_token_value = local_group.asset_to_underlying(
            Cash::new(self.perp_token_value(local_currency)).trunc_internal(),
        );
        let collateral_perp_token_value = match collateral_currency {
            Some(collateral) => find_cash_group(cash_groups, collateral)?.asset_to_underlying(
                Cash::new(self.perp_token_value(collateral)).trunc_internal(),
            ),
            None => Cash::zero(),
        };

        Ok(LiquidationFactors {
            account_id,
            local_currency,
            collateral_currency,
            net_free_collateral,
            local_available,
            collateral_available,
            exchange_rate,
            perp_token_value,
            collateral_perp_token_value,
        })
    }
}

// 2. trade execution

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TradeError {
    #[error("no market at index {market_index} for currency {currency_id:?}")]
    UnknownMarket {
        currency_id: CurrencyId,
        market_index: u8,
    },

    #[error("trade amount must be positive")]
    NonPositiveAmount,

    #[error("rate limit exceeded: implied {implied}, limit {limit}")]
    SlippageExceeded { implied: Rate, limit: Rate },

    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    CashGroup(#[from] CashGroupError),
}

/// One market trade within a batch action. Notional amounts are positive;
/// direction is carried by the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeRequest {
    Lend {
        market_index: u8,
        notional: Cash,
        min_rate: Option<Rate>,
    },
    Borrow {
        market_index: u8,
        notional: Cash,
        max_rate: Option<Rate>,
    },
    AddLiquidity {
        market_index: u8,
        asset_cash: Cash,
    },
    RemoveLiquidity {
        market_index: u8,
        tokens: Cash,
    },
}

/// What a trade did to the account: an asset cash delta on the balance and
/// portfolio position deltas at specific maturities.
#[derive(Debug, Clone, Default)]
pub struct TradeOutcome {
    pub cash_change: Cash,
    pub position_changes: Vec<(Timestamp, AssetType, Cash)>,
}

pub trait TradeExecutor {
    fn execute(
        &mut self,
        cash_groups: &[CashGroup],
        currency_id: CurrencyId,
        block_time: Timestamp,
        trade: &TradeRequest,
    ) -> Result<TradeOutcome, TradeError>;
}

/// Reference executor that prices fCash at the market oracle rate with no
/// price impact. Liquidity trades exchange cash for pool share pro rata.
#[derive(Debug, Clone, Default)]
pub struct OracleRateTradeExecutor;

impl OracleRateTradeExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl TradeExecutor for OracleRateTradeExecutor {
    fn execute(
        &mut self,
        cash_groups: &[CashGroup],
        currency_id: CurrencyId,
        block_time: Timestamp,
        trade: &TradeRequest,
    ) -> Result<TradeOutcome, TradeError> {
        let group = find_cash_group(cash_groups, currency_id)?;
        let market_index = match trade {
            TradeRequest::Lend { market_index, .. }
            | TradeRequest::Borrow { market_index, .. }
            | TradeRequest::AddLiquidity { market_index, .. }
            | TradeRequest::RemoveLiquidity { market_index, .. } => *market_index,
        };
        let market = group.market(market_index).map_err(|_| TradeError::UnknownMarket {
            currency_id,
            market_index,
        })?;
        let time_to_maturity = block_time.seconds_until(market.maturity);

        match trade {
            TradeRequest::Lend {
                notional, min_rate, ..
            } => {
                if !notional.is_positive() {
                    return Err(TradeError::NonPositiveAmount);
                }
                if let Some(limit) = min_rate {
                    if market.oracle_rate < *limit {
                        return Err(TradeError::SlippageExceeded {
                            implied: market.oracle_rate,
                            limit: *limit,
                        });
                    }
                }
                let factor = discount_factor(time_to_maturity, market.oracle_rate)?;
                let cost = group
                    .underlying_to_asset(Cash::new(notional.value() * factor).trunc_internal());
                Ok(TradeOutcome {
                    cash_change: cost.negate(),
                    position_changes: vec![(market.maturity, AssetType::FCash, *notional)],
                })
            }
            TradeRequest::Borrow {
                notional, max_rate, ..
            } => {
                if !notional.is_positive() {
                    return Err(TradeError::NonPositiveAmount);
                }
                if let Some(limit) = max_rate {
                    if market.oracle_rate > *limit {
                        return Err(TradeError::SlippageExceeded {
                            implied: market.oracle_rate,
                            limit: *limit,
                        });
                    }
                }
                let factor = discount_factor(time_to_maturity, market.oracle_rate)?;
                let proceeds = group
                    .underlying_to_asset(Cash::new(notional.value() * factor).trunc_internal());
                Ok(TradeOutcome {
                    cash_change: proceeds,
                    position_changes: vec![(market.maturity, AssetType::FCash, notional.negate())],
                })
            }
            TradeRequest::AddLiquidity { asset_cash, .. } => {
                if !asset_cash.is_positive() {
                    return Err(TradeError::NonPositiveAmount);
                }
                // tokens minted pro rata against the pool's cash side
                let tokens = Cash::new(
                    asset_cash.value() * market.total_liquidity.value()
                        / market.total_asset_cash.value(),
                )
                .trunc_internal();
                let fcash_share = Cash::new(
                    tokens.value() * market.total_fcash.value() / market.total_liquidity.value(),
                )
                .trunc_internal();
                Ok(TradeOutcome {
                    cash_change: asset_cash.negate(),
                    position_changes: vec![
                        (
                            market.maturity,
                            AssetType::LiquidityToken { market_index },
                            tokens,
                        ),
                        // matching negative fCash offsets the pool's claim
                        (market.maturity, AssetType::FCash, fcash_share.negate()),
                    ],
                })
            }
            TradeRequest::RemoveLiquidity { tokens, .. } => {
                if !tokens.is_positive() {
                    return Err(TradeError::NonPositiveAmount);
                }
                let cash_out = Cash::new(
                    tokens.value() * market.total_asset_cash.value()
                        / market.total_liquidity.value(),
                )
                .trunc_internal();
                let fcash_out = Cash::new(
                    tokens.value() * market.total_fcash.value() / market.total_liquidity.value(),
                )
                .trunc_internal();
                Ok(TradeOutcome {
                    cash_change: cash_out,
                    position_changes: vec![
                        (
                            market.maturity,
                            AssetType::LiquidityToken { market_index },
                            tokens.negate(),
                        ),
                        (market.maturity, AssetType::FCash, fcash_out),
                    ],
                })
            }
        }
    }
}

// 3. perp token pool

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PerpTokenError {
    #[error("no perp token pool for currency {0:?}")]
    UnknownCurrency(CurrencyId),

    #[error("amount must be positive")]
    NonPositiveAmount,
}

pub trait PerpTokenAdapter {
    /// Deposit asset cash into the pool, returns tokens minted.
    fn mint(&mut self, currency_id: CurrencyId, asset_cash: Cash) -> Result<Cash, PerpTokenError>;

    /// Burn tokens, returns asset cash released.
    fn redeem(&mut self, currency_id: CurrencyId, tokens: Cash) -> Result<Cash, PerpTokenError>;
}

/// Pool that mints and redeems at a fixed asset cash per token rate.
#[derive(Debug, Clone, Default)]
pub struct FixedRatePerpTokenAdapter {
    rates: HashMap<CurrencyId, Decimal>,
}

impl FixedRatePerpTokenAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rate(&mut self, currency_id: CurrencyId, asset_cash_per_token: Decimal) {
        self.rates.insert(currency_id, asset_cash_per_token);
    }

    fn rate(&self, currency_id: CurrencyId) -> Result<Decimal, PerpTokenError> {
        self.rates
            .get(&currency_id)
            .copied()
            .ok_or(PerpTokenError::UnknownCurrency(currency_id))
    }
}

impl PerpTokenAdapter for FixedRatePerpTokenAdapter {
    fn mint(&mut self, currency_id: CurrencyId, asset_cash: Cash) -> Result<Cash, PerpTokenError> {
        if !asset_cash.is_positive() {
            return Err(PerpTokenError::NonPositiveAmount);
        }
        let rate = self.rate(currency_id)?;
        Ok(Cash::new(asset_cash.value() / rate).trunc_internal())
    }

    fn redeem(&mut self, currency_id: CurrencyId, tokens: Cash) -> Result<Cash, PerpTokenError> {
        if !tokens.is_positive() {
            return Err(PerpTokenError::NonPositiveAmount);
        }
        let rate = self.rate(currency_id)?;
        Ok(Cash::new(tokens.value() * rate).trunc_internal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cash_group::Market;
    use crate::store::BalanceRecord;
    use crate::types::SECONDS_IN_QUARTER;
    use rust_decimal_macros::dec;

    const LOCAL: CurrencyId = CurrencyId(1);
    const COLLATERAL: CurrencyId = CurrencyId(2);
    const ACCT: AccountId = AccountId(7);

    fn market(quarters: i64) -> Market {
        Market {
            maturity: Timestamp::from_secs(quarters * SECONDS_IN_QUARTER),
            total_fcash: Cash::new(dec!(1000)),
            total_asset_cash: Cash::new(dec!(2000)),
            total_liquidity: Cash::new(dec!(1000)),
            oracle_rate: Rate::new(dec!(0.05)),
        }
    }

    fn groups() -> Vec<CashGroup> {
        vec![
            CashGroup::test_group(LOCAL, vec![market(4)]),
            CashGroup::test_group(COLLATERAL, vec![market(4)]),
        ]
    }

    fn checker() -> HaircutSolvencyChecker {
        let mut checker = HaircutSolvencyChecker::new();
        checker.set_exchange_rate(LOCAL, dec!(1));
        checker.set_exchange_rate(COLLATERAL, dec!(2));
        checker
    }

    #[test]
    fn positive_cash_passes_check() {
        let mut store = LedgerStore::new();
        store.set_balance(
            ACCT,
            LOCAL,
            BalanceRecord {
                cash_balance: Cash::new(dec!(100)),
                perp_token_balance: Cash::zero(),
            },
        );
        checker()
            .check(&store, &groups(), ACCT, Timestamp::from_secs(0))
            .unwrap();
    }

    #[test]
    fn collateral_in_one_currency_covers_debt_in_another() {
        let mut store = LedgerStore::new();
        store.set_balance(
            ACCT,
            LOCAL,
            BalanceRecord {
                cash_balance: Cash::new(dec!(-100)),
                perp_token_balance: Cash::zero(),
            },
        );
        store.set_balance(
            ACCT,
            COLLATERAL,
            BalanceRecord {
                cash_balance: Cash::new(dec!(60)),
                perp_token_balance: Cash::zero(),
            },
        );

        // -100 base from local, +120 base from collateral
        checker()
            .check(&store, &groups(), ACCT, Timestamp::from_secs(0))
            .unwrap();

        store.set_balance(
            ACCT,
            COLLATERAL,
            BalanceRecord {
                cash_balance: Cash::new(dec!(40)),
                perp_token_balance: Cash::zero(),
            },
        );
        let result = checker().check(&store, &groups(), ACCT, Timestamp::from_secs(0));
        assert!(matches!(
            result,
            Err(SolvencyError::Undercollateralized { shortfall, .. }) if shortfall.value() == dec!(20)
        ));
    }

    #[test]
    fn factors_report_shortfall_in_local_terms() {
        let mut store = LedgerStore::new();
        store.set_balance(
            ACCT,
            LOCAL,
            BalanceRecord {
                cash_balance: Cash::new(dec!(-100)),
                perp_token_balance: Cash::zero(),
            },
        );
        store.set_balance(
            ACCT,
            COLLATERAL,
            BalanceRecord {
                cash_balance: Cash::new(dec!(30)),
                perp_token_balance: Cash::zero(),
            },
        );

        let factors = checker()
            .liquidation_factors(
                &store,
                &groups(),
                ACCT,
                Timestamp::from_secs(0),
                LOCAL,
                Some(COLLATERAL),
            )
            .unwrap();

        assert_eq!(factors.net_free_collateral.value(), dec!(-40));
        assert_eq!(factors.shortfall().value(), dec!(40));
        assert_eq!(factors.local_available.value(), dec!(-100));
        assert_eq!(factors.collateral_available.value(), dec!(30));
        // one local unit buys half a collateral unit
        assert_eq!(factors.exchange_rate, dec!(0.5));
    }

    #[test]
    fn perp_tokens_counted_with_haircut() {
        let mut store = LedgerStore::new();
        store.set_balance(
            ACCT,
            LOCAL,
            BalanceRecord {
                cash_balance: Cash::new(dec!(-85)),
                perp_token_balance: Cash::new(dec!(100)),
            },
        );
        let mut checker = checker();
        checker.set_perp_token_value(LOCAL, dec!(1));

        // 100 tokens at value 1 with 0.90 haircut covers 90
        checker
            .check(&store, &groups(), ACCT, Timestamp::from_secs(0))
            .unwrap();

        store.set_balance(
            ACCT,
            LOCAL,
            BalanceRecord {
                cash_balance: Cash::new(dec!(-95)),
                perp_token_balance: Cash::new(dec!(100)),
            },
        );
        assert!(checker
            .check(&store, &groups(), ACCT, Timestamp::from_secs(0))
            .is_err());
    }

    #[test]
    fn lend_trade_prices_at_oracle_rate() {
        let mut executor = OracleRateTradeExecutor::new();
        let outcome = executor
            .execute(
                &groups(),
                LOCAL,
                Timestamp::from_secs(0),
                &TradeRequest::Lend {
                    market_index: 1,
                    notional: Cash::new(dec!(100)),
                    min_rate: None,
                },
            )
            .unwrap();

        // e^(-0.05) of 100, negated
        assert!(outcome.cash_change.value() < dec!(-95.1));
        assert!(outcome.cash_change.value() > dec!(-95.2));
        assert_eq!(outcome.position_changes.len(), 1);
        assert_eq!(outcome.position_changes[0].2.value(), dec!(100));
    }

    #[test]
    fn borrow_respects_rate_limit() {
        let mut executor = OracleRateTradeExecutor::new();
        let result = executor.execute(
            &groups(),
            LOCAL,
            Timestamp::from_secs(0),
            &TradeRequest::Borrow {
                market_index: 1,
                notional: Cash::new(dec!(100)),
                max_rate: Some(Rate::new(dec!(0.04))),
            },
        );
        assert!(matches!(result, Err(TradeError::SlippageExceeded { .. })));
    }

    #[test]
    fn liquidity_round_trip_is_symmetric() {
        let mut executor = OracleRateTradeExecutor::new();
        let added = executor
            .execute(
                &groups(),
                LOCAL,
                Timestamp::from_secs(0),
                &TradeRequest::AddLiquidity {
                    market_index: 1,
                    asset_cash: Cash::new(dec!(200)),
                },
            )
            .unwrap();

        // pool is 2 cash per liquidity unit, so 200 cash mints 100 tokens
        let tokens = added.position_changes[0].2;
        assert_eq!(tokens.value(), dec!(100));
        // offsetting fCash equals the pool share of the fCash side
        assert_eq!(added.position_changes[1].2.value(), dec!(-100));

        let removed = executor
            .execute(
                &groups(),
                LOCAL,
                Timestamp::from_secs(0),
                &TradeRequest::RemoveLiquidity {
                    market_index: 1,
                    tokens,
                },
            )
            .unwrap();
        assert_eq!(removed.cash_change.value(), dec!(200));
        assert_eq!(removed.position_changes[1].2.value(), dec!(100));
    }

    #[test]
    fn fixed_rate_pool_mint_redeem() {
        let mut pool = FixedRatePerpTokenAdapter::new();
        pool.set_rate(LOCAL, dec!(2));

        assert_eq!(pool.mint(LOCAL, Cash::new(dec!(100))).unwrap().value(), dec!(50));
        assert_eq!(pool.redeem(LOCAL, Cash::new(dec!(50))).unwrap().value(), dec!(100));
        assert!(matches!(
            pool.mint(COLLATERAL, Cash::new(dec!(1))),
            Err(PerpTokenError::UnknownCurrency(_))
        ));
    }
}
