//! Liquidation transfer calculators.
//!
//! Each mode computes a bounded exchange between liquidator and account:
//! never more than the caller's caps, never more than the account holds, and
//! never more than what restores the account to solvency. The functions here
//! are pure; the ledger applies the resulting transfers and finalizes both
//! parties.
//!
//! All intermediate amounts are in underlying terms of the currency named.
//! Conversion back to asset cash happens once, at the result boundary.

use crate::cash_group::{CashGroup, CashGroupError};
use crate::external::LiquidationFactors;
use crate::math::{mul_ratio, MathError};
use crate::portfolio::PortfolioState;
use crate::types::{AssetType, Cash, Timestamp};
use crate::valuation::{liquidity_token_claims, risk_adjusted_present_value, ValuationError};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiquidationError {
    #[error("account is not undercollateralized")]
    NotUndercollateralized,

    #[error("an account cannot liquidate itself")]
    SelfLiquidation,

    #[error("no liquidatable value within the given bounds")]
    NothingToLiquidate,

    #[error("maturities and maximum amounts must have equal length")]
    InputMismatch,

    #[error("liquidation amount cap must be non-negative")]
    NegativeCap,

    #[error(transparent)]
    CashGroup(#[from] CashGroupError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    Valuation(#[from] ValuationError),
}

fn require_shortfall(factors: &LiquidationFactors) -> Result<Cash, LiquidationError> {
    let shortfall = factors.shortfall();
    if shortfall.is_zero() {
        return Err(LiquidationError::NotUndercollateralized);
    }
    Ok(shortfall)
}

fn check_cap(cap: Cash) -> Result<(), LiquidationError> {
    if cap.is_negative() {
        return Err(LiquidationError::NegativeCap);
    }
    Ok(())
}

// a zero cap means uncapped
fn apply_cap(amount: Cash, cap: Cash) -> Cash {
    if cap.is_zero() {
        amount
    } else {
        amount.min(cap)
    }
}

/// One liquidity token position unwound back into its pool claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWithdrawal {
    pub maturity: Timestamp,
    pub market_index: u8,
    /// Liquidity tokens removed from the account's position.
    pub tokens: Cash,
    /// Asset cash claim credited back to the account.
    pub cash_claim: Cash,
    /// fCash claim returned to the account's portfolio, underlying terms.
    pub fcash_claim: Cash,
}

/// Same-currency liquidation. Liquidity tokens unwind first: converting a
/// token back into its raw claims recovers the haircut slice the solvency
/// checker withheld, so the account gains collateral without giving anything
/// up. Perp tokens cover whatever shortfall remains, sold to the liquidator
/// at the liquidation haircut value, which exceeds the solvency haircut
/// value, so every token sold narrows the shortfall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalLiquidation {
    pub token_withdrawals: Vec<TokenWithdrawal>,
    /// Asset cash freed into the account by the withdrawn tokens.
    pub net_cash_to_account: Cash,
    /// Perp tokens moved from the account to the liquidator.
    pub perp_tokens_transferred: Cash,
    /// Asset cash the liquidator pays the account.
    pub net_local_from_liquidator: Cash,
}

pub fn liquidate_local_currency(
    factors: &LiquidationFactors,
    group: &CashGroup,
    portfolio: &PortfolioState,
    account_perp_tokens: Cash,
    max_tokens: Cash,
    block_time: Timestamp,
) -> Result<LocalLiquidation, LiquidationError> {
    let shortfall = require_shortfall(factors)?;
    check_cap(max_tokens)?;

    let mut remaining = shortfall;
    let mut withdrawals = Vec::new();
    let mut net_cash_to_account = Cash::zero();

    for asset in portfolio.sorted_assets() {
        if !remaining.is_positive() {
            break;
        }
        if asset.currency_id != factors.local_currency || !asset.is_liquidity_token() {
            continue;
        }
        let market_index = match asset.asset_type.market_index() {
            Some(index) => index,
            None => continue,
        };
        let market = group.market_for_maturity(asset.maturity)?;
        let haircut = group.token_haircut(market_index)?;
        let (cash_claim, fcash_claim) = liquidity_token_claims(&asset, market)?;

        // unwinding restores the haircut slice of both claims to the account
        let fcash_value = risk_adjusted_present_value(
            fcash_claim,
            asset.maturity,
            block_time,
            market.oracle_rate,
            group.fcash_haircut,
            group.debt_buffer,
        )?;
        let benefit_full = Cash::new(
            (group.asset_to_underlying(cash_claim).value() + fcash_value.value())
                * (Decimal::ONE - haircut),
        )
        .trunc_internal();
        if !benefit_full.is_positive() {
            continue;
        }

        let tokens = if benefit_full <= remaining {
            asset.notional
        } else {
            Cash::new(mul_ratio(
                asset.notional.value(),
                remaining.value(),
                benefit_full.value(),
            ))
        };
        if !tokens.is_positive() {
            continue;
        }

        let share =
            |claim: Cash| Cash::new(mul_ratio(claim.value(), tokens.value(), asset.notional.value()));
        let cash_share = share(cash_claim);
        withdrawals.push(TokenWithdrawal {
            maturity: asset.maturity,
            market_index,
            tokens,
            cash_claim: cash_share,
            fcash_claim: share(fcash_claim),
        });
        net_cash_to_account = net_cash_to_account.add(cash_share);
        remaining = remaining.sub(share(benefit_full));
    }

    // perp tokens cover what liquidity token withdrawal could not
    let mut perp_tokens = Cash::zero();
    let mut paid_underlying = Cash::zero();
    if remaining.is_positive() {
        // per-token solvency benefit: the spread between the liquidation
        // value and the haircut value the checker already credits
        let spread = group.perp_token_liquidation_haircut - group.perp_token_haircut;
        let benefit_per_token =
            Cash::new(factors.perp_token_value.value() * spread).trunc_internal();
        if benefit_per_token.is_positive() {
            let tokens_needed =
                Cash::new(remaining.value() / benefit_per_token.value()).trunc_internal();
            perp_tokens =
                apply_cap(tokens_needed, max_tokens).min(account_perp_tokens.max(Cash::zero()));
            if perp_tokens.is_positive() {
                paid_underlying = Cash::new(
                    perp_tokens.value()
                        * factors.perp_token_value.value()
                        * group.perp_token_liquidation_haircut,
                )
                .trunc_internal();
            }
        }
    }

    if withdrawals.is_empty() && !perp_tokens.is_positive() {
        return Err(LiquidationError::NothingToLiquidate);
    }

    Ok(LocalLiquidation {
        token_withdrawals: withdrawals,
        net_cash_to_account,
        perp_tokens_transferred: perp_tokens,
        net_local_from_liquidator: group.underlying_to_asset(paid_underlying),
    })
}

/// Cross-currency liquidation: the liquidator pays local cash for collateral
/// cash (and collateral perp tokens once cash runs out) at a discount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralLiquidation {
    /// Collateral asset cash moved from the account to the liquidator.
    pub net_collateral_transfer: Cash,
    /// Collateral perp tokens moved from the account to the liquidator.
    pub perp_tokens_transferred: Cash,
    /// Local asset cash the liquidator pays the account.
    pub net_local_from_liquidator: Cash,
}

pub fn liquidate_collateral_currency(
    factors: &LiquidationFactors,
    local_group: &CashGroup,
    collateral_group: &CashGroup,
    account_collateral_cash: Cash,
    account_collateral_perp_tokens: Cash,
    max_collateral: Cash,
    max_tokens: Cash,
) -> Result<CollateralLiquidation, LiquidationError> {
    let shortfall = require_shortfall(factors)?;
    check_cap(max_collateral)?;
    check_cap(max_tokens)?;

    let discount = local_group
        .liquidation_discount
        .max(collateral_group.liquidation_discount);

    // collateral the liquidator must receive to close the shortfall, with the
    // discount as its incentive
    let required = Cash::new(shortfall.value() * factors.exchange_rate * discount)
        .trunc_internal();

    let cash_available = collateral_group
        .asset_to_underlying(account_collateral_cash.max(Cash::zero()));
    let mut seized_cash = apply_cap(required, max_collateral).min(cash_available);
    if seized_cash.is_negative() {
        seized_cash = Cash::zero();
    }
    let mut remaining = required.sub(seized_cash);

    // fall through to perp tokens only when cash could not cover it
    let mut seized_tokens = Cash::zero();
    let token_price = Cash::new(
        factors.collateral_perp_token_value.value()
            * collateral_group.perp_token_liquidation_haircut,
    )
    .trunc_internal();
    if remaining.is_positive() && token_price.is_positive() {
        let tokens_needed =
            Cash::new(remaining.value() / token_price.value()).trunc_internal();
        seized_tokens = apply_cap(tokens_needed, max_tokens)
            .min(account_collateral_perp_tokens.max(Cash::zero()));
        remaining = remaining.sub(Cash::new(seized_tokens.value() * token_price.value()).trunc_internal());
    }

    let seized_total = required.sub(remaining.max(Cash::zero()));
    if !seized_total.is_positive() {
        return Err(LiquidationError::NothingToLiquidate);
    }

    let paid_local = Cash::new(
        seized_total.value() / (factors.exchange_rate * discount),
    )
    .trunc_internal();

    Ok(CollateralLiquidation {
        net_collateral_transfer: collateral_group.underlying_to_asset(seized_cash),
        perp_tokens_transferred: seized_tokens,
        net_local_from_liquidator: local_group.underlying_to_asset(paid_local),
    })
}

/// Fixed-maturity claim liquidation: the liquidator buys the account's
/// positive fCash positions at a discounted present value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FCashLiquidation {
    /// Notional transferred per requested maturity, aligned with the input.
    pub notional_transfers: Vec<Cash>,
    /// Local asset cash the liquidator pays the account.
    pub net_local_from_liquidator: Cash,
}

/// Local-currency fCash purchase. The buy price discounts at the liquidation
/// haircut rate, which sits below the valuation haircut rate, so the price
/// exceeds the risk-adjusted value the account gives up.
pub fn liquidate_fcash_local(
    factors: &LiquidationFactors,
    group: &CashGroup,
    portfolio: &PortfolioState,
    block_time: Timestamp,
    maturities: &[Timestamp],
    max_amounts: &[Cash],
) -> Result<FCashLiquidation, LiquidationError> {
    if maturities.len() != max_amounts.len() {
        return Err(LiquidationError::InputMismatch);
    }
    let shortfall = require_shortfall(factors)?;

    let mut remaining_benefit = shortfall;
    let mut transfers = vec![Cash::zero(); maturities.len()];
    let mut paid_underlying = Cash::zero();

    for (i, maturity) in maturities.iter().enumerate() {
        check_cap(max_amounts[i])?;
        if !remaining_benefit.is_positive() {
            break;
        }
        let position = match portfolio.find_asset(factors.local_currency, *maturity, AssetType::FCash)
        {
            Some(asset) if asset.notional.is_positive() => asset.notional,
            _ => continue,
        };

        let oracle = group.oracle_rate(*maturity)?;
        let time_to_maturity = block_time.seconds_until(*maturity);
        let price_factor = crate::math::discount_factor(
            time_to_maturity,
            oracle.add_bps(group.liquidation_fcash_haircut),
        )?;
        let haircut_factor = crate::math::discount_factor(
            time_to_maturity,
            oracle.add_bps(group.fcash_haircut),
        )?;
        let benefit_per_unit = price_factor - haircut_factor;
        if benefit_per_unit <= Decimal::ZERO {
            continue;
        }

        let needed =
            Cash::new(remaining_benefit.value() / benefit_per_unit).trunc_internal();
        let transfer = apply_cap(needed, max_amounts[i]).min(position);
        if !transfer.is_positive() {
            continue;
        }

        transfers[i] = transfer;
        paid_underlying = paid_underlying
            .add(Cash::new(transfer.value() * price_factor).trunc_internal());
        remaining_benefit = remaining_benefit
            .sub(Cash::new(transfer.value() * benefit_per_unit).trunc_internal());
    }

    if !paid_underlying.is_positive() {
        return Err(LiquidationError::NothingToLiquidate);
    }

    Ok(FCashLiquidation {
        notional_transfers: transfers,
        net_local_from_liquidator: group.underlying_to_asset(paid_underlying),
    })
}

/// Cross-currency fCash purchase. Mirrors collateral cash liquidation with
/// the claim priced at its liquidation discount factor instead of par.
pub fn liquidate_fcash_cross_currency(
    factors: &LiquidationFactors,
    local_group: &CashGroup,
    collateral_group: &CashGroup,
    portfolio: &PortfolioState,
    block_time: Timestamp,
    maturities: &[Timestamp],
    max_amounts: &[Cash],
) -> Result<FCashLiquidation, LiquidationError> {
    if maturities.len() != max_amounts.len() {
        return Err(LiquidationError::InputMismatch);
    }
    let shortfall = require_shortfall(factors)?;
    let collateral_currency = factors
        .collateral_currency
        .ok_or(LiquidationError::InputMismatch)?;

    let discount = local_group
        .liquidation_discount
        .max(collateral_group.liquidation_discount);
    let mut remaining = Cash::new(shortfall.value() * factors.exchange_rate * discount)
        .trunc_internal();
    // never seize more value than the collateral currency holds
    let collateral_cap = factors.collateral_available.max(Cash::zero());
    if collateral_cap < remaining {
        remaining = collateral_cap;
    }

    let mut transfers = vec![Cash::zero(); maturities.len()];
    let mut seized_underlying = Cash::zero();

    for (i, maturity) in maturities.iter().enumerate() {
        check_cap(max_amounts[i])?;
        if !remaining.is_positive() {
            break;
        }
        let position = match portfolio.find_asset(collateral_currency, *maturity, AssetType::FCash)
        {
            Some(asset) if asset.notional.is_positive() => asset.notional,
            _ => continue,
        };

        let oracle = collateral_group.oracle_rate(*maturity)?;
        let time_to_maturity = block_time.seconds_until(*maturity);
        let price_factor = crate::math::discount_factor(
            time_to_maturity,
            oracle.add_bps(collateral_group.liquidation_fcash_haircut),
        )?;

        let needed = Cash::new(remaining.value() / price_factor).trunc_internal();
        let transfer = apply_cap(needed, max_amounts[i]).min(position);
        if !transfer.is_positive() {
            continue;
        }

        let value = Cash::new(transfer.value() * price_factor).trunc_internal();
        transfers[i] = transfer;
        seized_underlying = seized_underlying.add(value);
        remaining = remaining.sub(value);
    }

    if !seized_underlying.is_positive() {
        return Err(LiquidationError::NothingToLiquidate);
    }

    let paid_local = Cash::new(
        seized_underlying.value() / (factors.exchange_rate * discount),
    )
    .trunc_internal();

    Ok(FCashLiquidation {
        notional_transfers: transfers,
        net_local_from_liquidator: local_group.underlying_to_asset(paid_local),
    })
}
