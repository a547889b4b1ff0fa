//! Present value and risk-adjusted present value of portfolio assets.
//!
//! Valuation is deliberately asymmetric for solvency purposes: positive fCash
//! is discounted harder (haircut added to the rate), negative fCash is
//! discounted softer (buffer subtracted from the rate) and floored at its full
//! undiscounted notional. Liquidity tokens value as pro-rata claims on their
//! market's pooled cash and fCash, with the fCash claim netted against any
//! exact-matching fCash position so the same exposure is never valued twice.

use crate::cash_group::{find_cash_group, CashGroup, CashGroupError, Market};
use crate::math::{discount_factor, MathError};
use crate::portfolio::PortfolioAsset;
use crate::types::{Bps, Cash, CurrencyId, Rate, Timestamp};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValuationError {
    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    CashGroup(#[from] CashGroupError),

    #[error("asset at maturity {maturity} has matured at block time {block_time}, settle first")]
    AssetMatured {
        maturity: Timestamp,
        block_time: Timestamp,
    },

    #[error("invalid asset type for claim calculation")]
    InvalidAssetType,

    #[error("portfolio assets are not sorted by currency then maturity")]
    UnsortedPortfolio,
}

/// `notional * e^(-rate * t)`, in underlying terms.
pub fn present_value(
    notional: Cash,
    maturity: Timestamp,
    block_time: Timestamp,
    oracle_rate: Rate,
) -> Result<Cash, ValuationError> {
    if notional.is_zero() {
        return Ok(Cash::zero());
    }
    if maturity <= block_time {
        return Err(ValuationError::AssetMatured {
            maturity,
            block_time,
        });
    }

    let factor = discount_factor(block_time.seconds_until(maturity), oracle_rate)?;
    Ok(notional.mul(factor).trunc_internal())
}

/// Conservative present value. Assets discount at `rate + haircut`; liabilities
/// discount at `rate - buffer`, floored at full notional once the buffer
/// swallows the rate (debt close to maturity is never worth less than face).
pub fn risk_adjusted_present_value(
    notional: Cash,
    maturity: Timestamp,
    block_time: Timestamp,
    oracle_rate: Rate,
    fcash_haircut: Bps,
    debt_buffer: Bps,
) -> Result<Cash, ValuationError> {
    if notional.is_zero() {
        return Ok(Cash::zero());
    }

    if notional.is_positive() {
        return present_value(notional, maturity, block_time, oracle_rate.add_bps(fcash_haircut));
    }

    if debt_buffer.as_fraction() >= oracle_rate.value() {
        return Ok(notional);
    }
    present_value(notional, maturity, block_time, oracle_rate.sub_bps(debt_buffer))
}

/// Pro-rata share of a market's pooled asset cash and fCash:
/// `(cash claim in asset terms, fCash claim in underlying terms)`.
pub fn liquidity_token_claims(
    token: &PortfolioAsset,
    market: &Market,
) -> Result<(Cash, Cash), ValuationError> {
    if !token.is_liquidity_token() || !token.notional.is_positive() {
        return Err(ValuationError::InvalidAssetType);
    }

    let share = |total: Cash| {
        Cash::new(crate::math::mul_ratio(
            token.notional.value(),
            total.value(),
            market.total_liquidity.value(),
        ))
    };
    Ok((share(market.total_asset_cash), share(market.total_fcash)))
}

/// Claims scaled by the bucket's haircut (< 1). Used wherever a conservative
/// collateral value is required.
pub fn haircut_liquidity_token_claims(
    token: &PortfolioAsset,
    market: &Market,
    haircut: Decimal,
) -> Result<(Cash, Cash), ValuationError> {
    let (cash_claim, fcash_claim) = liquidity_token_claims(token, market)?;
    Ok((
        cash_claim.mul(haircut).trunc_internal(),
        fcash_claim.mul(haircut).trunc_internal(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuationMode {
    /// Oracle-rate discounting, raw liquidity token claims.
    Fair,
    /// Haircut and buffer adjusted discounting, haircut token claims.
    RiskAdjusted,
}

/// Per-currency portfolio value in asset cash terms.
///
/// Requires `assets` sorted by (currency, maturity, asset type) and
/// `cash_groups` sorted by currency id (gaps allowed). One forward pass: each
/// liquidity token's fCash claim is netted into an exact-matching fCash
/// position before discounting, then the currency's underlying total converts
/// to asset terms at the group boundary.
pub fn portfolio_value(
    assets: &[PortfolioAsset],
    cash_groups: &[CashGroup],
    block_time: Timestamp,
    mode: ValuationMode,
) -> Result<Vec<(CurrencyId, Cash)>, ValuationError> {
    if assets
        .windows(2)
        .any(|w| (w[0].currency_id, w[0].maturity) > (w[1].currency_id, w[1].maturity))
    {
        return Err(ValuationError::UnsortedPortfolio);
    }

    let mut results = Vec::new();
    let mut i = 0;
    while i < assets.len() {
        let currency_id = assets[i].currency_id;
        let group = find_cash_group(cash_groups, currency_id)?;

        let start = i;
        while i < assets.len() && assets[i].currency_id == currency_id {
            i += 1;
        }
        let slice = &assets[start..i];

        // fCash exposure per maturity, including netted token claims
        let mut fcash_by_maturity: Vec<(Timestamp, Cash)> = slice
            .iter()
            .filter(|a| !a.is_liquidity_token())
            .map(|a| (a.maturity, a.notional))
            .collect();

        let mut asset_cash_total = Cash::zero();
        for token in slice.iter().filter(|a| a.is_liquidity_token()) {
            let market = group.market_for_maturity(token.maturity)?;
            let (cash_claim, fcash_claim) = match mode {
                ValuationMode::Fair => liquidity_token_claims(token, market)?,
                ValuationMode::RiskAdjusted => {
                    let haircut = group.token_haircut(
                        token.asset_type.market_index().ok_or(ValuationError::InvalidAssetType)?,
                    )?;
                    haircut_liquidity_token_claims(token, market, haircut)?
                }
            };
            asset_cash_total = asset_cash_total.add(cash_claim);

            match fcash_by_maturity.iter_mut().find(|(m, _)| *m == token.maturity) {
                Some((_, notional)) => *notional = notional.add(fcash_claim),
                None => fcash_by_maturity.push((token.maturity, fcash_claim)),
            }
        }

        let mut underlying_pv = Cash::zero();
        for (maturity, notional) in fcash_by_maturity {
            let oracle_rate = group.oracle_rate(maturity)?;
            let pv = match mode {
                ValuationMode::Fair => present_value(notional, maturity, block_time, oracle_rate)?,
                ValuationMode::RiskAdjusted => risk_adjusted_present_value(
                    notional,
                    maturity,
                    block_time,
                    oracle_rate,
                    group.fcash_haircut,
                    group.debt_buffer,
                )?,
            };
            underlying_pv = underlying_pv.add(pv);
        }

        let total = asset_cash_total.add(group.underlying_to_asset(underlying_pv));
        results.push((currency_id, total));
    }

    Ok(results)
}
