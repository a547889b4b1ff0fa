//! Conversion of matured portfolio positions into cash balances.
//!
//! Runs at the start of any transaction whose account has crossed its next
//! settlement time. Matured fCash realizes its face value, matured liquidity
//! tokens unwind into their pool claims. The whole pass is idempotent: settled
//! assets are tagged for deletion, so a second pass finds nothing to do.

use crate::cash_group::{find_cash_group, CashGroup, CashGroupError};
use crate::portfolio::{PortfolioError, PortfolioState, StorageState};
use crate::types::{AssetType, Cash, CurrencyId, Timestamp};
use crate::valuation::{liquidity_token_claims, ValuationError};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    CashGroup(#[from] CashGroupError),

    #[error(transparent)]
    Valuation(#[from] ValuationError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),
}

/// Cash realized by settlement, in asset cash terms, per currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledCashDelta {
    pub currency_id: CurrencyId,
    pub net_cash_change: Cash,
}

/// Settle every position whose settlement date has passed. Returns realized
/// cash deltas sorted ascending by currency, one entry per currency touched.
///
/// A liquidity token that settles before its market matures leaves its fCash
/// claim behind as a portfolio position at the original maturity; once the
/// maturity itself has passed the claim realizes as cash directly.
pub fn settle_portfolio(
    portfolio: &mut PortfolioState,
    cash_groups: &[CashGroup],
    block_time: Timestamp,
) -> Result<Vec<SettledCashDelta>, SettlementError> {
    let mut deltas: BTreeMap<CurrencyId, Cash> = BTreeMap::new();
    let mut residual_fcash: Vec<(CurrencyId, Timestamp, Cash)> = Vec::new();

    for index in 0..portfolio.stored_assets.len() {
        let asset = portfolio.stored_assets[index].clone();
        if asset.storage_state == StorageState::Delete || asset.notional.is_zero() {
            continue;
        }
        if asset.settlement_date() > block_time {
            continue;
        }

        let group = find_cash_group(cash_groups, asset.currency_id)?;
        let entry = deltas.entry(asset.currency_id).or_default();

        match asset.asset_type {
            AssetType::FCash => {
                *entry = entry.add(group.underlying_to_asset(asset.notional));
            }
            AssetType::LiquidityToken { .. } => {
                let market = group.market_for_maturity(asset.maturity)?;
                let (cash_claim, fcash_claim) = liquidity_token_claims(&asset, market)?;
                *entry = entry.add(cash_claim);
                if asset.maturity <= block_time {
                    *entry = entry.add(group.underlying_to_asset(fcash_claim));
                } else {
                    residual_fcash.push((asset.currency_id, asset.maturity, fcash_claim));
                }
            }
        }
        portfolio.delete_asset(index);
    }

    for (currency_id, maturity, notional) in residual_fcash {
        portfolio.add_asset(currency_id, maturity, AssetType::FCash, notional)?;
    }

    Ok(deltas
        .into_iter()
        .filter(|(_, cash)| !cash.is_zero())
        .map(|(currency_id, net_cash_change)| SettledCashDelta {
            currency_id,
            net_cash_change,
        })
        .collect())
}
