// 2.0 cash_group.rs: per-currency market metadata. read-only context for valuation,
// settlement and liquidation. fetched at transaction start, never mutated here.

use crate::types::{market_tenor, Bps, Cash, CurrencyId, Rate, Timestamp, MAX_MARKET_INDEX};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CashGroupError {
    #[error("no cash group configured for currency {0:?}")]
    CashGroupNotFound(CurrencyId),

    #[error("no traded market at maturity {maturity} in currency {currency_id:?}")]
    MarketNotFound {
        currency_id: CurrencyId,
        maturity: Timestamp,
    },

    #[error("invalid cash group parameter: {0}")]
    InvalidParameter(&'static str),
}

// One traded maturity bucket: pooled asset cash and fCash backing the
// outstanding liquidity tokens, plus the oracle rate used for discounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub maturity: Timestamp,
    pub total_fcash: Cash,
    pub total_asset_cash: Cash,
    pub total_liquidity: Cash,
    pub oracle_rate: Rate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashGroup {
    pub currency_id: CurrencyId,
    // ascending by maturity, index i holds market index i+1
    pub markets: Vec<Market>,
    // discounting adjustments for solvency valuation
    pub fcash_haircut: Bps,
    pub debt_buffer: Bps,
    // liquidation pricing: must sit inside the fcash haircut so the account's
    // free collateral improves while the liquidator still buys below fair value
    pub liquidation_fcash_haircut: Bps,
    // multiplier > 1 applied to cross-currency collateral purchases
    pub liquidation_discount: Decimal,
    // perp token haircut pair: value counted for solvency vs. price paid in liquidation
    pub perp_token_haircut: Decimal,
    pub perp_token_liquidation_haircut: Decimal,
    // per-bucket liquidity token claim haircut, each < 1
    pub token_haircuts: Vec<Decimal>,
    // underlying units per one asset cash unit (wrapped token exchange rate)
    pub asset_rate: Decimal,
}

impl CashGroup {
    pub fn new(
        currency_id: CurrencyId,
        markets: Vec<Market>,
        fcash_haircut: Bps,
        debt_buffer: Bps,
        liquidation_fcash_haircut: Bps,
        liquidation_discount: Decimal,
        perp_token_haircut: Decimal,
        perp_token_liquidation_haircut: Decimal,
        token_haircuts: Vec<Decimal>,
        asset_rate: Decimal,
    ) -> Result<Self, CashGroupError> {
        if markets.len() > MAX_MARKET_INDEX as usize {
            return Err(CashGroupError::InvalidParameter("too many traded markets"));
        }
        if markets.windows(2).any(|w| w[0].maturity >= w[1].maturity) {
            return Err(CashGroupError::InvalidParameter(
                "markets must be ascending by maturity",
            ));
        }
        if liquidation_fcash_haircut.value() >= fcash_haircut.value() {
            return Err(CashGroupError::InvalidParameter(
                "liquidation fcash haircut must be below the fcash haircut",
            ));
        }
        if liquidation_discount <= Decimal::ONE {
            return Err(CashGroupError::InvalidParameter(
                "liquidation discount must exceed one",
            ));
        }
        if perp_token_liquidation_haircut <= perp_token_haircut
            || perp_token_liquidation_haircut > Decimal::ONE
        {
            return Err(CashGroupError::InvalidParameter(
                "perp token liquidation haircut must sit between the haircut and one",
            ));
        }
        if token_haircuts.len() < markets.len()
            || token_haircuts.iter().any(|h| *h >= Decimal::ONE || *h <= Decimal::ZERO)
        {
            return Err(CashGroupError::InvalidParameter(
                "token haircuts must cover every market and sit in (0, 1)",
            ));
        }
        if asset_rate <= Decimal::ZERO {
            return Err(CashGroupError::InvalidParameter("asset rate must be positive"));
        }

        Ok(Self {
            currency_id,
            markets,
            fcash_haircut,
            debt_buffer,
            liquidation_fcash_haircut,
            liquidation_discount,
            perp_token_haircut,
            perp_token_liquidation_haircut,
            token_haircuts,
            asset_rate,
        })
    }

    pub fn max_market_index(&self) -> u8 {
        self.markets.len() as u8
    }

    /// Market by 1-based market index.
    pub fn market(&self, market_index: u8) -> Result<&Market, CashGroupError> {
        if market_index == 0 {
            return Err(CashGroupError::InvalidParameter("market index is 1-based"));
        }
        self.markets.get((market_index - 1) as usize).ok_or(CashGroupError::MarketNotFound {
            currency_id: self.currency_id,
            maturity: Timestamp::from_secs(0),
        })
    }

    pub fn market_for_maturity(&self, maturity: Timestamp) -> Result<&Market, CashGroupError> {
        self.markets
            .iter()
            .find(|m| m.maturity == maturity)
            .ok_or(CashGroupError::MarketNotFound {
                currency_id: self.currency_id,
                maturity,
            })
    }

    pub fn oracle_rate(&self, maturity: Timestamp) -> Result<Rate, CashGroupError> {
        Ok(self.market_for_maturity(maturity)?.oracle_rate)
    }

    /// Claim haircut for a liquidity token bucket (1-based market index).
    pub fn token_haircut(&self, market_index: u8) -> Result<Decimal, CashGroupError> {
        if market_index == 0 {
            return Err(CashGroupError::InvalidParameter("market index is 1-based"));
        }
        self.token_haircuts
            .get((market_index - 1) as usize)
            .copied()
            .ok_or(CashGroupError::InvalidParameter("no haircut for market index"))
    }

    pub fn underlying_to_asset(&self, underlying: Cash) -> Cash {
        Cash::new(underlying.value() / self.asset_rate).trunc_internal()
    }

    pub fn asset_to_underlying(&self, asset: Cash) -> Cash {
        Cash::new(asset.value() * self.asset_rate).trunc_internal()
    }
}

/// Spot maturity of a market index as seen from `block_time`: the next 90-day
/// boundary plus the bucket tenor.
pub fn market_maturity(block_time: Timestamp, market_index: u8) -> Option<Timestamp> {
    let tenor = market_tenor(market_index)?;
    Some(Timestamp::from_secs(block_time.quarter_floor().as_secs() + tenor))
}

/// Find the group for a currency in a list sorted ascending by currency id.
pub fn find_cash_group(
    cash_groups: &[CashGroup],
    currency_id: CurrencyId,
) -> Result<&CashGroup, CashGroupError> {
    cash_groups
        .iter()
        .find(|g| g.currency_id == currency_id)
        .ok_or(CashGroupError::CashGroupNotFound(currency_id))
}

impl CashGroup {
    /// A one-market test group at 1:1 asset rate. Used across the crate's tests.
    #[doc(hidden)]
    pub fn test_group(currency_id: CurrencyId, markets: Vec<Market>) -> Self {
        let haircuts = vec![dec!(0.95); markets.len().max(1)];
        CashGroup::new(
            currency_id,
            markets,
            Bps::new(300),
            Bps::new(150),
            Bps::new(200),
            dec!(1.06),
            dec!(0.90),
            dec!(0.95),
            haircuts,
            dec!(1),
        )
        .expect("test group parameters are valid")
    }
}
