//! Portfolio state and its transaction changeset.
//!
//! A portfolio is the set of fCash and liquidity token positions one account
//! holds. During a transaction mutations are staged: stored assets carry a
//! storage tag (no-change / update / delete) and brand new assets sit in a
//! separate staging list. `commit` applies the whole changeset in one pass.

use crate::types::{AssetType, Cash, CurrencyId, Timestamp, SECONDS_IN_QUARTER};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortfolioError {
    #[error("liquidity token notional cannot go negative")]
    NegativeLiquidityToken,

    #[error("asset currency {0:?} does not match the account's designated currency")]
    CurrencyMismatch(CurrencyId),

    #[error("invalid asset type for operation")]
    InvalidAssetType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageState {
    NoChange,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioAsset {
    pub currency_id: CurrencyId,
    pub maturity: Timestamp,
    pub asset_type: AssetType,
    pub notional: Cash,
    pub storage_state: StorageState,
}

impl PortfolioAsset {
    pub fn new(
        currency_id: CurrencyId,
        maturity: Timestamp,
        asset_type: AssetType,
        notional: Cash,
    ) -> Self {
        Self {
            currency_id,
            maturity,
            asset_type,
            notional,
            storage_state: StorageState::NoChange,
        }
    }

    /// Uniqueness key within a portfolio.
    pub fn key(&self) -> (CurrencyId, Timestamp, AssetType) {
        (self.currency_id, self.maturity, self.asset_type)
    }

    pub fn is_liquidity_token(&self) -> bool {
        self.asset_type.is_liquidity_token()
    }

    /// When this asset converts to realized cash. fCash settles at maturity.
    /// Liquidity tokens cash out on the quarterly cycle: the two shortest
    /// buckets at maturity, longer buckets at the nearest 90-day boundary
    /// strictly preceding maturity.
    pub fn settlement_date(&self) -> Timestamp {
        match self.asset_type {
            AssetType::FCash => self.maturity,
            AssetType::LiquidityToken { market_index } if market_index <= 2 => self.maturity,
            AssetType::LiquidityToken { .. } => {
                let floor = self.maturity.quarter_floor();
                if floor == self.maturity {
                    Timestamp::from_secs(self.maturity.as_secs() - SECONDS_IN_QUARTER)
                } else {
                    floor
                }
            }
        }
    }
}

fn asset_order(a: &PortfolioAsset) -> (CurrencyId, Timestamp, AssetType) {
    (a.currency_id, a.maturity, a.asset_type)
}

/// A single designated currency tracked compactly, or the general asset array.
/// The two representations are mutually exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortfolioMode {
    AssetArray,
    Bitmap { currency_id: CurrencyId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub stored_assets: Vec<PortfolioAsset>,
    pub new_assets: Vec<PortfolioAsset>,
    pub mode: PortfolioMode,
}

impl PortfolioState {
    pub fn load(assets: Vec<PortfolioAsset>, mode: PortfolioMode) -> Self {
        let mut stored_assets = assets;
        stored_assets.sort_by_key(asset_order);
        Self {
            stored_assets,
            new_assets: Vec::new(),
            mode,
        }
    }

    pub fn empty(mode: PortfolioMode) -> Self {
        Self::load(Vec::new(), mode)
    }

    /// Stage a notional delta for (currency, maturity, asset type). Merges into
    /// an existing position when one exists, otherwise stages a new asset.
    pub fn add_asset(
        &mut self,
        currency_id: CurrencyId,
        maturity: Timestamp,
        asset_type: AssetType,
        notional: Cash,
    ) -> Result<(), PortfolioError> {
        if let PortfolioMode::Bitmap { currency_id: designated } = self.mode {
            if currency_id != designated {
                return Err(PortfolioError::CurrencyMismatch(currency_id));
            }
        }

        let key = (currency_id, maturity, asset_type);
        for asset in self
            .stored_assets
            .iter_mut()
            .filter(|a| a.storage_state != StorageState::Delete)
            .chain(self.new_assets.iter_mut())
        {
            if asset.key() == key {
                let combined = asset.notional.add(notional);
                if asset_type.is_liquidity_token() && combined.is_negative() {
                    return Err(PortfolioError::NegativeLiquidityToken);
                }
                asset.notional = combined;
                if asset.storage_state == StorageState::NoChange {
                    asset.storage_state = StorageState::Update;
                }
                return Ok(());
            }
        }

        if asset_type.is_liquidity_token() && notional.is_negative() {
            return Err(PortfolioError::NegativeLiquidityToken);
        }
        if !notional.is_zero() {
            self.new_assets
                .push(PortfolioAsset::new(currency_id, maturity, asset_type, notional));
        }
        Ok(())
    }

    /// Tag a stored asset for deletion.
    pub fn delete_asset(&mut self, index: usize) {
        if let Some(asset) = self.stored_assets.get_mut(index) {
            asset.storage_state = StorageState::Delete;
        }
    }

    /// Live assets in sorted order: stored minus deletions plus staged.
    pub fn sorted_assets(&self) -> Vec<PortfolioAsset> {
        let mut assets: Vec<PortfolioAsset> = self
            .stored_assets
            .iter()
            .filter(|a| a.storage_state != StorageState::Delete && !a.notional.is_zero())
            .chain(self.new_assets.iter().filter(|a| !a.notional.is_zero()))
            .cloned()
            .collect();
        assets.sort_by_key(asset_order);
        assets
    }

    pub fn find_asset(
        &self,
        currency_id: CurrencyId,
        maturity: Timestamp,
        asset_type: AssetType,
    ) -> Option<&PortfolioAsset> {
        let key = (currency_id, maturity, asset_type);
        self.stored_assets
            .iter()
            .filter(|a| a.storage_state != StorageState::Delete)
            .chain(self.new_assets.iter())
            .find(|a| a.key() == key)
    }

    /// True when any fCash position is a liability.
    pub fn has_debt(&self) -> bool {
        self.sorted_assets()
            .iter()
            .any(|a| a.asset_type == AssetType::FCash && a.notional.is_negative())
    }

    /// Earliest settlement date across live assets, if any remain.
    pub fn next_settle_time(&self) -> Option<Timestamp> {
        self.sorted_assets()
            .iter()
            .map(PortfolioAsset::settlement_date)
            .min()
    }

    /// Apply the changeset: drop deletions and zeroed positions, merge staged
    /// assets, clear all storage tags. Returns the persisted asset list.
    pub fn commit(self) -> Vec<PortfolioAsset> {
        let mut assets = self.sorted_assets();
        for asset in &mut assets {
            asset.storage_state = StorageState::NoChange;
        }
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn fcash(ccy: u16, quarters: i64, notional: i64) -> PortfolioAsset {
        PortfolioAsset::new(
            CurrencyId(ccy),
            Timestamp::from_secs(quarters * SECONDS_IN_QUARTER),
            AssetType::FCash,
            Cash::new(Decimal::from(notional)),
        )
    }

    #[test]
    fn settlement_date_fcash_is_maturity() {
        let asset = fcash(1, 4, 100);
        assert_eq!(asset.settlement_date(), asset.maturity);
    }

    #[test]
    fn settlement_date_short_tokens_is_maturity() {
        for index in [1u8, 2] {
            let token = PortfolioAsset::new(
                CurrencyId(1),
                Timestamp::from_secs(4 * SECONDS_IN_QUARTER),
                AssetType::liquidity_token(index).unwrap(),
                Cash::new(dec!(10)),
            );
            assert_eq!(token.settlement_date(), token.maturity);
        }
    }

    #[test]
    fn settlement_date_long_tokens_at_preceding_boundary() {
        let aligned = PortfolioAsset::new(
            CurrencyId(1),
            Timestamp::from_secs(8 * SECONDS_IN_QUARTER),
            AssetType::liquidity_token(4).unwrap(),
            Cash::new(dec!(10)),
        );
        assert_eq!(
            aligned.settlement_date().as_secs(),
            7 * SECONDS_IN_QUARTER
        );

        let unaligned = PortfolioAsset::new(
            CurrencyId(1),
            Timestamp::from_secs(8 * SECONDS_IN_QUARTER + 5),
            AssetType::liquidity_token(4).unwrap(),
            Cash::new(dec!(10)),
        );
        assert_eq!(
            unaligned.settlement_date().as_secs(),
            8 * SECONDS_IN_QUARTER
        );
    }

    #[test]
    fn add_asset_merges_by_key() {
        let mut state = PortfolioState::load(vec![fcash(1, 4, 100)], PortfolioMode::AssetArray);
        state
            .add_asset(
                CurrencyId(1),
                Timestamp::from_secs(4 * SECONDS_IN_QUARTER),
                AssetType::FCash,
                Cash::new(dec!(-40)),
            )
            .unwrap();

        let assets = state.sorted_assets();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].notional.value(), dec!(60));
        assert_eq!(state.stored_assets[0].storage_state, StorageState::Update);
    }

    #[test]
    fn liquidity_tokens_cannot_go_negative() {
        let mut state = PortfolioState::empty(PortfolioMode::AssetArray);
        let result = state.add_asset(
            CurrencyId(1),
            Timestamp::from_secs(SECONDS_IN_QUARTER),
            AssetType::liquidity_token(1).unwrap(),
            Cash::new(dec!(-1)),
        );
        assert_eq!(result, Err(PortfolioError::NegativeLiquidityToken));
    }

    #[test]
    fn bitmap_mode_rejects_foreign_currency() {
        let mut state = PortfolioState::empty(PortfolioMode::Bitmap {
            currency_id: CurrencyId(1),
        });
        let result = state.add_asset(
            CurrencyId(2),
            Timestamp::from_secs(SECONDS_IN_QUARTER),
            AssetType::FCash,
            Cash::new(dec!(5)),
        );
        assert_eq!(result, Err(PortfolioError::CurrencyMismatch(CurrencyId(2))));
    }

    #[test]
    fn commit_drops_deleted_and_zeroed() {
        let mut state = PortfolioState::load(
            vec![fcash(1, 4, 100), fcash(1, 8, 50), fcash(2, 4, -20)],
            PortfolioMode::AssetArray,
        );
        state.delete_asset(0);
        state
            .add_asset(
                CurrencyId(1),
                Timestamp::from_secs(8 * SECONDS_IN_QUARTER),
                AssetType::FCash,
                Cash::new(dec!(-50)),
            )
            .unwrap();

        let committed = state.commit();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].currency_id, CurrencyId(2));
        assert_eq!(committed[0].storage_state, StorageState::NoChange);
    }

    #[test]
    fn debt_and_settle_time_flags() {
        let state = PortfolioState::load(
            vec![fcash(1, 4, 100), fcash(2, 2, -20)],
            PortfolioMode::AssetArray,
        );
        assert!(state.has_debt());
        assert_eq!(
            state.next_settle_time().unwrap().as_secs(),
            2 * SECONDS_IN_QUARTER
        );
        assert!(PortfolioState::empty(PortfolioMode::AssetArray)
            .next_settle_time()
            .is_none());
    }
}
