// 1.0: all the primitives live here. nothing in the ledger works without these types.
// IDs, internal-precision cash, annualized rates, maturities. each is a newtype so
// the compiler catches type mixups.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

pub const SECONDS_IN_DAY: i64 = 86_400;
pub const SECONDS_IN_QUARTER: i64 = 90 * SECONDS_IN_DAY;
// financial year is 360 days so quarters divide it evenly
pub const SECONDS_IN_YEAR: i64 = 360 * SECONDS_IN_DAY;

/// Decimal places of the protocol's uniform internal cash precision.
pub const INTERNAL_TOKEN_DECIMALS: u32 = 8;

pub const MAX_MARKET_INDEX: u8 = 9;

// traded market tenors by market index (1-based), in days
const MARKET_TENOR_DAYS: [i64; 9] = [90, 180, 360, 720, 1800, 2520, 3600, 5400, 7200];

/// Seconds from market inception to maturity for a traded market index (1..=9).
pub fn market_tenor(market_index: u8) -> Option<i64> {
    if market_index == 0 || market_index > MAX_MARKET_INDEX {
        return None;
    }
    Some(MARKET_TENOR_DAYS[(market_index - 1) as usize] * SECONDS_IN_DAY)
}

// 1.1: signed cash amount at internal precision. balances, claims, present values
// and settlement deltas all use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cash(Decimal);

impl Cash {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn add(&self, other: Cash) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Cash) -> Self {
        Self(self.0 - other.0)
    }

    pub fn mul(&self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    pub fn negate(&self) -> Self {
        Self(-self.0)
    }

    pub fn min(&self, other: Cash) -> Self {
        Self(self.0.min(other.0))
    }

    pub fn max(&self, other: Cash) -> Self {
        Self(self.0.max(other.0))
    }

    /// Truncates sub-precision digits toward zero. Conversions own all rounding,
    /// arithmetic stays exact.
    pub fn trunc_internal(&self) -> Self {
        Self(self.0.trunc_with_scale(INTERNAL_TOKEN_DECIMALS))
    }
}

impl Default for Cash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Cash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Cash {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cash {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sum for Cash {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, c| acc.add(c))
    }
}

// 1.2: annualized interest rate as a fraction. 0.05 = 5% per 360-day year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rate(Decimal);

impl Rate {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn add_bps(&self, bps: Bps) -> Self {
        Self(self.0 + bps.as_fraction())
    }

    pub fn sub_bps(&self, bps: Bps) -> Self {
        Self(self.0 - bps.as_fraction())
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.3: basis points. 100 bps = 1%. haircuts and buffers are configured in bps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bps(pub i64);

impl Bps {
    pub fn new(bps: i64) -> Self {
        Self(bps)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(self.0, 4)
    }
}

// 1.4: second-resolution timestamp. maturities and settlement dates are aligned
// to 90-day boundaries from the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Seconds from `self` until `maturity`, negative once matured.
    pub fn seconds_until(&self, maturity: Timestamp) -> i64 {
        maturity.0 - self.0
    }

    /// The most recent 90-day boundary at or before this time.
    pub fn quarter_floor(&self) -> Self {
        Self(self.0 - self.0.rem_euclid(SECONDS_IN_QUARTER))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.5: asset type tag. fCash is a fixed claim at maturity; a liquidity token is a
// pro-rata claim on one traded market's pooled cash and fCash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssetType {
    FCash,
    LiquidityToken { market_index: u8 },
}

impl AssetType {
    pub fn liquidity_token(market_index: u8) -> Option<Self> {
        if market_index == 0 || market_index > MAX_MARKET_INDEX {
            return None;
        }
        Some(AssetType::LiquidityToken { market_index })
    }

    pub fn is_liquidity_token(&self) -> bool {
        matches!(self, AssetType::LiquidityToken { .. })
    }

    pub fn market_index(&self) -> Option<u8> {
        match self {
            AssetType::FCash => None,
            AssetType::LiquidityToken { market_index } => Some(*market_index),
        }
    }
}
