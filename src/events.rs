// 5.0: every committed state change produces an event. used for audit trails
// and notifying external systems. nothing in the engine reads these back.

use crate::types::{AccountId, Cash, CurrencyId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub block_time: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Net cash movement committed for one (account, currency). Reports the
    /// external flow when one was issued, otherwise the internal change.
    CashBalanceChange {
        account_id: AccountId,
        currency_id: CurrencyId,
        net_cash_change: Cash,
    },

    PerpTokenChange {
        account_id: AccountId,
        currency_id: CurrencyId,
        net_change: Cash,
    },

    AccountSettled {
        account_id: AccountId,
    },

    LiquidateLocalCurrency {
        liquidated: AccountId,
        liquidator: AccountId,
        currency_id: CurrencyId,
        net_local_from_liquidator: Cash,
        perp_tokens_transferred: Cash,
    },

    LiquidateCollateralCurrency {
        liquidated: AccountId,
        liquidator: AccountId,
        local_currency_id: CurrencyId,
        collateral_currency_id: CurrencyId,
        net_local_from_liquidator: Cash,
        net_collateral_transfer: Cash,
    },

    LiquidateFCash {
        liquidated: AccountId,
        liquidator: AccountId,
        local_currency_id: CurrencyId,
        fcash_currency_id: CurrencyId,
        maturities: Vec<Timestamp>,
        notional_transfers: Vec<Cash>,
        net_local_from_liquidator: Cash,
    },
}
