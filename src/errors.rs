//! Top-level error type for ledger operations.
//!
//! Every variant aborts the whole transaction: the scratch state the
//! operation was building is dropped and nothing is committed.

use crate::balance::BalanceError;
use crate::batch::BatchError;
use crate::cash_group::CashGroupError;
use crate::external::{PerpTokenError, SolvencyError, TradeError};
use crate::liquidation::LiquidationError;
use crate::portfolio::PortfolioError;
use crate::settlement::SettlementError;
use crate::token::TokenError;
use crate::types::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("caller {caller:?} is not authorized to act on account {account:?}")]
    Unauthorized {
        caller: AccountId,
        account: AccountId,
    },

    #[error("solvency check failed: {0}")]
    SolvencyCheckFailed(#[from] SolvencyError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Liquidation(#[from] LiquidationError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error(transparent)]
    CashGroup(#[from] CashGroupError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Trade(#[from] TradeError),

    #[error(transparent)]
    PerpToken(#[from] PerpTokenError),
}
