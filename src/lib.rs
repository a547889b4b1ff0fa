// fcash-core: accounting engine for fixed-rate lending.
// settlement-first architecture: matured claims realize before anything else
// touches a balance. all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: CurrencyId, AccountId, Cash, Rate, Timestamp
//   2.x  cash_group.rs: per-currency markets and risk parameters
//   3.x  account.rs: per-account context flags (next settle time, debt)
//   4.x  store.rs: persisted balance/portfolio/context records
//   5.x  events.rs: state transition events for audit
//   6.x  math.rs: continuous discounting, truncating ratio math
//   7.x  portfolio.rs: fCash/liquidity token positions and the changeset
//   8.x  valuation.rs: present value, risk-adjusted value, token claims
//   9.x  token.rs: external token precision and transfer seam
//   10.x balance.rs: per-currency balance state within one transaction
//   11.x settlement.rs: matured position realization
//   12.x batch.rs: ordered per-currency action processing
//   13.x liquidation.rs: three bounded liquidation modes
//   14.x external.rs: solvency, trade execution, perp token pool seams
//   15.x ledger.rs: the operation surface, one atomic unit per call
//   15.1 errors.rs: top-level error fold

// accounting core
pub mod account;
pub mod balance;
pub mod cash_group;
pub mod events;
pub mod math;
pub mod portfolio;
pub mod settlement;
pub mod store;
pub mod types;
pub mod valuation;

// operation surface
pub mod batch;
pub mod errors;
pub mod ledger;
pub mod liquidation;

// integration seams
pub mod external;
pub mod token;

// re exports for convenience
pub use account::*;
pub use balance::*;
pub use batch::*;
pub use cash_group::*;
pub use errors::*;
pub use events::*;
pub use ledger::*;
pub use liquidation::*;
pub use math::*;
pub use portfolio::*;
pub use settlement::*;
pub use store::*;
pub use types::*;
pub use valuation::*;
pub use external::{
    FixedRatePerpTokenAdapter, HaircutSolvencyChecker, LiquidationFactors,
    OracleRateTradeExecutor, PerpTokenAdapter, PerpTokenError, SolvencyChecker, SolvencyError,
    TradeError, TradeExecutor, TradeOutcome, TradeRequest,
};
pub use token::{InMemoryTokenAdapter, Token, TokenAdapter, TokenError, TokenKind};
