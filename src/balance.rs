//! Per-currency balance state for one account within one transaction.
//!
//! Constructed fresh from storage at transaction start, mutated through
//! pending deltas, committed exactly once by `finalize`. The effective cash
//! balance at any point is `stored + net_cash_change + net_asset_transfer`,
//! and cash-consuming actions must never drive it negative.

use crate::store::{BalanceRecord, LedgerStore};
use crate::token::{TokenAdapter, TokenError, TokenKind};
use crate::types::{AccountId, Cash, CurrencyId};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("insufficient cash: required {required}, available {available}")]
    InsufficientCash { required: Cash, available: Cash },

    #[error("insufficient token balance: required {required}, available {available}")]
    InsufficientTokenBalance { required: Cash, available: Cash },

    #[error("amount must be non-negative")]
    NegativeAmount,

    #[error(transparent)]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone)]
pub struct BalanceState {
    pub account_id: AccountId,
    pub currency_id: CurrencyId,
    pub stored_cash_balance: Cash,
    pub stored_perp_token_balance: Cash,
    // pending deltas, all zero at load time
    pub net_cash_change: Cash,
    pub net_asset_transfer_internal: Cash,
    pub net_perp_token_transfer: Cash,
    pub net_perp_token_supply_change: Cash,
}

/// What `finalize` committed: the net withdrawal paid out and the amount the
/// balance-change event should report.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeOutcome {
    pub withdrawn: Cash,
    pub event_amount: Cash,
    pub perp_token_change: Cash,
}

impl BalanceState {
    pub fn load(store: &LedgerStore, account_id: AccountId, currency_id: CurrencyId) -> Self {
        let record = store.balance(account_id, currency_id);
        Self {
            account_id,
            currency_id,
            stored_cash_balance: record.cash_balance,
            stored_perp_token_balance: record.perp_token_balance,
            net_cash_change: Cash::zero(),
            net_asset_transfer_internal: Cash::zero(),
            net_perp_token_transfer: Cash::zero(),
            net_perp_token_supply_change: Cash::zero(),
        }
    }

    /// Load and fold a pending settlement cash delta in, so settlement and this
    /// transaction's deposits combine before any sufficiency check.
    pub fn load_with_settlement(
        store: &LedgerStore,
        account_id: AccountId,
        currency_id: CurrencyId,
        settled_cash: Cash,
    ) -> Self {
        let mut state = Self::load(store, account_id, currency_id);
        state.net_cash_change = settled_cash;
        state
    }

    pub fn effective_cash(&self) -> Cash {
        self.stored_cash_balance
            .add(self.net_cash_change)
            .add(self.net_asset_transfer_internal)
    }

    pub fn effective_perp_tokens(&self) -> Cash {
        self.stored_perp_token_balance
            .add(self.net_perp_token_transfer)
            .add(self.net_perp_token_supply_change)
    }

    pub fn check_sufficient_cash(&self, amount: Cash) -> Result<(), BalanceError> {
        if amount.is_negative() {
            return Err(BalanceError::NegativeAmount);
        }
        let available = self.effective_cash();
        if available < amount {
            return Err(BalanceError::InsufficientCash {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    /// Deposit the currency's listed asset token. Fee tokens must transfer
    /// immediately so only the amount actually received is credited; clean
    /// tokens stage the transfer for `finalize`.
    pub fn deposit_asset_token<A: TokenAdapter>(
        &mut self,
        adapter: &mut A,
        amount_external: Decimal,
    ) -> Result<Cash, BalanceError> {
        if amount_external < Decimal::ZERO {
            return Err(BalanceError::NegativeAmount);
        }
        let token = adapter.token(self.currency_id)?;

        if token.has_transfer_fee {
            let actual = adapter.transfer(self.currency_id, self.account_id, amount_external)?;
            let internal = token.convert_to_internal(actual);
            self.net_cash_change = self.net_cash_change.add(internal);
            Ok(internal)
        } else {
            let internal = token.convert_to_internal(amount_external);
            self.net_asset_transfer_internal = self.net_asset_transfer_internal.add(internal);
            Ok(internal)
        }
    }

    /// Deposit underlying and wrap it through the adapter. Credits the internal
    /// value of what was actually minted.
    pub fn deposit_underlying_token<A: TokenAdapter>(
        &mut self,
        adapter: &mut A,
        amount_external: Decimal,
    ) -> Result<Cash, BalanceError> {
        if amount_external < Decimal::ZERO {
            return Err(BalanceError::NegativeAmount);
        }
        let token = adapter.token(self.currency_id)?;
        let minted = adapter.mint(self.currency_id, self.account_id, amount_external)?;
        let internal = token.convert_to_internal(minted);
        self.net_cash_change = self.net_cash_change.add(internal);
        Ok(internal)
    }

    /// Stage a perp token mint funded from this balance's cash.
    pub fn stage_perp_token_mint(
        &mut self,
        cash_used: Cash,
        tokens_minted: Cash,
    ) -> Result<(), BalanceError> {
        self.check_sufficient_cash(cash_used)?;
        self.net_cash_change = self.net_cash_change.sub(cash_used);
        self.net_perp_token_supply_change =
            self.net_perp_token_supply_change.add(tokens_minted);
        Ok(())
    }

    /// Stage a perp token redemption crediting this balance's cash.
    pub fn stage_perp_token_redeem(
        &mut self,
        tokens_redeemed: Cash,
        cash_received: Cash,
    ) -> Result<(), BalanceError> {
        if tokens_redeemed.is_negative() {
            return Err(BalanceError::NegativeAmount);
        }
        let available = self.effective_perp_tokens();
        if available < tokens_redeemed {
            return Err(BalanceError::InsufficientTokenBalance {
                required: tokens_redeemed,
                available,
            });
        }
        self.net_perp_token_supply_change =
            self.net_perp_token_supply_change.sub(tokens_redeemed);
        self.net_cash_change = self.net_cash_change.add(cash_received);
        Ok(())
    }

    /// Stage a fixed withdrawal. The amount must be covered by the effective
    /// cash balance so a withdrawal cannot mint a new debt.
    pub fn withdraw(&mut self, amount_internal: Cash) -> Result<(), BalanceError> {
        self.check_sufficient_cash(amount_internal)?;
        self.net_asset_transfer_internal =
            self.net_asset_transfer_internal.sub(amount_internal);
        Ok(())
    }

    /// Stage withdrawal of the entire effective balance, clamped at zero when
    /// the balance is a net debt. Returns the amount staged.
    pub fn withdraw_entire(&mut self) -> Cash {
        let amount = self.effective_cash().max(Cash::zero());
        self.net_asset_transfer_internal = self.net_asset_transfer_internal.sub(amount);
        amount
    }

    /// Commit all pending deltas and issue the external transfer for the net
    /// asset movement. Deposits credit the amount actually received; a
    /// withdrawal pays the truncated external amount and debits only its
    /// internal equivalent, leaving sub-precision residue with the user.
    pub fn finalize<A: TokenAdapter>(
        self,
        store: &mut LedgerStore,
        adapter: &mut A,
        redeem_to_underlying: bool,
    ) -> Result<FinalizeOutcome, BalanceError> {
        let transfer = self.net_asset_transfer_internal;
        let mut credited = Cash::zero();
        let mut debited = Cash::zero();

        if !transfer.is_zero() {
            let token = adapter.token(self.currency_id)?;
            if transfer.is_positive() {
                let external = token.convert_to_external(transfer);
                let actual = adapter.transfer(self.currency_id, self.account_id, external)?;
                credited = token.convert_to_internal(actual);
            } else {
                let external = token.convert_to_external(transfer.abs());
                if redeem_to_underlying && token.kind == TokenKind::Wrapped {
                    adapter.redeem(self.currency_id, self.account_id, external)?;
                } else {
                    adapter.transfer(self.currency_id, self.account_id, -external)?;
                }
                debited = token.convert_to_internal(external);
            }
        }

        let cash_balance = self
            .stored_cash_balance
            .add(self.net_cash_change)
            .add(credited)
            .sub(debited);

        let perp_token_change = self
            .net_perp_token_transfer
            .add(self.net_perp_token_supply_change);
        let perp_token_balance = self.stored_perp_token_balance.add(perp_token_change);
        if perp_token_balance.is_negative() {
            return Err(BalanceError::InsufficientTokenBalance {
                required: perp_token_change.abs(),
                available: self.stored_perp_token_balance,
            });
        }

        store.set_balance(
            self.account_id,
            self.currency_id,
            BalanceRecord {
                cash_balance,
                perp_token_balance,
            },
        );
        if !self.net_perp_token_supply_change.is_zero() {
            store.adjust_perp_token_supply(self.currency_id, self.net_perp_token_supply_change);
        }

        let event_amount = if !transfer.is_zero() {
            credited.sub(debited)
        } else {
            self.net_cash_change
        };

        Ok(FinalizeOutcome {
            withdrawn: debited,
            event_amount,
            perp_token_change,
        })
    }
}
