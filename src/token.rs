//! Token kinds, precision conversion, and the external transfer seam.
//!
//! Every currency has one listed token the ledger custodies. Conversions
//! between the token's native decimals and the internal 8-decimal precision
//! truncate toward zero, which makes the dust rule asymmetric on purpose:
//! deposits credit the truncated internal amount (the protocol keeps the
//! residue), withdrawals pay the truncated external amount and debit only its
//! internal equivalent (the user keeps the residue).

use crate::types::{AccountId, Cash, CurrencyId, INTERNAL_TOKEN_DECIMALS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("no token listed for currency {0:?}")]
    UnknownCurrency(CurrencyId),

    #[error("transfer failed for currency {currency_id:?}: {reason}")]
    TransferFailed {
        currency_id: CurrencyId,
        reason: String,
    },

    #[error("token for currency {0:?} cannot be minted or redeemed")]
    NotMintable(CurrencyId),
}

// What the listed token is. behavior differences are selected by match, there
// is no common transfer path shared across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Plain asset held 1:1, no wrapping layer.
    NonMintable,
    /// Interest-bearing wrapper over an underlying token.
    Wrapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub decimals: u32,
    pub has_transfer_fee: bool,
}

impl Token {
    pub fn new(kind: TokenKind, decimals: u32) -> Self {
        Self {
            kind,
            decimals,
            has_transfer_fee: false,
        }
    }

    pub fn with_transfer_fee(mut self) -> Self {
        self.has_transfer_fee = true;
        self
    }

    /// External amount at the token's native decimals to internal precision,
    /// truncating toward zero.
    pub fn convert_to_internal(&self, external: Decimal) -> Cash {
        Cash::new(external.trunc_with_scale(INTERNAL_TOKEN_DECIMALS))
    }

    /// Internal amount to the token's native decimals, truncating toward zero.
    pub fn convert_to_external(&self, internal: Cash) -> Decimal {
        internal.value().trunc_with_scale(self.decimals)
    }
}

/// External token movement. Implementations must report the amounts actually
/// moved so transfer-fee tokens never silently over-credit.
pub trait TokenAdapter {
    fn token(&self, currency_id: CurrencyId) -> Result<Token, TokenError>;

    /// Positive pulls from the holder into protocol custody, negative pays
    /// out. Returns the actual signed amount received or paid after fees.
    fn transfer(
        &mut self,
        currency_id: CurrencyId,
        holder: AccountId,
        amount_external: Decimal,
    ) -> Result<Decimal, TokenError>;

    /// Pull underlying from the holder and wrap it. Returns wrapped received.
    fn mint(
        &mut self,
        currency_id: CurrencyId,
        holder: AccountId,
        amount_external: Decimal,
    ) -> Result<Decimal, TokenError>;

    /// Unwrap and pay underlying out to the holder. Returns underlying paid.
    fn redeem(
        &mut self,
        currency_id: CurrencyId,
        holder: AccountId,
        amount_external: Decimal,
    ) -> Result<Decimal, TokenError>;
}

// In memory token adapter for tests and simulation. Wallet balances per
// (currency, holder) plus a protocol custody balance per currency.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokenAdapter {
    tokens: HashMap<CurrencyId, Token>,
    wallets: HashMap<(CurrencyId, AccountId), Decimal>,
    custody: HashMap<CurrencyId, Decimal>,
    // fee fraction charged on transfers of fee tokens, e.g. 0.01
    transfer_fee_rate: Decimal,
    // underlying units exchanged per wrapped unit on mint/redeem
    mint_rates: HashMap<CurrencyId, Decimal>,
}

impl InMemoryTokenAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_token(&mut self, currency_id: CurrencyId, token: Token) {
        self.tokens.insert(currency_id, token);
        self.mint_rates.entry(currency_id).or_insert(Decimal::ONE);
    }

    pub fn set_transfer_fee_rate(&mut self, rate: Decimal) {
        self.transfer_fee_rate = rate;
    }

    pub fn set_mint_rate(&mut self, currency_id: CurrencyId, rate: Decimal) {
        self.mint_rates.insert(currency_id, rate);
    }

    pub fn fund_wallet(&mut self, currency_id: CurrencyId, holder: AccountId, amount: Decimal) {
        *self.wallets.entry((currency_id, holder)).or_insert(Decimal::ZERO) += amount;
    }

    pub fn fund_custody(&mut self, currency_id: CurrencyId, amount: Decimal) {
        *self.custody.entry(currency_id).or_insert(Decimal::ZERO) += amount;
    }

    pub fn wallet_balance(&self, currency_id: CurrencyId, holder: AccountId) -> Decimal {
        self.wallets
            .get(&(currency_id, holder))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn custody_balance(&self, currency_id: CurrencyId) -> Decimal {
        self.custody.get(&currency_id).copied().unwrap_or(Decimal::ZERO)
    }
}

impl TokenAdapter for InMemoryTokenAdapter {
    fn token(&self, currency_id: CurrencyId) -> Result<Token, TokenError> {
        self.tokens
            .get(&currency_id)
            .copied()
            .ok_or(TokenError::UnknownCurrency(currency_id))
    }

    fn transfer(
        &mut self,
        currency_id: CurrencyId,
        holder: AccountId,
        amount_external: Decimal,
    ) -> Result<Decimal, TokenError> {
        let token = self.token(currency_id)?;

        if amount_external >= Decimal::ZERO {
            let wallet = self.wallets.entry((currency_id, holder)).or_insert(Decimal::ZERO);
            if *wallet < amount_external {
                return Err(TokenError::TransferFailed {
                    currency_id,
                    reason: format!("wallet has {wallet}, needs {amount_external}"),
                });
            }
            *wallet -= amount_external;

            let received = if token.has_transfer_fee {
                amount_external * (Decimal::ONE - self.transfer_fee_rate)
            } else {
                amount_external
            };
            *self.custody.entry(currency_id).or_insert(Decimal::ZERO) += received;
            Ok(received)
        } else {
            let outbound = -amount_external;
            let custody = self.custody.entry(currency_id).or_insert(Decimal::ZERO);
            if *custody < outbound {
                return Err(TokenError::TransferFailed {
                    currency_id,
                    reason: format!("custody has {custody}, needs {outbound}"),
                });
            }
            *custody -= outbound;
            *self.wallets.entry((currency_id, holder)).or_insert(Decimal::ZERO) += outbound;
            Ok(amount_external)
        }
    }

    fn mint(
        &mut self,
        currency_id: CurrencyId,
        holder: AccountId,
        amount_external: Decimal,
    ) -> Result<Decimal, TokenError> {
        let token = self.token(currency_id)?;
        if token.kind != TokenKind::Wrapped {
            // a non-mintable token deposits as-is
            return self.transfer(currency_id, holder, amount_external);
        }

        let wallet = self.wallets.entry((currency_id, holder)).or_insert(Decimal::ZERO);
        if *wallet < amount_external {
            return Err(TokenError::TransferFailed {
                currency_id,
                reason: format!("wallet has {wallet}, needs {amount_external}"),
            });
        }
        *wallet -= amount_external;

        let rate = self.mint_rates.get(&currency_id).copied().unwrap_or(Decimal::ONE);
        let minted = amount_external / rate;
        *self.custody.entry(currency_id).or_insert(Decimal::ZERO) += minted;
        Ok(minted)
    }

    fn redeem(
        &mut self,
        currency_id: CurrencyId,
        holder: AccountId,
        amount_external: Decimal,
    ) -> Result<Decimal, TokenError> {
        let token = self.token(currency_id)?;
        if token.kind != TokenKind::Wrapped {
            return Err(TokenError::NotMintable(currency_id));
        }

        let custody = self.custody.entry(currency_id).or_insert(Decimal::ZERO);
        if *custody < amount_external {
            return Err(TokenError::TransferFailed {
                currency_id,
                reason: format!("custody has {custody}, needs {amount_external}"),
            });
        }
        *custody -= amount_external;

        let rate = self.mint_rates.get(&currency_id).copied().unwrap_or(Decimal::ONE);
        let underlying = amount_external * rate;
        *self.wallets.entry((currency_id, holder)).or_insert(Decimal::ZERO) += underlying;
        Ok(underlying)
    }
}
