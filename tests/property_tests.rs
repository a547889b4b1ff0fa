//! Property-based tests for the valuation and conversion math.
//!
//! These tests verify invariants hold under random inputs.

use fcash_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn notional_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000_000i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 to 10M
}

fn rate_strategy() -> impl Strategy<Value = Rate> {
    (1i64..2_000i64).prop_map(|x| Rate::new(Decimal::new(x, 4))) // 0.01% to 20%
}

fn bps_strategy() -> impl Strategy<Value = Bps> {
    (1i64..500i64).prop_map(Bps::new) // 1 to 500 bps
}

fn tenor_strategy() -> impl Strategy<Value = i64> {
    (1i64..3_600i64).prop_map(|days| days * SECONDS_IN_DAY) // 1 day to 10 years
}

proptest! {
    /// Discounting a positive claim never pays more than face value and
    /// never goes to zero or negative.
    #[test]
    fn present_value_bounded_by_notional(
        notional in notional_strategy(),
        rate in rate_strategy(),
        tenor in tenor_strategy(),
    ) {
        let pv = present_value(
            Cash::new(notional),
            Timestamp::from_secs(tenor),
            Timestamp::from_secs(0),
            rate,
        ).unwrap();

        prop_assert!(pv.is_positive());
        prop_assert!(pv.value() <= notional);
    }

    /// The asset haircut only ever reduces a positive claim's value.
    #[test]
    fn risk_adjusted_value_is_conservative(
        notional in notional_strategy(),
        rate in rate_strategy(),
        haircut in bps_strategy(),
        tenor in tenor_strategy(),
    ) {
        let maturity = Timestamp::from_secs(tenor);
        let block_time = Timestamp::from_secs(0);

        let fair = present_value(Cash::new(notional), maturity, block_time, rate).unwrap();
        let adjusted = risk_adjusted_present_value(
            Cash::new(notional),
            maturity,
            block_time,
            rate,
            haircut,
            Bps::new(150),
        ).unwrap();

        prop_assert!(adjusted <= fair, "adjusted {adjusted} > fair {fair}");
        prop_assert!(adjusted.is_positive());
    }

    /// A liability's risk-adjusted magnitude is at least the fair magnitude,
    /// and exactly face value once the buffer swallows the whole rate.
    #[test]
    fn liability_buffer_never_understates_debt(
        notional in notional_strategy(),
        rate in rate_strategy(),
        buffer in bps_strategy(),
        tenor in tenor_strategy(),
    ) {
        let maturity = Timestamp::from_secs(tenor);
        let block_time = Timestamp::from_secs(0);
        let debt = Cash::new(-notional);

        let fair = present_value(debt, maturity, block_time, rate).unwrap();
        let adjusted = risk_adjusted_present_value(
            debt,
            maturity,
            block_time,
            rate,
            Bps::new(300),
            buffer,
        ).unwrap();

        prop_assert!(adjusted.abs() >= fair.abs());
        prop_assert!(adjusted.abs() <= debt.abs());

        if buffer.as_fraction() >= rate.value() {
            prop_assert_eq!(adjusted, debt);
        }
    }

    /// Haircut pool claims are strictly below the raw claims for any
    /// haircut under one.
    #[test]
    fn haircut_claims_below_raw_claims(
        tokens in 1i64..1_000i64,
        haircut_pct in 1i64..100i64,
    ) {
        let market = Market {
            maturity: Timestamp::from_secs(4 * SECONDS_IN_QUARTER),
            total_fcash: Cash::new(dec!(100000)),
            total_asset_cash: Cash::new(dec!(250000)),
            total_liquidity: Cash::new(dec!(100000)),
            oracle_rate: Rate::new(dec!(0.05)),
        };
        let token = PortfolioAsset::new(
            CurrencyId(1),
            market.maturity,
            AssetType::liquidity_token(1).unwrap(),
            Cash::new(Decimal::from(tokens)),
        );
        let haircut = Decimal::new(haircut_pct, 2);

        let (raw_cash, raw_fcash) = liquidity_token_claims(&token, &market).unwrap();
        let (cut_cash, cut_fcash) =
            haircut_liquidity_token_claims(&token, &market, haircut).unwrap();

        prop_assert!(cut_cash < raw_cash);
        prop_assert!(cut_fcash < raw_fcash);
    }

    /// External/internal precision round trips lose at most truncation dust
    /// and never flip sign.
    #[test]
    fn conversion_round_trip_dust_bounded(
        raw in 1i64..1_000_000_000_000i64,
        scale in 0u32..12u32,
        decimals in 0u32..18u32,
    ) {
        let token = Token::new(TokenKind::NonMintable, decimals);
        let external = Decimal::new(raw, scale);

        let internal = token.convert_to_internal(external);
        let back = token.convert_to_external(internal);

        prop_assert!(back >= Decimal::ZERO);
        prop_assert!(back <= external);
        let max_dust = Decimal::new(1, decimals.min(8));
        prop_assert!(external - back < max_dust, "dust {} over {}", external - back, max_dust);
    }

    /// The continuous discount factor stays in (0, 1] for non-negative rates.
    #[test]
    fn discount_factor_in_unit_interval(
        rate in rate_strategy(),
        tenor in tenor_strategy(),
    ) {
        let factor = discount_factor(tenor, rate).unwrap();
        prop_assert!(factor > Decimal::ZERO);
        prop_assert!(factor <= Decimal::ONE);
    }

    /// Local liquidation never seizes more than the caller cap or the
    /// account's holdings, and the payment is positive.
    #[test]
    fn local_liquidation_respects_bounds(
        shortfall in 1i64..10_000i64,
        held in 1i64..10_000i64,
        cap in 0i64..10_000i64,
    ) {
        let group = CashGroup::test_group(
            CurrencyId(1),
            vec![Market {
                maturity: Timestamp::from_secs(4 * SECONDS_IN_QUARTER),
                total_fcash: Cash::new(dec!(1000)),
                total_asset_cash: Cash::new(dec!(2000)),
                total_liquidity: Cash::new(dec!(1000)),
                oracle_rate: Rate::new(dec!(0.05)),
            }],
        );
        let factors = LiquidationFactors {
            account_id: AccountId(1),
            local_currency: CurrencyId(1),
            collateral_currency: None,
            net_free_collateral: Cash::new(Decimal::from(-shortfall)),
            local_available: Cash::new(Decimal::from(-shortfall)),
            collateral_available: Cash::zero(),
            exchange_rate: Decimal::ONE,
            perp_token_value: Cash::new(dec!(1)),
            collateral_perp_token_value: Cash::zero(),
        };

        match liquidate_local_currency(
            &factors,
            &group,
            &PortfolioState::empty(PortfolioMode::AssetArray),
            Cash::new(Decimal::from(held)),
            Cash::new(Decimal::from(cap)),
            Timestamp::from_secs(0),
        ) {
            Ok(result) => {
                prop_assert!(result.perp_tokens_transferred.is_positive());
                prop_assert!(result.perp_tokens_transferred <= Cash::new(Decimal::from(held)));
                if cap > 0 {
                    prop_assert!(result.perp_tokens_transferred <= Cash::new(Decimal::from(cap)));
                }
                prop_assert!(result.net_local_from_liquidator.is_positive());
            }
            Err(LiquidationError::NothingToLiquidate) => {}
            Err(e) => prop_assert!(false, "unexpected error {e}"),
        }
    }
}
